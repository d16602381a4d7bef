// src/store/mod.rs

//! Persistence capability used by the engine and the tasks.
//!
//! The engine only ever writes transfer progress through
//! [`Store::update_progress`]; everything else it reads. Tasks that create
//! data (TRANSFER, PREREGISTER, UPDATECONF) go through `insert_transfer`
//! and `import`.

use std::fmt::Debug;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{
    CryptoKey, EmailTemplate, LocalAccount, LocalAgent, RemoteAccount, RemoteAgent, Rule,
    SmtpCredential, Transfer, TransferError,
};
use crate::types::{Direction, TransferStep};

pub mod import;
pub mod memory;

pub use import::ConfigImport;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {key:?} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key:?} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Fields written after a chain step. `None` leaves the stored value as is.
///
/// A progress update is applied atomically: either every field is written or
/// none is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub task_number: Option<u32>,
    pub task_fingerprint: Option<String>,
    pub step: Option<TransferStep>,
    pub filesize: Option<i64>,
    pub local_path: Option<PathBuf>,
    pub error: Option<TransferError>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProgressUpdate::default()
    }

    /// Apply the present fields onto `transfer`.
    pub fn apply_to(&self, transfer: &mut Transfer) {
        if let Some(n) = self.task_number {
            transfer.task_number = n;
        }
        if let Some(ref fp) = self.task_fingerprint {
            transfer.task_fingerprint = fp.clone();
        }
        if let Some(step) = self.step {
            transfer.step = step;
        }
        if let Some(size) = self.filesize {
            transfer.filesize = size;
        }
        if let Some(ref path) = self.local_path {
            transfer.local_path = path.clone();
        }
        if let Some(ref error) = self.error {
            transfer.error = error.clone();
        }
    }
}

/// Persistent state shared by all transfers.
pub trait Store: Send + Sync + Debug {
    fn transfer(&self, id: i64) -> StoreResult<Transfer>;

    /// Insert a new transfer, assigning its id when it is `0`.
    fn insert_transfer(&self, transfer: Transfer) -> StoreResult<i64>;

    fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()>;

    fn crypto_key(&self, name: &str) -> StoreResult<CryptoKey>;

    /// Every rule carrying `name` (at most one per direction).
    fn rules_named(&self, name: &str) -> StoreResult<Vec<Rule>>;

    fn rule(&self, name: &str, direction: Direction) -> StoreResult<Rule> {
        self.rules_named(name)?
            .into_iter()
            .find(|r| r.direction == direction)
            .ok_or_else(|| StoreError::not_found("rule", format!("{} ({})", name, direction)))
    }

    fn local_agent(&self, id: i64) -> StoreResult<LocalAgent>;
    fn local_agent_by_name(&self, name: &str) -> StoreResult<LocalAgent>;
    fn remote_agent(&self, id: i64) -> StoreResult<RemoteAgent>;
    fn remote_agent_by_name(&self, name: &str) -> StoreResult<RemoteAgent>;

    fn local_account(&self, id: i64) -> StoreResult<LocalAccount>;
    fn local_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<LocalAccount>;
    fn remote_account(&self, id: i64) -> StoreResult<RemoteAccount>;
    fn remote_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<RemoteAccount>;

    fn email_template(&self, name: &str) -> StoreResult<EmailTemplate>;
    fn smtp_credential(&self, email: &str) -> StoreResult<SmtpCredential>;

    /// Create or update everything in `import` as one transaction.
    fn import(&self, import: ConfigImport) -> StoreResult<()>;
}
