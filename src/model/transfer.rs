// src/model/transfer.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::types::{ErrorCode, TransferStatus, TransferStep};

/// Error classification plus human-readable detail stored on a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferError {
    pub code: ErrorCode,
    pub details: String,
}

impl TransferError {
    pub fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

/// A file transfer as seen by the task engine.
///
/// Most fields are owned by the scheduling layer. The engine itself only
/// writes the resume point (`step`, `task_number`, `task_fingerprint`),
/// `filesize` and `error`; tasks may change `local_path` (move, rename,
/// encrypt, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transfer {
    pub id: i64,
    pub remote_transfer_id: String,
    pub rule: String,
    pub is_server: bool,
    /// Set for server transfers.
    pub local_account_id: Option<i64>,
    /// Set for client transfers.
    pub remote_account_id: Option<i64>,
    /// Client used to initiate a client transfer.
    pub client: Option<String>,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub src_filename: String,
    pub dest_filename: String,
    /// `-1` when unknown.
    pub filesize: i64,
    pub start: Option<DateTime<Utc>>,
    pub status: TransferStatus,
    pub step: TransferStep,
    pub task_number: u32,
    /// [`TaskDef::fingerprint`](crate::model::TaskDef::fingerprint) of the
    /// last step completed in `step`; empty when none is recorded.
    pub task_fingerprint: String,
    pub error: TransferError,
    /// Free-form metadata attached to the transfer.
    pub transfer_info: BTreeMap<String, serde_json::Value>,
}

impl Transfer {
    pub fn is_server(&self) -> bool {
        self.is_server
    }
}
