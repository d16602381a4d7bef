// src/model/mod.rs

//! Data handled by the task engine: transfers, rules and their task chains,
//! agents and accounts, crypto keys, email settings, and the per-run
//! [`TransferContext`].

mod agent;
mod context;
mod crypto_key;
mod email;
mod rule;
mod transfer;

pub use agent::{LocalAccount, LocalAgent, RemoteAccount, RemoteAgent};
pub use context::{Paths, TransferContext};
pub use crypto_key::{CryptoKey, CryptoKeyError, CryptoKeyType};
pub use email::{EmailTemplate, SmtpCredential};
pub use rule::{Rule, TaskDef, TaskSpec};
pub use transfer::{Transfer, TransferError};
