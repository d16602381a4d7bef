// src/tasks/mod.rs

//! Task implementations and the contract they share.
//!
//! A task is created fresh from the [`TaskRegistry`] for every step. The
//! runner calls [`Task::validate_db`] (which defaults to [`Task::validate`])
//! and then [`Task::run`]; a validation failure means `run` is never called.
//! Handles resolved during validation (keys, rules, accounts) are kept on
//! the instance for `run` to use.

use std::fmt::Debug;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fs::FileSystem;
use crate::model::TransferContext;
use crate::store::Store;

pub mod archive;
pub mod args;
pub mod chnewline;
pub mod crypto;
pub mod email;
pub mod error;
pub mod exec;
pub mod file_ops;
pub mod icap;
pub mod registry;
pub mod remote_delete;
pub mod transcode;
pub mod transfer;
pub mod updateconf;

pub use args::TaskArgs;
pub use email::{Mailer, OutgoingMail, SmtpMailer};
pub use error::TaskError;
pub use registry::TaskRegistry;

/// Deletes a file on the partner side of the current connection.
///
/// Supplied per chain invocation by the protocol layer; absent when the
/// protocol has no such operation.
#[async_trait]
pub trait RemoteDeleter: Send + Sync {
    async fn delete(&self, path: &str) -> anyhow::Result<()>;
}

/// Everything a task may use while it runs.
pub struct RunContext<'a> {
    pub cancel: CancellationToken,
    pub args: &'a TaskArgs,
    pub store: Arc<dyn Store>,
    pub fs: Arc<dyn FileSystem>,
    pub mailer: Arc<dyn Mailer>,
    pub transfer: &'a mut TransferContext,
    pub remote: Option<&'a dyn RemoteDeleter>,
}

#[async_trait]
pub trait Task: Send + Debug {
    /// Check the argument shape without touching external state.
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError>;

    /// Check the arguments against stored resources. Tasks that need keys,
    /// rules or accounts override this and cache what they find.
    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let _ = store;
        self.validate(args)
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError>;
}

/// Run blocking work on the blocking pool, flattening the join error.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(TaskError::join)?
}

/// Rewrite `path` through `<path>.tmp`: `rewrite` streams the old contents
/// into the temp file, which then replaces the original. The temp file is
/// removed if anything fails. Returns the new size.
pub(crate) fn rewrite_in_place<F>(fs: &dyn FileSystem, path: &Path, rewrite: F) -> Result<u64, TaskError>
where
    F: FnOnce(&mut dyn Read, &mut dyn Write) -> Result<(), TaskError>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| -> Result<u64, TaskError> {
        let mut reader = fs.open_read(path)?;
        let mut writer = fs.create(&tmp)?;
        rewrite(&mut reader, &mut writer)?;
        writer.flush()?;
        drop(writer);
        drop(reader);
        fs.remove_file(path)?;
        crate::fs::move_file(fs, &tmp, path)?;
        Ok(fs.stat(path)?.len)
    })();

    if result.is_err() && fs.exists(&tmp) {
        if let Err(e) = fs.remove_file(&tmp) {
            warn!(path = ?tmp, error = %e, "failed to remove temporary file");
        }
    }
    result
}
