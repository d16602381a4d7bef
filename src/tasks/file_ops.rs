// src/tasks/file_ops.rs

//! COPY, COPYRENAME, MOVE, MOVERENAME, RENAME and DELETE.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::fs::{self, FileSystem};

use super::{RunContext, Task, TaskArgs, TaskError, blocking};

#[derive(Debug, Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: String,
}

fn target_path(args: &TaskArgs) -> Result<PathBuf, TaskError> {
    let raw: PathArgs = args.decode()?;
    if raw.path.trim().is_empty() {
        return Err(TaskError::bad_args("missing destination path"));
    }
    Ok(PathBuf::from(raw.path))
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr, TaskError> {
    path.file_name()
        .ok_or_else(|| TaskError::bad_args(format!("{:?} has no file name", path)))
}

fn ensure_source(fs: &dyn FileSystem, path: &Path) -> Result<(), TaskError> {
    if fs.is_file(path) {
        Ok(())
    } else {
        Err(TaskError::NotFound(format!("file {:?}", path)))
    }
}

async fn copy(fs: Arc<dyn FileSystem>, src: PathBuf, dst: PathBuf) -> Result<u64, TaskError> {
    blocking(move || {
        ensure_source(fs.as_ref(), &src)?;
        let n = fs::copy_file(fs.as_ref(), &src, &dst)?;
        debug!(from = ?src, to = ?dst, bytes = n, "file copied");
        Ok(n)
    })
    .await
}

async fn relocate(cx: RunContext<'_>, dst: PathBuf) -> Result<(), TaskError> {
    let src = cx.transfer.file().to_path_buf();
    let fs = Arc::clone(&cx.fs);
    let moved_to = dst.clone();
    blocking(move || {
        ensure_source(fs.as_ref(), &src)?;
        fs::move_file(fs.as_ref(), &src, &moved_to)?;
        Ok(())
    })
    .await?;

    info!(from = ?cx.transfer.transfer.local_path, to = ?dst, "file moved");
    cx.transfer.transfer.local_path = dst;
    Ok(())
}

/// Copies the file into the `path` directory, keeping its name.
#[derive(Debug, Default)]
pub struct CopyTask;

#[async_trait]
impl Task for CopyTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        target_path(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let src = cx.transfer.file().to_path_buf();
        let dst = target_path(cx.args)?.join(file_name(&src)?);
        copy(Arc::clone(&cx.fs), src, dst).await.map(|_| ())
    }
}

/// Copies the file to exactly `path`.
#[derive(Debug, Default)]
pub struct CopyRenameTask;

#[async_trait]
impl Task for CopyRenameTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        target_path(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let src = cx.transfer.file().to_path_buf();
        let dst = target_path(cx.args)?;
        copy(Arc::clone(&cx.fs), src, dst).await.map(|_| ())
    }
}

/// Moves the file into the `path` directory and follows it.
#[derive(Debug, Default)]
pub struct MoveTask;

#[async_trait]
impl Task for MoveTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        target_path(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let dst = target_path(cx.args)?.join(file_name(cx.transfer.file())?);
        relocate(cx, dst).await
    }
}

/// Moves the file to exactly `path` and follows it.
#[derive(Debug, Default)]
pub struct MoveRenameTask;

#[async_trait]
impl Task for MoveRenameTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        target_path(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let dst = target_path(cx.args)?;
        relocate(cx, dst).await
    }
}

/// Points the transfer at another, already existing, file.
#[derive(Debug, Default)]
pub struct RenameTask;

#[async_trait]
impl Task for RenameTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        target_path(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let new_path = target_path(cx.args)?;
        ensure_source(cx.fs.as_ref(), &new_path)?;

        let stat = cx.fs.stat(&new_path)?;
        info!(from = ?cx.transfer.transfer.local_path, to = ?new_path, "transfer file renamed");
        cx.transfer.transfer.local_path = new_path;
        cx.transfer.transfer.filesize = stat.len as i64;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DeleteTask;

#[async_trait]
impl Task for DeleteTask {
    fn validate(&mut self, _args: &TaskArgs) -> Result<(), TaskError> {
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let path = cx.transfer.file();
        ensure_source(cx.fs.as_ref(), path)?;
        cx.fs.remove_file(path)?;
        info!(path = ?path, "file deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_is_required() {
        assert!(matches!(
            CopyTask.validate(&TaskArgs::new()),
            Err(TaskError::BadArguments(_))
        ));
        assert!(MoveRenameTask.validate(&TaskArgs::new().with("path", "/out/x")).is_ok());
        assert!(DeleteTask.validate(&TaskArgs::new()).is_ok());
    }
}
