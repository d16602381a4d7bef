// src/tasks/archive/extract.rs

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking};

use super::{ArchiveFormat, CancelRead, Codec, cancelled_or, safe_join, tar_source};

const OPERATION: &str = "archive extraction";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractArgs {
    #[serde(default)]
    archive_path: String,
    #[serde(default)]
    output_dir: String,
}

fn escaping(name: &Path) -> TaskError {
    TaskError::Other(anyhow::anyhow!(
        "archive entry {:?} points outside of the output directory",
        name
    ))
}

fn write_entry(
    fs: &dyn FileSystem,
    target: &Path,
    reader: &mut dyn io::Read,
) -> Result<u64, TaskError> {
    if let Some(parent) = target.parent() {
        fs.create_dir_all(parent)?;
    }
    let mut out = fs.create(target)?;
    let n = io::copy(reader, &mut out)?;
    out.flush()?;
    Ok(n)
}

fn extract_zip(
    fs: &dyn FileSystem,
    archive: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<usize, TaskError> {
    let input = fs.open_read(archive)?;
    let mut zip = zip::ZipArchive::new(input).context("reading zip archive")?;
    let mut count = 0;

    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled(OPERATION.to_string()));
        }
        let mut entry = zip.by_index(i).context("reading zip entry")?;
        let name = PathBuf::from(entry.name());
        let target = safe_join(output, &name).ok_or_else(|| escaping(&name))?;

        if entry.is_dir() {
            fs.create_dir_all(&target)?;
        } else {
            let mut reader = CancelRead::new(&mut entry, cancel.clone());
            write_entry(fs, &target, &mut reader)?;
        }
        debug!(entry = ?name, "extracted");
        count += 1;
    }
    Ok(count)
}

fn extract_tar(
    fs: &dyn FileSystem,
    archive: &Path,
    output: &Path,
    codec: Codec,
    cancel: &CancellationToken,
) -> Result<usize, TaskError> {
    let input = CancelRead::new(fs.open_read(archive)?, cancel.clone());
    let mut tar = tar::Archive::new(tar_source(codec, input)?);
    let mut count = 0;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        let kind = entry.header().entry_type();

        let Some(target) = safe_join(output, &name) else {
            // The archive root itself ("./") carries nothing to restore.
            if kind.is_dir() && name.components().all(|c| c == std::path::Component::CurDir) {
                continue;
            }
            return Err(escaping(&name));
        };

        if kind.is_dir() {
            fs.create_dir_all(&target)?;
        } else if kind.is_file() || kind == tar::EntryType::GNUSparse {
            write_entry(fs, &target, &mut entry)?;
        } else {
            debug!(entry = ?name, kind = ?kind, "skipping unsupported tar entry");
            continue;
        }
        debug!(entry = ?name, "extracted");
        count += 1;
    }
    Ok(count)
}

/// Unpacks a zip or tar archive into a directory.
#[derive(Debug, Default)]
pub struct ExtractTask {
    archive: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl ExtractTask {
    fn parse(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        let raw: ExtractArgs = args.decode()?;
        self.archive = Some(raw.archive_path.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        self.output = Some(raw.output_dir.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        if let Some(ref archive) = self.archive {
            ArchiveFormat::from_path(archive)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Task for ExtractTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.parse(args)
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        self.parse(cx.args)?;

        let archive = self
            .archive
            .take()
            .unwrap_or_else(|| cx.transfer.file().to_path_buf());
        let format = ArchiveFormat::from_path(&archive)?;
        let output = match self.output.take() {
            Some(dir) => dir,
            None => archive
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let (src, dst) = (archive.clone(), output.clone());

        let count = blocking(move || {
            if !fs.is_file(&src) {
                return Err(TaskError::NotFound(format!("archive {:?}", src)));
            }
            if fs.exists(&dst) && !fs.is_dir(&dst) {
                return Err(TaskError::Other(anyhow::anyhow!(
                    "output path {:?} is not a directory",
                    dst
                )));
            }
            fs.create_dir_all(&dst)?;

            let extracted = match format {
                ArchiveFormat::Zip => extract_zip(fs.as_ref(), &src, &dst, &cancel),
                ArchiveFormat::Tar(codec) => extract_tar(fs.as_ref(), &src, &dst, codec, &cancel),
            };
            extracted.map_err(|e| cancelled_or(&cancel, OPERATION, e))
        })
        .await?;

        info!(archive = ?archive, output = ?output, format = %format, entries = count, "archive extracted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_archive_suffix_is_rejected() {
        let args = TaskArgs::new().with("archivePath", "/in/data.rar");
        assert!(matches!(
            ExtractTask::default().validate(&args),
            Err(TaskError::BadArguments(_))
        ));
        assert!(ExtractTask::default().validate(&TaskArgs::new()).is_ok());
    }
}
