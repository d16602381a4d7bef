// src/tasks/archive/create.rs

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use globset::GlobBuilder;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::fs::{FileSystem, WriteSeek};
use crate::tasks::args::de;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking};

use super::{ArchiveFormat, CancelRead, Codec, DEFAULT_LEVEL, TarSink, cancelled_or};

const OPERATION: &str = "archive creation";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveArgs {
    #[serde(default, deserialize_with = "de::comma_list")]
    files: Vec<String>,
    #[serde(default)]
    output_path: String,
    #[serde(default, deserialize_with = "de::opt_from_str")]
    compression_level: Option<i64>,
}

#[derive(Debug, Clone)]
struct ArchivePlan {
    patterns: Vec<String>,
    output: PathBuf,
    format: ArchiveFormat,
    level: u32,
}

impl ArchivePlan {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: ArchiveArgs = args.decode()?;
        if raw.files.is_empty() {
            return Err(TaskError::bad_args("missing files to archive"));
        }
        if raw.output_path.trim().is_empty() {
            return Err(TaskError::bad_args("missing archive output path"));
        }

        let output = PathBuf::from(raw.output_path.trim());
        let format = ArchiveFormat::from_path(&output)?;
        let level = match raw.compression_level {
            None => DEFAULT_LEVEL,
            Some(l) if l < 0 => {
                return Err(TaskError::bad_args(format!("invalid compression level {}", l)));
            }
            Some(l) => u32::try_from(l)
                .map_err(|_| TaskError::bad_args(format!("invalid compression level {}", l)))?,
        };
        format.check_level(level)?;

        Ok(Self {
            patterns: raw.files,
            output,
            format,
            level,
        })
    }
}

/// One member of the archive. Names use `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Entry {
    Dir(String),
    File { name: String, path: PathBuf },
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Dir(name) | Entry::File { name, .. } => name,
        }
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The directory part of `pattern` before the first wildcard.
fn literal_root(pattern: &str) -> PathBuf {
    Path::new(pattern)
        .components()
        .take_while(|c| !has_glob_meta(&c.as_os_str().to_string_lossy()))
        .collect()
}

fn expand_pattern(fs: &dyn FileSystem, pattern: &str) -> Result<Vec<PathBuf>, TaskError> {
    if !has_glob_meta(pattern) {
        let path = PathBuf::from(pattern);
        return Ok(if fs.exists(&path) { vec![path] } else { Vec::new() });
    }

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| TaskError::bad_args(format!("invalid file pattern {:?}: {}", pattern, e)))?
        .compile_matcher();

    let root = literal_root(pattern);
    let relative = root.as_os_str().is_empty();
    let walk_root = if relative { PathBuf::from(".") } else { root };
    if !fs.is_dir(&walk_root) {
        return Ok(Vec::new());
    }

    let matches = fs
        .walk(&walk_root)?
        .into_iter()
        .filter_map(|p| {
            let candidate = if relative {
                p.strip_prefix(".").map(Path::to_path_buf).unwrap_or(p)
            } else {
                p
            };
            matcher.is_match(&candidate).then_some(candidate)
        })
        .collect();
    Ok(matches)
}

fn entry_name(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Archive members for one matched path. Directories bring their whole
/// tree, named relative to the directory's parent.
fn entries_for(fs: &dyn FileSystem, path: &Path) -> Result<Vec<Entry>, TaskError> {
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    if !fs.is_dir(path) {
        return Ok(vec![Entry::File {
            name: entry_name(path, base),
            path: path.to_path_buf(),
        }]);
    }

    let mut entries = vec![Entry::Dir(entry_name(path, base))];
    for child in fs.walk(path)? {
        let name = entry_name(&child, base);
        if fs.is_dir(&child) {
            entries.push(Entry::Dir(name));
        } else {
            entries.push(Entry::File { name, path: child });
        }
    }
    Ok(entries)
}

/// Members for every pattern, in order. The same path matched twice is
/// stored once; two different sources under one member name are refused.
pub(crate) fn collect_entries(fs: &dyn FileSystem, patterns: &[String]) -> Result<Vec<Entry>, TaskError> {
    let mut seen: HashMap<String, Option<PathBuf>> = HashMap::new();
    let mut entries = Vec::new();

    for pattern in patterns {
        let matched = expand_pattern(fs, pattern)?;
        if matched.is_empty() {
            return Err(TaskError::NotFound(format!("files matching {:?}", pattern)));
        }
        for path in matched {
            for entry in entries_for(fs, &path)? {
                let source = match &entry {
                    Entry::Dir(_) => None,
                    Entry::File { path, .. } => Some(path.clone()),
                };
                match seen.get(entry.name()) {
                    None => {
                        seen.insert(entry.name().to_string(), source);
                        entries.push(entry);
                    }
                    Some(existing) if *existing == source => {}
                    Some(_) => {
                        return Err(TaskError::bad_args(format!(
                            "{:?} and another matched file would both be archived as {:?}",
                            path,
                            entry.name()
                        )));
                    }
                }
            }
        }
    }
    Ok(entries)
}

fn write_zip(
    fs: &dyn FileSystem,
    out: Box<dyn WriteSeek>,
    entries: &[Entry],
    level: u32,
    cancel: &CancellationToken,
) -> Result<(), TaskError> {
    let options = if level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level as i64))
    };

    let mut zip = zip::ZipWriter::new(out);
    for entry in entries {
        match entry {
            Entry::Dir(name) => {
                zip.add_directory(name.as_str(), options)
                    .with_context(|| format!("adding directory {:?} to zip", name))?;
            }
            Entry::File { name, path } => {
                zip.start_file(name.as_str(), options)
                    .with_context(|| format!("adding file {:?} to zip", name))?;
                let mut reader = CancelRead::new(fs.open_read(path)?, cancel.clone());
                io::copy(&mut reader, &mut zip)?;
            }
        }
        debug!(entry = entry.name(), "archived");
    }
    let mut out = zip.finish().context("finishing zip archive")?;
    out.flush()?;
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn write_tar(
    fs: &dyn FileSystem,
    out: Box<dyn WriteSeek>,
    entries: &[Entry],
    codec: Codec,
    level: u32,
    cancel: &CancellationToken,
) -> Result<(), TaskError> {
    let mtime = now_secs();
    let mut builder = tar::Builder::new(TarSink::new(codec, level, out)?);

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(mtime);
        match entry {
            Entry::Dir(name) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, format!("{}/", name), io::empty())?;
            }
            Entry::File { name, path } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(fs.stat(path)?.len);
                let reader = CancelRead::new(fs.open_read(path)?, cancel.clone());
                builder.append_data(&mut header, name, reader)?;
            }
        }
        debug!(entry = entry.name(), "archived");
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

/// Packs files and directories matching `files` into `outputPath`.
#[derive(Debug, Default)]
pub struct ArchiveTask {
    plan: Option<ArchivePlan>,
}

#[async_trait]
impl Task for ArchiveTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.plan = Some(ArchivePlan::parse(args)?);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => ArchivePlan::parse(cx.args)?,
        };
        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let job = plan.clone();

        let count = blocking(move || {
            let entries = collect_entries(fs.as_ref(), &job.patterns)?;
            if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs.create_dir_all(parent)?;
            }

            let out = fs.create(&job.output)?;
            let written = match job.format {
                ArchiveFormat::Zip => write_zip(fs.as_ref(), out, &entries, job.level, &cancel),
                ArchiveFormat::Tar(codec) => {
                    write_tar(fs.as_ref(), out, &entries, codec, job.level, &cancel)
                }
            };

            if let Err(err) = written {
                if let Err(e) = fs.remove_file(&job.output) {
                    warn!(path = ?job.output, error = %e, "failed to remove partial archive");
                }
                return Err(cancelled_or(&cancel, OPERATION, err));
            }
            Ok(entries.len())
        })
        .await?;

        info!(
            archive = ?plan.output,
            format = %plan.format,
            level = plan.level,
            entries = count,
            "archive created"
        );
        Ok(())
    }
}
