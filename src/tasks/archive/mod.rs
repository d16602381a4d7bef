// src/tasks/archive/mod.rs

//! ARCHIVE and EXTRACT.
//!
//! The container and codec are chosen from the archive's file name alone:
//!
//! | suffix                  | format          |
//! |-------------------------|-----------------|
//! | `.zip`                  | zip (deflate)   |
//! | `.tar`                  | tar             |
//! | `.tar.gz`, `.tgz`       | tar + gzip      |
//! | `.tar.bz2`, `.tbz2`     | tar + bzip2     |
//! | `.tar.xz`, `.txz`       | tar + xz        |
//! | `.tar.zst`              | tar + zstd      |
//! | `.tar.lz4`              | tar + lz4 frame |

mod create;
mod extract;

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::fs::WriteSeek;

use super::TaskError;

pub use create::ArchiveTask;
pub use extract::ExtractTask;

pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lz4,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(Codec),
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar(Codec::None) => "tar",
            ArchiveFormat::Tar(Codec::Gzip) => "tar.gz",
            ArchiveFormat::Tar(Codec::Bzip2) => "tar.bz2",
            ArchiveFormat::Tar(Codec::Xz) => "tar.xz",
            ArchiveFormat::Tar(Codec::Zstd) => "tar.zst",
            ArchiveFormat::Tar(Codec::Lz4) => "tar.lz4",
        };
        f.write_str(s)
    }
}

const SUFFIXES: [(&str, ArchiveFormat); 10] = [
    (".zip", ArchiveFormat::Zip),
    (".tar", ArchiveFormat::Tar(Codec::None)),
    (".tar.gz", ArchiveFormat::Tar(Codec::Gzip)),
    (".tgz", ArchiveFormat::Tar(Codec::Gzip)),
    (".tar.bz2", ArchiveFormat::Tar(Codec::Bzip2)),
    (".tbz2", ArchiveFormat::Tar(Codec::Bzip2)),
    (".tar.xz", ArchiveFormat::Tar(Codec::Xz)),
    (".txz", ArchiveFormat::Tar(Codec::Xz)),
    (".tar.zst", ArchiveFormat::Tar(Codec::Zstd)),
    (".tar.lz4", ArchiveFormat::Tar(Codec::Lz4)),
];

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Result<Self, TaskError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        SUFFIXES
            .iter()
            .filter(|(suffix, _)| name.ends_with(suffix) && name.len() > suffix.len())
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, format)| *format)
            .ok_or_else(|| {
                TaskError::bad_args(format!("unknown archive format for {:?}", path))
            })
    }

    /// Highest accepted compression level.
    pub fn max_level(self) -> u32 {
        match self {
            ArchiveFormat::Tar(Codec::Zstd) => 19,
            _ => 9,
        }
    }

    pub fn check_level(self, level: u32) -> Result<(), TaskError> {
        if level > self.max_level() {
            return Err(TaskError::bad_args(format!(
                "compression level {} is out of range for {} (0-{})",
                level,
                self,
                self.max_level()
            )));
        }
        Ok(())
    }
}

/// Compressed tar output. Every codec is finished explicitly so trailers
/// are written before the file is closed.
pub(crate) enum TarSink {
    Plain(Box<dyn WriteSeek>),
    Gzip(flate2::write::GzEncoder<Box<dyn WriteSeek>>),
    Bzip2(bzip2::write::BzEncoder<Box<dyn WriteSeek>>),
    Xz(xz2::write::XzEncoder<Box<dyn WriteSeek>>),
    Zstd(zstd::stream::write::Encoder<'static, Box<dyn WriteSeek>>),
    Lz4(lz4_flex::frame::FrameEncoder<Box<dyn WriteSeek>>),
}

impl TarSink {
    pub(crate) fn new(codec: Codec, level: u32, out: Box<dyn WriteSeek>) -> io::Result<Self> {
        Ok(match codec {
            Codec::None => TarSink::Plain(out),
            Codec::Gzip => {
                TarSink::Gzip(flate2::write::GzEncoder::new(out, flate2::Compression::new(level)))
            }
            // bzip2 has no level 0.
            Codec::Bzip2 => TarSink::Bzip2(bzip2::write::BzEncoder::new(
                out,
                bzip2::Compression::new(level.max(1)),
            )),
            Codec::Xz => TarSink::Xz(xz2::write::XzEncoder::new(out, level)),
            Codec::Zstd => TarSink::Zstd(zstd::stream::write::Encoder::new(out, level as i32)?),
            Codec::Lz4 => TarSink::Lz4(lz4_flex::frame::FrameEncoder::new(out)),
        })
    }

    pub(crate) fn finish(self) -> io::Result<Box<dyn WriteSeek>> {
        let mut out = match self {
            TarSink::Plain(w) => w,
            TarSink::Gzip(enc) => enc.finish()?,
            TarSink::Bzip2(enc) => enc.finish()?,
            TarSink::Xz(enc) => enc.finish()?,
            TarSink::Zstd(enc) => enc.finish()?,
            TarSink::Lz4(enc) => enc.finish().map_err(io::Error::other)?,
        };
        out.flush()?;
        Ok(out)
    }

    fn inner(&mut self) -> &mut dyn Write {
        match self {
            TarSink::Plain(w) => w,
            TarSink::Gzip(enc) => enc,
            TarSink::Bzip2(enc) => enc,
            TarSink::Xz(enc) => enc,
            TarSink::Zstd(enc) => enc,
            TarSink::Lz4(enc) => enc,
        }
    }
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner().flush()
    }
}

/// Decompressing reader for a tar stream.
pub(crate) fn tar_source<R: Read + Send + 'static>(
    codec: Codec,
    input: R,
) -> io::Result<Box<dyn Read + Send>> {
    Ok(match codec {
        Codec::None => Box::new(input),
        Codec::Gzip => Box::new(flate2::read::GzDecoder::new(input)),
        Codec::Bzip2 => Box::new(bzip2::read::BzDecoder::new(input)),
        Codec::Xz => Box::new(xz2::read::XzDecoder::new(input)),
        Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(input)?),
        Codec::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(input)),
    })
}

/// Reader that fails once the token is cancelled, so long copies stop
/// between chunks.
pub(crate) struct CancelRead<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R> CancelRead<R> {
    pub(crate) fn new(inner: R, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancelRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("operation cancelled"));
        }
        self.inner.read(buf)
    }
}

/// Turn a failure into `Cancelled` when it was caused by the token.
pub(crate) fn cancelled_or(
    cancel: &CancellationToken,
    operation: &str,
    err: TaskError,
) -> TaskError {
    if cancel.is_cancelled() {
        TaskError::Cancelled(operation.to_string())
    } else {
        err
    }
}

/// Resolve an entry name under `root`, refusing anything that would land
/// outside of it.
pub fn safe_join(root: &Path, entry: &Path) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(out)
}
