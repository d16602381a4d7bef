// src/tasks/crypto/mod.rs

//! Cryptographic tasks: ENCRYPT / DECRYPT, SIGN / VERIFY and the combined
//! PGP tasks ENCRYPT&SIGN / DECRYPT&VERIFY.
//!
//! Keys are looked up by name in `validate_db` and kept, parsed, on the task
//! instance. `run` never touches the store.

mod combined;
mod encrypt;
mod sign;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::{CryptoError, pgp::PgpKey};
use crate::fs::FileSystem;
use crate::model::CryptoKey;
use crate::store::Store;

use super::{TaskError, blocking};

pub use combined::{DecryptVerifyTask, EncryptSignTask};
pub use encrypt::{DecryptTask, EncryptTask};
pub use sign::{SignTask, VerifyTask};

/// Suffixes stripped from encrypted file names on decryption.
const ENCRYPTED_SUFFIXES: [&str; 3] = [".crypt", ".pgp", ".gpg"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Default output of an encryption: `<file>.crypt`.
pub fn encrypted_path(file: &Path, explicit: &str) -> PathBuf {
    if !explicit.trim().is_empty() {
        return PathBuf::from(explicit);
    }
    with_suffix(file, ".crypt")
}

/// Default output of a decryption: the file without its encryption suffix,
/// or `<file>.decrypt` when it has none.
pub fn decrypted_path(file: &Path, explicit: &str) -> PathBuf {
    if !explicit.trim().is_empty() {
        return PathBuf::from(explicit);
    }
    let name = file.to_string_lossy();
    for suffix in ENCRYPTED_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if !stripped.is_empty() && !stripped.ends_with(std::path::MAIN_SEPARATOR) {
                return PathBuf::from(stripped);
            }
        }
    }
    with_suffix(file, ".decrypt")
}

/// Default detached signature location: `<file>.sig`.
pub fn signature_path(file: &Path, explicit: &str) -> PathBuf {
    if !explicit.trim().is_empty() {
        return PathBuf::from(explicit);
    }
    with_suffix(file, ".sig")
}

/// Fetch the named key, mapping a missing name to a bad argument.
pub(crate) fn load_key(store: &dyn Store, name: &str, role: &str) -> Result<CryptoKey, TaskError> {
    if name.trim().is_empty() {
        return Err(TaskError::bad_args(format!("missing {} key name", role)));
    }
    store
        .crypto_key(name)
        .map_err(|e| TaskError::from_key_lookup(e, name))
}

/// Stream transform applied by [`transform_file`].
pub(crate) type Transform =
    Box<dyn FnOnce(&mut dyn Read, &mut dyn Write, &CancellationToken) -> Result<(), CryptoError> + Send>;

/// Read `src`, write the transformed bytes to `dst`, then drop `src` unless
/// it is kept. A failed transform removes whatever was written to `dst`.
/// `dst` must differ from `src`.
///
/// Returns the size of `dst`.
pub(crate) async fn transform_file(
    fs: Arc<dyn FileSystem>,
    cancel: CancellationToken,
    src: PathBuf,
    dst: PathBuf,
    keep_original: bool,
    operation: &'static str,
    transform: Transform,
) -> Result<u64, TaskError> {
    if same_file(&src, &dst) {
        return Err(TaskError::bad_args(format!(
            "output file {:?} is the file to {}",
            dst, operation
        )));
    }
    blocking(move || {
        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.create_dir_all(parent)?;
        }
        let mut reader = fs
            .open_read(&src)
            .with_context(|| format!("cannot open file to {}", operation))?;

        let result = fs.create(&dst).map_err(TaskError::from).and_then(|mut writer| {
            transform(&mut reader, &mut writer, &cancel)
                .map_err(|e| TaskError::from_crypto(e, operation))?;
            writer.flush()?;
            Ok(())
        });
        drop(reader);

        if let Err(err) = result {
            if fs.exists(&dst) {
                if let Err(e) = fs.remove_file(&dst) {
                    warn!(path = ?dst, error = %e, "failed to remove partial output");
                }
            }
            return Err(err);
        }

        if !keep_original {
            fs.remove_file(&src)?;
            debug!(path = ?src, "original file removed");
        }
        Ok(fs.stat(&dst)?.len)
    })
    .await
}

/// Whether two paths name the same file, ignoring `.` components and
/// trailing separators.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

/// Read the whole stream, for the PGP operations that work in memory.
pub(crate) fn read_all(reader: &mut dyn Read, cancel: &CancellationToken) -> Result<Vec<u8>, CryptoError> {
    if cancel.is_cancelled() {
        return Err(CryptoError::Cancelled);
    }
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write a buffer unless the operation was cancelled meanwhile.
pub(crate) fn write_all(writer: &mut dyn Write, data: &[u8], cancel: &CancellationToken) -> Result<(), CryptoError> {
    if cancel.is_cancelled() {
        return Err(CryptoError::Cancelled);
    }
    writer.write_all(data)?;
    Ok(())
}

/// A key usable for PGP encryption or verification, whichever type it has.
pub(crate) fn public_pgp(key: &CryptoKey) -> Result<PgpKey, TaskError> {
    Ok(key.pgp_key()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_strips_known_suffixes() {
        assert_eq!(decrypted_path(Path::new("/in/a.txt.crypt"), ""), PathBuf::from("/in/a.txt"));
        assert_eq!(decrypted_path(Path::new("/in/a.txt.gpg"), ""), PathBuf::from("/in/a.txt"));
        assert_eq!(decrypted_path(Path::new("/in/a.bin"), ""), PathBuf::from("/in/a.bin.decrypt"));
        assert_eq!(decrypted_path(Path::new("/in/a.crypt"), "/out/b"), PathBuf::from("/out/b"));
    }

    #[test]
    fn same_file_ignores_spelling_differences() {
        assert!(same_file(Path::new("/in/./a.txt"), Path::new("/in/a.txt")));
        assert!(!same_file(Path::new("/in/a.txt"), Path::new("/in/a.txt.crypt")));
    }

    #[test]
    fn default_outputs_append_suffixes() {
        assert_eq!(encrypted_path(Path::new("/in/a.txt"), ""), PathBuf::from("/in/a.txt.crypt"));
        assert_eq!(signature_path(Path::new("/in/a.txt"), ""), PathBuf::from("/in/a.txt.sig"));
    }
}
