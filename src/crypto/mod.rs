// src/crypto/mod.rs

//! Stream cryptography primitives used by the crypto tasks.
//!
//! - [`aes`]: AES in CFB / CTR / OFB stream modes, IV prepended to the output.
//! - [`hmac`]: keyed-hash signatures (SHA-256/384/512, MD5).
//! - [`pgp`]: OpenPGP encryption and detached signatures through `pgp`.
//!
//! Everything here is synchronous and meant to run on a blocking thread;
//! long loops poll the supplied [`CancellationToken`] between chunks.

pub mod aes;
pub mod hmac;
pub mod pgp;

use std::io::{self, Read};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Size of the chunks streamed through the ciphers and hashers.
pub const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("PGP error: {0}")]
    Pgp(#[from] ::pgp::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Read into `buf` until it is full or the reader is exhausted.
///
/// Returns the number of bytes read; `0` means end of stream.
pub(crate) fn read_chunk(
    reader: &mut dyn Read,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<usize> {
    if cancel.is_cancelled() {
        return Err(CryptoError::Cancelled);
    }

    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
