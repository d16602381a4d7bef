// src/crypto/aes.rs

//! AES stream encryption.
//!
//! The cipher (AES-128/192/256) is picked from the key length. A random
//! 16-byte IV is generated for every encryption and written in front of the
//! ciphertext; decryption reads it back from the same position.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use aes::cipher::{BlockCipher, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio_util::sync::CancellationToken;

use super::{CHUNK_SIZE, CryptoError, Result, read_chunk};

pub const IV_LEN: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AesMode {
    Cfb,
    Ctr,
    Ofb,
}

impl fmt::Display for AesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AesMode::Cfb => f.write_str("AES-CFB"),
            AesMode::Ctr => f.write_str("AES-CTR"),
            AesMode::Ofb => f.write_str("AES-OFB"),
        }
    }
}

impl FromStr for AesMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AES-CFB" | "CFB" => Ok(AesMode::Cfb),
            "AES-CTR" | "CTR" => Ok(AesMode::Ctr),
            "AES-OFB" | "OFB" => Ok(AesMode::Ofb),
            other => Err(format!("unknown AES mode '{}'", other)),
        }
    }
}

/// Check that `key` is a valid AES-128, AES-192 or AES-256 key.
pub fn check_key(key: &[u8]) -> Result<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        _ => Err(CryptoError::InvalidKey(
            "AES keys must be 16, 24, or 32 bytes long".to_string(),
        )),
    }
}

/// In-place keystream transform applied chunk by chunk.
trait ChunkCipher: Send {
    fn apply(&mut self, buf: &mut [u8]);
}

struct Keystream<S>(S);

impl<S: StreamCipher + Send> ChunkCipher for Keystream<S> {
    fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

struct CfbEncrypt<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufEncryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> ChunkCipher for CfbEncrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) {
        self.0.encrypt(buf);
    }
}

struct CfbDecrypt<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufDecryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> ChunkCipher for CfbDecrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) {
        self.0.decrypt(buf);
    }
}

fn invalid_length(_: aes::cipher::InvalidLength) -> CryptoError {
    CryptoError::InvalidKey("AES keys must be 16, 24, or 32 bytes long".to_string())
}

macro_rules! build_cipher {
    ($aes:ty, $mode:expr, $key:expr, $iv:expr, $encrypt:expr) => {{
        let cipher: Box<dyn ChunkCipher> = match ($mode, $encrypt) {
            (AesMode::Ctr, _) => Box::new(Keystream(
                ctr::Ctr128BE::<$aes>::new_from_slices($key, $iv).map_err(invalid_length)?,
            )),
            (AesMode::Ofb, _) => Box::new(Keystream(
                ofb::Ofb::<$aes>::new_from_slices($key, $iv).map_err(invalid_length)?,
            )),
            (AesMode::Cfb, true) => Box::new(CfbEncrypt(
                cfb_mode::BufEncryptor::<$aes>::new_from_slices($key, $iv)
                    .map_err(invalid_length)?,
            )),
            (AesMode::Cfb, false) => Box::new(CfbDecrypt(
                cfb_mode::BufDecryptor::<$aes>::new_from_slices($key, $iv)
                    .map_err(invalid_length)?,
            )),
        };
        cipher
    }};
}

fn new_cipher(mode: AesMode, key: &[u8], iv: &[u8], encrypt: bool) -> Result<Box<dyn ChunkCipher>> {
    check_key(key)?;
    let cipher = match key.len() {
        16 => build_cipher!(Aes128, mode, key, iv, encrypt),
        24 => build_cipher!(Aes192, mode, key, iv, encrypt),
        _ => build_cipher!(Aes256, mode, key, iv, encrypt),
    };
    Ok(cipher)
}

fn apply_stream(
    mut cipher: Box<dyn ChunkCipher>,
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf, cancel)?;
        if n == 0 {
            break;
        }
        cipher.apply(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Encrypt `reader` into `writer`, IV first. Returns the number of bytes
/// written, IV included.
pub fn encrypt_stream(
    mode: AesMode,
    key: &[u8],
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = new_cipher(mode, key, &iv, true)?;
    writer.write_all(&iv)?;
    let written = apply_stream(cipher, reader, writer, cancel)?;
    Ok(written + IV_LEN as u64)
}

/// Decrypt a stream produced by [`encrypt_stream`]. Returns the number of
/// plaintext bytes written.
pub fn decrypt_stream(
    mode: AesMode,
    key: &[u8],
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut iv = [0u8; IV_LEN];
    if read_chunk(reader, &mut iv, cancel)? != IV_LEN {
        return Err(CryptoError::Malformed(
            "encrypted stream is shorter than its IV".to_string(),
        ));
    }

    let cipher = new_cipher(mode, key, &iv, false)?;
    apply_stream(cipher, reader, writer, cancel)
}
