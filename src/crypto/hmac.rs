// src/crypto/hmac.rs

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Sha256, Sha384, Sha512};
use tokio_util::sync::CancellationToken;

use super::{CHUNK_SIZE, CryptoError, Result, read_chunk};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

impl fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HmacAlgorithm::Sha256 => f.write_str("HMAC-SHA256"),
            HmacAlgorithm::Sha384 => f.write_str("HMAC-SHA384"),
            HmacAlgorithm::Sha512 => f.write_str("HMAC-SHA512"),
            HmacAlgorithm::Md5 => f.write_str("HMAC-MD5"),
        }
    }
}

impl FromStr for HmacAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("HMAC-").unwrap_or(&upper) {
            "SHA256" => Ok(HmacAlgorithm::Sha256),
            "SHA384" => Ok(HmacAlgorithm::Sha384),
            "SHA512" => Ok(HmacAlgorithm::Sha512),
            "MD5" => Ok(HmacAlgorithm::Md5),
            _ => Err(format!("invalid HMAC signature algorithm '{}'", s)),
        }
    }
}

fn digest_stream<M>(key: &[u8], reader: &mut dyn Read, cancel: &CancellationToken) -> Result<M>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("invalid HMAC key length".to_string()))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = read_chunk(reader, &mut buf, cancel)?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }
    Ok(mac)
}

/// Compute the raw HMAC of everything `reader` yields.
pub fn sign_stream(
    algorithm: HmacAlgorithm,
    key: &[u8],
    reader: &mut dyn Read,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let sig = match algorithm {
        HmacAlgorithm::Sha256 => digest_stream::<Hmac<Sha256>>(key, reader, cancel)?
            .finalize()
            .into_bytes()
            .to_vec(),
        HmacAlgorithm::Sha384 => digest_stream::<Hmac<Sha384>>(key, reader, cancel)?
            .finalize()
            .into_bytes()
            .to_vec(),
        HmacAlgorithm::Sha512 => digest_stream::<Hmac<Sha512>>(key, reader, cancel)?
            .finalize()
            .into_bytes()
            .to_vec(),
        HmacAlgorithm::Md5 => digest_stream::<Hmac<Md5>>(key, reader, cancel)?
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Ok(sig)
}

/// Check `signature` against the HMAC of `reader`, in constant time.
pub fn verify_stream(
    algorithm: HmacAlgorithm,
    key: &[u8],
    reader: &mut dyn Read,
    signature: &[u8],
    cancel: &CancellationToken,
) -> Result<()> {
    let checked = match algorithm {
        HmacAlgorithm::Sha256 => {
            digest_stream::<Hmac<Sha256>>(key, reader, cancel)?.verify_slice(signature)
        }
        HmacAlgorithm::Sha384 => {
            digest_stream::<Hmac<Sha384>>(key, reader, cancel)?.verify_slice(signature)
        }
        HmacAlgorithm::Sha512 => {
            digest_stream::<Hmac<Sha512>>(key, reader, cancel)?.verify_slice(signature)
        }
        HmacAlgorithm::Md5 => {
            digest_stream::<Hmac<Md5>>(key, reader, cancel)?.verify_slice(signature)
        }
    };
    checked.map_err(|_| {
        CryptoError::VerificationFailed(format!("{} signature does not match", algorithm))
    })
}
