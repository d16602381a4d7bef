// src/model/crypto_key.rs

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;

use crate::crypto::pgp::{PgpKey, parse_secret_key};
use crate::crypto::{self, CryptoError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
pub enum CryptoKeyType {
    #[serde(rename = "AES")]
    Aes,
    #[serde(rename = "HMAC")]
    Hmac,
    #[serde(rename = "PGP-PUBLIC")]
    PgpPublic,
    #[serde(rename = "PGP-PRIVATE")]
    PgpPrivate,
}

impl CryptoKeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            CryptoKeyType::Aes => "AES",
            CryptoKeyType::Hmac => "HMAC",
            CryptoKeyType::PgpPublic => "PGP-PUBLIC",
            CryptoKeyType::PgpPrivate => "PGP-PRIVATE",
        }
    }

    pub fn is_pgp(self) -> bool {
        matches!(self, CryptoKeyType::PgpPublic | CryptoKeyType::PgpPrivate)
    }
}

impl fmt::Display for CryptoKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoKeyType {
    type Err = CryptoKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES" => Ok(CryptoKeyType::Aes),
            "HMAC" => Ok(CryptoKeyType::Hmac),
            "PGP-PUBLIC" => Ok(CryptoKeyType::PgpPublic),
            "PGP-PRIVATE" => Ok(CryptoKeyType::PgpPrivate),
            "" => Err(CryptoKeyError::MissingType),
            other => Err(CryptoKeyError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum CryptoKeyError {
    #[error("the cryptographic key's name is missing")]
    MissingName,

    #[error("the cryptographic key's type is missing")]
    MissingType,

    #[error("unknown cryptographic key type {0:?}")]
    UnknownType(String),

    #[error("the cryptographic key value is missing")]
    MissingValue,

    #[error("cryptographic key {name:?} is a {actual} key, not a {expected} key")]
    WrongType {
        name: String,
        actual: CryptoKeyType,
        expected: &'static str,
    },

    #[error("cryptographic key {name:?}: {source}")]
    Invalid {
        name: String,
        #[source]
        source: CryptoError,
    },
}

/// A named key stored by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CryptoKey {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: CryptoKeyType,

    /// Raw bytes for AES, base64 for HMAC, ASCII armor for PGP.
    pub key: String,
}

impl CryptoKey {
    pub fn new(name: impl Into<String>, kind: CryptoKeyType, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            key: key.into(),
        }
    }

    /// Check that the key is complete and its material usable for its type.
    pub fn validate(&self) -> Result<(), CryptoKeyError> {
        if self.name.trim().is_empty() {
            return Err(CryptoKeyError::MissingName);
        }
        if self.key.is_empty() {
            return Err(CryptoKeyError::MissingValue);
        }

        match self.kind {
            CryptoKeyType::Aes => self.aes_key().map(|_| ()),
            CryptoKeyType::Hmac => self.hmac_key().map(|_| ()),
            CryptoKeyType::PgpPublic => self.pgp_key().map(|_| ()),
            CryptoKeyType::PgpPrivate => self.pgp_secret_key().map(|_| ()),
        }
    }

    fn invalid(&self, source: CryptoError) -> CryptoKeyError {
        CryptoKeyError::Invalid {
            name: self.name.clone(),
            source,
        }
    }

    fn expect_kind(&self, accepted: &[CryptoKeyType], expected: &'static str) -> Result<(), CryptoKeyError> {
        if accepted.contains(&self.kind) {
            Ok(())
        } else {
            Err(CryptoKeyError::WrongType {
                name: self.name.clone(),
                actual: self.kind,
                expected,
            })
        }
    }

    pub fn aes_key(&self) -> Result<Vec<u8>, CryptoKeyError> {
        self.expect_kind(&[CryptoKeyType::Aes], "AES")?;
        let bytes = self.key.as_bytes().to_vec();
        crypto::aes::check_key(&bytes).map_err(|e| self.invalid(e))?;
        Ok(bytes)
    }

    pub fn hmac_key(&self) -> Result<Vec<u8>, CryptoKeyError> {
        self.expect_kind(&[CryptoKeyType::Hmac], "HMAC")?;
        BASE64
            .decode(self.key.trim())
            .map_err(|e| self.invalid(CryptoError::InvalidKey(format!("invalid base64: {}", e))))
    }

    /// Any PGP key, usable for encryption and verification.
    pub fn pgp_key(&self) -> Result<PgpKey, CryptoKeyError> {
        self.expect_kind(
            &[CryptoKeyType::PgpPublic, CryptoKeyType::PgpPrivate],
            "PGP",
        )?;
        PgpKey::parse(&self.key).map_err(|e| self.invalid(e))
    }

    /// A PGP key holding secret material, for decryption and signing.
    pub fn pgp_secret_key(&self) -> Result<pgp::SignedSecretKey, CryptoKeyError> {
        self.expect_kind(&[CryptoKeyType::PgpPrivate], "PGP-PRIVATE")?;
        parse_secret_key(&self.key).map_err(|e| self.invalid(e))
    }
}
