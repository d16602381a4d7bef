// src/crypto/pgp.rs

//! OpenPGP operations on in-memory buffers.
//!
//! Output is always ASCII-armored. Input may be armored or binary.

use std::io::Cursor;

use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::PublicKeyTrait;
use pgp::{
    ArmorOptions, Deserializable, Message, SignedPublicKey, SignedSecretKey, StandaloneSignature,
};
use rand::thread_rng;

use super::{CryptoError, Result};

const ARMOR_PREFIX: &[u8] = b"-----BEGIN";

/// A parsed PGP key. Secret keys can also be used wherever a public key is
/// needed.
#[derive(Debug, Clone)]
pub enum PgpKey {
    Public(SignedPublicKey),
    Secret(SignedSecretKey),
}

impl PgpKey {
    /// Parse an armored key, trying the secret form first.
    pub fn parse(armored: &str) -> Result<Self> {
        if let Ok(secret) = parse_secret_key(armored) {
            return Ok(PgpKey::Secret(secret));
        }
        let (key, _) = SignedPublicKey::from_string(armored)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid PGP key: {}", e)))?;
        Ok(PgpKey::Public(key))
    }

    pub fn secret(&self) -> Option<&SignedSecretKey> {
        match self {
            PgpKey::Secret(key) => Some(key),
            PgpKey::Public(_) => None,
        }
    }

    fn encrypt_message(&self, msg: &Message) -> Result<Message> {
        let mut rng = thread_rng();
        let alg = SymmetricKeyAlgorithm::AES128;
        let encrypted = match self {
            PgpKey::Public(key) => {
                match key.public_subkeys.iter().find(|sub| sub.is_encryption_key()) {
                    Some(sub) => msg.encrypt_to_keys_seipdv1(&mut rng, alg, &[sub])?,
                    None => msg.encrypt_to_keys_seipdv1(&mut rng, alg, &[key])?,
                }
            }
            PgpKey::Secret(key) => {
                match key.secret_subkeys.iter().find(|sub| sub.is_encryption_key()) {
                    Some(sub) => msg.encrypt_to_keys_seipdv1(&mut rng, alg, &[sub])?,
                    None => msg.encrypt_to_keys_seipdv1(&mut rng, alg, &[key])?,
                }
            }
        };
        Ok(encrypted)
    }

    fn verify_signature(&self, sig: &StandaloneSignature, data: &[u8]) -> bool {
        match self {
            PgpKey::Public(key) => {
                sig.verify(key, data).is_ok()
                    || key.public_subkeys.iter().any(|sub| sig.verify(sub, data).is_ok())
            }
            PgpKey::Secret(key) => {
                sig.verify(key, data).is_ok()
                    || key.secret_subkeys.iter().any(|sub| sig.verify(sub, data).is_ok())
            }
        }
    }

    fn verify_message(&self, msg: &Message) -> bool {
        match self {
            PgpKey::Public(key) => {
                msg.verify(key).is_ok()
                    || key.public_subkeys.iter().any(|sub| msg.verify(sub).is_ok())
            }
            PgpKey::Secret(key) => {
                msg.verify(key).is_ok()
                    || key.secret_subkeys.iter().any(|sub| msg.verify(sub).is_ok())
            }
        }
    }
}

/// Parse an armored secret key.
pub fn parse_secret_key(armored: &str) -> Result<SignedSecretKey> {
    let (key, _) = SignedSecretKey::from_string(armored)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid PGP private key: {}", e)))?;
    Ok(key)
}

fn read_message(input: &[u8]) -> Result<Message> {
    let trimmed = input.trim_ascii_start();
    if trimmed.starts_with(ARMOR_PREFIX) {
        let text = std::str::from_utf8(trimmed)
            .map_err(|_| CryptoError::Malformed("armored PGP message is not UTF-8".to_string()))?;
        let (msg, _) = Message::from_string(text)?;
        Ok(msg)
    } else {
        Ok(Message::from_bytes(Cursor::new(input))?)
    }
}

fn open_message(msg: Message, key: &SignedSecretKey) -> Result<Message> {
    let (decrypted, _) = msg.decrypt(String::new, &[key])?;
    if matches!(decrypted, Message::Compressed(_)) {
        Ok(decrypted.decompress()?)
    } else {
        Ok(decrypted)
    }
}

fn content_of(msg: &Message) -> Result<Vec<u8>> {
    msg.get_content()?
        .ok_or_else(|| CryptoError::Malformed("PGP message has no literal content".to_string()))
}

fn sign_message(msg: Message, key: &SignedSecretKey) -> Result<Message> {
    let mut rng = thread_rng();
    Ok(msg.sign(&mut rng, key, String::new, HashAlgorithm::SHA2_256)?)
}

/// Encrypt `data` for `key`, returning an armored message.
pub fn encrypt(key: &PgpKey, data: &[u8]) -> Result<Vec<u8>> {
    let msg = Message::new_literal_bytes("", data);
    let encrypted = key.encrypt_message(&msg)?;
    Ok(encrypted.to_armored_string(ArmorOptions::default())?.into_bytes())
}

/// Decrypt an armored or binary message with a secret key.
pub fn decrypt(key: &SignedSecretKey, input: &[u8]) -> Result<Vec<u8>> {
    let msg = open_message(read_message(input)?, key)?;
    content_of(&msg)
}

/// Produce an armored detached signature of `data`.
pub fn sign_detached(key: &SignedSecretKey, data: &[u8]) -> Result<Vec<u8>> {
    let signed = sign_message(Message::new_literal_bytes("", data), key)?;
    let Message::Signed { signature, .. } = signed else {
        return Err(CryptoError::Malformed(
            "signing did not produce a signature packet".to_string(),
        ));
    };
    let standalone = StandaloneSignature::new(signature);
    Ok(standalone.to_armored_string(ArmorOptions::default())?.into_bytes())
}

/// Check a detached signature against `data`.
pub fn verify_detached(key: &PgpKey, data: &[u8], signature: &[u8]) -> Result<()> {
    let text = std::str::from_utf8(signature)
        .map_err(|_| CryptoError::Malformed("PGP signature is not armored text".to_string()))?;
    let (sig, _) = StandaloneSignature::from_string(text)
        .map_err(|e| CryptoError::Malformed(format!("invalid PGP signature: {}", e)))?;

    if key.verify_signature(&sig, data) {
        Ok(())
    } else {
        Err(CryptoError::VerificationFailed(
            "PGP signature does not match".to_string(),
        ))
    }
}

/// Sign with `signer`, then encrypt for `recipient`, in one armored message.
pub fn sign_and_encrypt(
    signer: &SignedSecretKey,
    recipient: &PgpKey,
    data: &[u8],
) -> Result<Vec<u8>> {
    let signed = sign_message(Message::new_literal_bytes("", data), signer)?;
    let encrypted = recipient.encrypt_message(&signed)?;
    Ok(encrypted.to_armored_string(ArmorOptions::default())?.into_bytes())
}

/// Decrypt with `key`, then check the embedded signature against `signer`.
pub fn decrypt_and_verify(key: &SignedSecretKey, signer: &PgpKey, input: &[u8]) -> Result<Vec<u8>> {
    let msg = open_message(read_message(input)?, key)?;
    if !matches!(msg, Message::Signed { .. }) {
        return Err(CryptoError::VerificationFailed(
            "PGP message is not signed".to_string(),
        ));
    }
    if !signer.verify_message(&msg) {
        return Err(CryptoError::VerificationFailed(
            "PGP signature does not match".to_string(),
        ));
    }
    content_of(&msg)
}
