// src/tasks/crypto/combined.rs

//! One-pass PGP sign-then-encrypt and decrypt-then-verify.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::crypto::pgp::{self as openpgp, PgpKey};
use crate::store::Store;
use crate::tasks::args::de;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError};

use super::{decrypted_path, encrypted_path, load_key, public_pgp, read_all, transform_file, write_all};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptSignArgs {
    #[serde(default, rename = "encryptionPGPKeyName")]
    encryption_key: String,
    #[serde(default, rename = "signaturePGPKeyName")]
    signature_key: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    keep_original: bool,
    #[serde(default)]
    output_file: String,
}

impl EncryptSignArgs {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: EncryptSignArgs = args.decode()?;
        if raw.encryption_key.trim().is_empty() {
            return Err(TaskError::bad_args("missing PGP encryption key"));
        }
        if raw.signature_key.trim().is_empty() {
            return Err(TaskError::bad_args("missing PGP signature key"));
        }
        Ok(raw)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptVerifyArgs {
    #[serde(default, rename = "decryptionPGPKeyName")]
    decryption_key: String,
    #[serde(default, rename = "verificationPGPKeyName")]
    verification_key: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    keep_original: bool,
    #[serde(default)]
    output_file: String,
}

impl DecryptVerifyArgs {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: DecryptVerifyArgs = args.decode()?;
        if raw.decryption_key.trim().is_empty() {
            return Err(TaskError::bad_args("missing PGP decryption key"));
        }
        if raw.verification_key.trim().is_empty() {
            return Err(TaskError::bad_args("missing PGP verification key"));
        }
        Ok(raw)
    }
}

/// Signs the file with one PGP key and encrypts it for another.
#[derive(Debug, Default)]
pub struct EncryptSignTask {
    keys: Option<(PgpKey, pgp::SignedSecretKey)>,
}

#[async_trait]
impl Task for EncryptSignTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        EncryptSignArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let raw = EncryptSignArgs::parse(args)?;
        let recipient = public_pgp(&load_key(store, &raw.encryption_key, "PGP encryption")?)?;
        let signer = load_key(store, &raw.signature_key, "PGP signature")?.pgp_secret_key()?;
        self.keys = Some((recipient, signer));
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.keys.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let raw = EncryptSignArgs::parse(cx.args)?;
        let Some((recipient, signer)) = self.keys.take() else {
            return Err(TaskError::bad_args("PGP keys were not loaded"));
        };

        let src = cx.transfer.file().to_path_buf();
        let dst = encrypted_path(&src, &raw.output_file);
        let size = transform_file(
            Arc::clone(&cx.fs),
            cx.cancel.clone(),
            src.clone(),
            dst.clone(),
            raw.keep_original,
            "PGP encryption",
            Box::new(
                move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                    let data = read_all(r, cancel)?;
                    let message = openpgp::sign_and_encrypt(&signer, &recipient, &data)?;
                    write_all(w, &message, cancel)
                },
            ),
        )
        .await?;

        info!(from = ?src, to = ?dst, "file signed and encrypted");
        cx.transfer.transfer.local_path = dst;
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}

/// Decrypts a signed PGP message and checks its signature.
#[derive(Debug, Default)]
pub struct DecryptVerifyTask {
    keys: Option<(pgp::SignedSecretKey, PgpKey)>,
}

#[async_trait]
impl Task for DecryptVerifyTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        DecryptVerifyArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let raw = DecryptVerifyArgs::parse(args)?;
        let key = load_key(store, &raw.decryption_key, "PGP decryption")?.pgp_secret_key()?;
        let signer = public_pgp(&load_key(store, &raw.verification_key, "PGP verification")?)?;
        self.keys = Some((key, signer));
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.keys.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let raw = DecryptVerifyArgs::parse(cx.args)?;
        let Some((key, signer)) = self.keys.take() else {
            return Err(TaskError::bad_args("PGP keys were not loaded"));
        };

        let src = cx.transfer.file().to_path_buf();
        let dst = decrypted_path(&src, &raw.output_file);
        let size = transform_file(
            Arc::clone(&cx.fs),
            cx.cancel.clone(),
            src.clone(),
            dst.clone(),
            raw.keep_original,
            "PGP decryption",
            Box::new(
                move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                    let data = read_all(r, cancel)?;
                    let plain = openpgp::decrypt_and_verify(&key, &signer, &data)?;
                    write_all(w, &plain, cancel)
                },
            ),
        )
        .await?;

        info!(from = ?src, to = ?dst, "file decrypted and verified");
        cx.transfer.transfer.local_path = dst;
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}
