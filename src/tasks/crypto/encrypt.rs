// src/tasks/crypto/encrypt.rs

use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::crypto::aes::{self, AesMode};
use crate::crypto::pgp::{self as openpgp, PgpKey};
use crate::store::Store;
use crate::tasks::args::de;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError};

use super::{Transform, decrypted_path, encrypted_path, load_key, public_pgp, read_all, transform_file, write_all};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Method {
    Aes(AesMode),
    Pgp,
}

impl FromStr for Method {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(TaskError::bad_args("missing encryption method"));
        }
        if s.trim().eq_ignore_ascii_case("PGP") {
            return Ok(Method::Pgp);
        }
        s.parse::<AesMode>()
            .map(Method::Aes)
            .map_err(|_| TaskError::bad_args(format!("unknown encryption method {:?}", s)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptArgs {
    #[serde(default)]
    method: String,
    #[serde(default)]
    key_name: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    keep_original: bool,
    #[serde(default)]
    output_file: String,
}

impl CryptArgs {
    fn parse(args: &TaskArgs) -> Result<(Self, Method), TaskError> {
        let raw: CryptArgs = args.decode()?;
        let method = raw.method.parse()?;
        if raw.key_name.trim().is_empty() {
            return Err(TaskError::bad_args("missing encryption key name"));
        }
        Ok((raw, method))
    }
}

#[derive(Debug, Clone)]
enum Encrypter {
    Aes(AesMode, Vec<u8>),
    Pgp(PgpKey),
}

impl Encrypter {
    fn into_transform(self) -> Transform {
        match self {
            Encrypter::Aes(mode, key) => Box::new(move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                aes::encrypt_stream(mode, &key, r, w, cancel).map(|_| ())
            }),
            Encrypter::Pgp(key) => Box::new(move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                let data = read_all(r, cancel)?;
                let armored = openpgp::encrypt(&key, &data)?;
                write_all(w, &armored, cancel)
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Decrypter {
    Aes(AesMode, Vec<u8>),
    Pgp(pgp::SignedSecretKey),
}

impl Decrypter {
    fn into_transform(self) -> Transform {
        match self {
            Decrypter::Aes(mode, key) => Box::new(move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                aes::decrypt_stream(mode, &key, r, w, cancel).map(|_| ())
            }),
            Decrypter::Pgp(key) => Box::new(move |r: &mut dyn Read, w: &mut dyn Write, cancel: &CancellationToken| {
                let data = read_all(r, cancel)?;
                let plain = openpgp::decrypt(&key, &data)?;
                write_all(w, &plain, cancel)
            }),
        }
    }
}

/// Encrypts the transfer file with AES (CFB, CTR or OFB) or PGP.
#[derive(Debug, Default)]
pub struct EncryptTask {
    encrypter: Option<Encrypter>,
}

#[async_trait]
impl Task for EncryptTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        CryptArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let (raw, method) = CryptArgs::parse(args)?;
        let key = load_key(store, &raw.key_name, "encryption")?;
        self.encrypter = Some(match method {
            Method::Aes(mode) => Encrypter::Aes(mode, key.aes_key()?),
            Method::Pgp => Encrypter::Pgp(public_pgp(&key)?),
        });
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.encrypter.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (raw, method) = CryptArgs::parse(cx.args)?;
        let Some(encrypter) = self.encrypter.take() else {
            return Err(TaskError::bad_args("encryption key was not loaded"));
        };

        let src = cx.transfer.file().to_path_buf();
        let dst = encrypted_path(&src, &raw.output_file);
        let size = transform_file(
            Arc::clone(&cx.fs),
            cx.cancel.clone(),
            src.clone(),
            dst.clone(),
            raw.keep_original,
            "file encryption",
            encrypter.into_transform(),
        )
        .await?;

        info!(from = ?src, to = ?dst, method = ?method, "file encrypted");
        cx.transfer.transfer.local_path = dst;
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}

/// Reverses [`EncryptTask`].
#[derive(Debug, Default)]
pub struct DecryptTask {
    decrypter: Option<Decrypter>,
}

#[async_trait]
impl Task for DecryptTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        CryptArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let (raw, method) = CryptArgs::parse(args)?;
        let key = load_key(store, &raw.key_name, "decryption")?;
        self.decrypter = Some(match method {
            Method::Aes(mode) => Decrypter::Aes(mode, key.aes_key()?),
            Method::Pgp => Decrypter::Pgp(key.pgp_secret_key()?),
        });
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.decrypter.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (raw, method) = CryptArgs::parse(cx.args)?;
        let Some(decrypter) = self.decrypter.take() else {
            return Err(TaskError::bad_args("decryption key was not loaded"));
        };

        let src = cx.transfer.file().to_path_buf();
        let dst = decrypted_path(&src, &raw.output_file);
        let size = transform_file(
            Arc::clone(&cx.fs),
            cx.cancel.clone(),
            src.clone(),
            dst.clone(),
            raw.keep_original,
            "file decryption",
            decrypter.into_transform(),
        )
        .await?;

        info!(from = ?src, to = ?dst, method = ?method, "file decrypted");
        cx.transfer.transfer.local_path = dst;
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}
