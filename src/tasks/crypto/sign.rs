// src/tasks/crypto/sign.rs

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::crypto::hmac::{self, HmacAlgorithm};
use crate::crypto::pgp::{self as openpgp, PgpKey};
use crate::store::Store;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking};

use super::{load_key, public_pgp, same_file, signature_path};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Method {
    Hmac(HmacAlgorithm),
    Pgp,
}

impl FromStr for Method {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(TaskError::bad_args("missing signature method"));
        }
        if s.trim().eq_ignore_ascii_case("PGP") {
            return Ok(Method::Pgp);
        }
        if !s.trim().to_ascii_uppercase().starts_with("HMAC-") {
            return Err(TaskError::bad_args(format!("unknown signature method {:?}", s)));
        }
        s.parse::<HmacAlgorithm>()
            .map(Method::Hmac)
            .map_err(TaskError::bad_args)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignArgs {
    #[serde(default)]
    method: String,
    #[serde(default)]
    key_name: String,
    /// Where SIGN writes the signature.
    #[serde(default)]
    output_file: String,
    /// Where VERIFY reads it from.
    #[serde(default)]
    signature_file: String,
}

impl SignArgs {
    fn parse(args: &TaskArgs) -> Result<(Self, Method), TaskError> {
        let raw: SignArgs = args.decode()?;
        let method = raw.method.parse()?;
        if raw.key_name.trim().is_empty() {
            return Err(TaskError::bad_args("missing signature key name"));
        }
        Ok((raw, method))
    }
}

#[derive(Debug, Clone)]
enum Signer {
    Hmac(HmacAlgorithm, Vec<u8>),
    Pgp(pgp::SignedSecretKey),
}

#[derive(Debug, Clone)]
enum Verifier {
    Hmac(HmacAlgorithm, Vec<u8>),
    Pgp(PgpKey),
}

/// Writes a detached signature of the transfer file.
#[derive(Debug, Default)]
pub struct SignTask {
    signer: Option<Signer>,
}

#[async_trait]
impl Task for SignTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        SignArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let (raw, method) = SignArgs::parse(args)?;
        let key = load_key(store, &raw.key_name, "signature")?;
        self.signer = Some(match method {
            Method::Hmac(algo) => Signer::Hmac(algo, key.hmac_key()?),
            Method::Pgp => Signer::Pgp(key.pgp_secret_key()?),
        });
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.signer.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (raw, method) = SignArgs::parse(cx.args)?;
        let Some(signer) = self.signer.take() else {
            return Err(TaskError::bad_args("signature key was not loaded"));
        };

        let file = cx.transfer.file().to_path_buf();
        let sig_path = signature_path(&file, &raw.output_file);
        if same_file(&file, &sig_path) {
            return Err(TaskError::bad_args(format!(
                "signature file {:?} is the file to sign",
                sig_path
            )));
        }
        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let target: PathBuf = sig_path.clone();

        blocking(move || {
            let signature = match signer {
                Signer::Hmac(algo, key) => {
                    let mut reader = fs.open_read(&file).context("cannot open file to sign")?;
                    hmac::sign_stream(algo, &key, &mut reader, &cancel)
                        .map_err(|e| TaskError::from_crypto(e, "file signature"))?
                }
                Signer::Pgp(key) => {
                    if cancel.is_cancelled() {
                        return Err(TaskError::Cancelled("file signature".to_string()));
                    }
                    let data = fs.read(&file)?;
                    openpgp::sign_detached(&key, &data)
                        .map_err(|e| TaskError::from_crypto(e, "file signature"))?
                }
            };
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs.create_dir_all(parent)?;
            }
            fs.write(&target, &signature)?;
            Ok(())
        })
        .await?;

        info!(file = ?cx.transfer.file(), signature = ?sig_path, method = ?method, "file signed");
        Ok(())
    }
}

/// Checks the transfer file against a detached signature.
#[derive(Debug, Default)]
pub struct VerifyTask {
    verifier: Option<Verifier>,
}

#[async_trait]
impl Task for VerifyTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        SignArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let (raw, method) = SignArgs::parse(args)?;
        let key = load_key(store, &raw.key_name, "verification")?;
        self.verifier = Some(match method {
            Method::Hmac(algo) => Verifier::Hmac(algo, key.hmac_key()?),
            Method::Pgp => Verifier::Pgp(public_pgp(&key)?),
        });
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.verifier.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (raw, method) = SignArgs::parse(cx.args)?;
        let Some(verifier) = self.verifier.take() else {
            return Err(TaskError::bad_args("verification key was not loaded"));
        };

        let file = cx.transfer.file().to_path_buf();
        let sig_path = signature_path(&file, &raw.signature_file);
        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let source = sig_path.clone();

        blocking(move || {
            if !fs.is_file(&source) {
                return Err(TaskError::NotFound(format!("signature file {:?}", source)));
            }
            let signature = fs.read(&source)?;
            let verified = match verifier {
                Verifier::Hmac(algo, key) => {
                    let mut reader = fs.open_read(&file).context("cannot open file to verify")?;
                    hmac::verify_stream(algo, &key, &mut reader, &signature, &cancel)
                }
                Verifier::Pgp(key) => {
                    if cancel.is_cancelled() {
                        return Err(TaskError::Cancelled("signature verification".to_string()));
                    }
                    let data = fs.read(&file)?;
                    openpgp::verify_detached(&key, &data, &signature)
                }
            };
            verified.map_err(|e| TaskError::from_crypto(e, "signature verification"))
        })
        .await?;

        info!(file = ?cx.transfer.file(), signature = ?sig_path, method = ?method, "signature verified");
        Ok(())
    }
}
