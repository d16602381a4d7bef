// src/tasks/icap/mod.rs

//! ICAP: submit the transfer file to a content-inspection server.
//!
//! Send rules use REQMOD (the file travels as an HTTP request to the
//! partner), receive rules use RESPMOD. `204` means the file is clean; a
//! `200` carrying a body replaces the file when modifications are allowed.

mod client;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::fs;
use crate::tasks::args::de;
use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking};

pub use client::{IcapClient, IcapError, IcapResponse, IcapUrl, Method, ModRequest};

const OPERATION: &str = "ICAP request";

#[derive(Debug, Clone, PartialEq, Eq)]
enum OnError {
    Nothing,
    Delete,
    Move(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIcapArgs {
    #[serde(default, rename = "uploadURL")]
    upload_url: String,
    #[serde(default, deserialize_with = "de::quoted_duration")]
    timeout: Duration,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    allow_file_modifications: bool,
    #[serde(default)]
    on_error: String,
    #[serde(default)]
    on_error_move_path: String,
}

#[derive(Debug, Clone)]
struct IcapArgs {
    url: IcapUrl,
    timeout: Option<Duration>,
    allow_modifications: bool,
    on_error: OnError,
}

impl IcapArgs {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: RawIcapArgs = args.decode()?;
        let mut upload = raw.upload_url.trim().to_string();
        if upload.is_empty() {
            return Err(TaskError::bad_args("ICAP upload URL is missing"));
        }
        if !upload.starts_with("icap://") {
            upload = format!("icap://{}", upload);
        }
        let url = IcapUrl::parse(&upload).map_err(|e| TaskError::bad_args(e.to_string()))?;

        let on_error = match raw.on_error.trim() {
            "" => OnError::Nothing,
            "delete" => OnError::Delete,
            "move" if raw.on_error_move_path.trim().is_empty() => {
                return Err(TaskError::bad_args("ICAP error move path is missing"));
            }
            "move" => OnError::Move(PathBuf::from(raw.on_error_move_path.trim())),
            other => {
                return Err(TaskError::bad_args(format!(
                    "invalid ICAP error action {:?} (must be \"delete\" or \"move\")",
                    other
                )));
            }
        };

        Ok(Self {
            url,
            timeout: Some(raw.timeout).filter(|t| !t.is_zero()),
            allow_modifications: raw.allow_file_modifications,
            on_error,
        })
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Whether a comma-separated extension list from an OPTIONS header names
/// `ext` (or `*`).
fn lists_extension(header: Option<&str>, ext: &str) -> bool {
    header.is_some_and(|list| {
        list.split(',')
            .map(|e| e.trim().trim_start_matches('.'))
            .any(|e| e == "*" || e.eq_ignore_ascii_case(ext))
    })
}

/// Preview size announced by the server for this file, or `None` when the
/// file must be sent whole. A refused extension is an error.
fn preview_for(options: &IcapResponse, path: &Path) -> Result<Option<usize>, TaskError> {
    let ext = extension(path);
    if lists_extension(options.header("Transfer-Ignore"), &ext) {
        return Err(TaskError::Other(anyhow::anyhow!(
            "ICAP server refused file extension {:?}",
            ext
        )));
    }
    if lists_extension(options.header("Transfer-Complete"), &ext) {
        return Ok(None);
    }
    if lists_extension(options.header("Transfer-Preview"), &ext) {
        return Ok(options.header("Preview").and_then(|p| p.trim().parse().ok()));
    }
    Ok(None)
}

/// Run `fut` under the optional deadline, stopping early on cancellation.
async fn bounded<T>(
    fut: impl Future<Output = Result<T, IcapError>>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, TaskError> {
    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled(OPERATION.to_string())),
        _ = deadline => Err(TaskError::Timeout(OPERATION.to_string())),
        result = fut => result.map_err(|e| TaskError::Other(anyhow::Error::new(e))),
    }
}

#[derive(Debug, Default)]
pub struct IcapTask;

impl IcapTask {
    async fn scan(
        &self,
        cx: &mut RunContext<'_>,
        args: &IcapArgs,
        client: &IcapClient,
        preview: Option<usize>,
    ) -> Result<(), TaskError> {
        let path = cx.transfer.file().to_path_buf();
        let fs = Arc::clone(&cx.fs);
        let content = blocking(move || Ok(fs.read(&path)?)).await?;

        let (method, origin) = if cx.transfer.rule.is_send() {
            let origin = cx
                .transfer
                .remote_agent
                .as_ref()
                .map(|a| a.address.clone())
                .or_else(|| cx.transfer.local_agent.as_ref().map(|a| a.address.clone()))
                .unwrap_or_default();
            (Method::Reqmod, origin)
        } else {
            (Method::Respmod, String::new())
        };

        let request = ModRequest {
            method,
            content: &content,
            origin: &origin,
            preview,
        };
        let response = bounded(client.modify(request), args.timeout, &cx.cancel).await?;
        debug!(status = response.status, reason = %response.reason, "ICAP response");

        match response.status {
            204 => Ok(()),
            200..=299 => {
                let body = response.body.filter(|b| !b.is_empty());
                match body {
                    Some(body) if args.allow_modifications => {
                        let path = cx.transfer.file().to_path_buf();
                        let fs = Arc::clone(&cx.fs);
                        let len = body.len();
                        blocking(move || Ok(fs.write(&path, &body)?)).await?;
                        info!(file = ?cx.transfer.file(), size = len, "file replaced by ICAP server");
                        cx.transfer.transfer.filesize = len as i64;
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
            status => Err(TaskError::Other(anyhow::anyhow!(
                "ICAP server returned an unexpected response code: {} {}",
                status,
                response.reason
            ))),
        }
    }

    async fn apply_on_error(&self, cx: &RunContext<'_>, action: &OnError) {
        let path = cx.transfer.file().to_path_buf();
        let fs = Arc::clone(&cx.fs);
        let action = action.clone();
        let done = blocking(move || {
            match action {
                OnError::Nothing => {}
                OnError::Delete => fs.remove_file(&path)?,
                OnError::Move(dir) => {
                    let name = path.file_name().map(PathBuf::from).unwrap_or_default();
                    fs::move_file(fs.as_ref(), &path, &dir.join(name))?;
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = done {
            error!(error = %e, "failed to apply ICAP error action");
        }
    }
}

#[async_trait]
impl Task for IcapTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        IcapArgs::parse(args).map(|_| ())
    }

    async fn run(&mut self, mut cx: RunContext<'_>) -> Result<(), TaskError> {
        let args = IcapArgs::parse(cx.args)?;
        let client = IcapClient::new(args.url.clone());

        let options = bounded(client.options(), args.timeout, &cx.cancel).await?;
        let preview = preview_for(&options, cx.transfer.file())?;

        let result = self.scan(&mut cx, &args, &client, preview).await;
        if let Err(ref e) = result {
            error!(url = %args.url, error = %e, "ICAP scan failed");
            self.apply_on_error(&cx, &args.on_error).await;
        } else {
            info!(url = %args.url, file = ?cx.transfer.file(), "file accepted by ICAP server");
        }
        result
    }
}
