// src/tasks/transcode/mod.rs

//! TRANSCODE: re-encode the transfer file from one charset to another.

mod charsets;
mod ebcdic;

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking, rewrite_in_place};

pub use charsets::{NamedCharset, TextDecoder, TextEncoder, lookup, names};

const CHUNK: usize = 32 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscodeArgs {
    #[serde(default)]
    from_charset: String,
    #[serde(default)]
    to_charset: String,
}

fn parse(args: &TaskArgs) -> Result<(NamedCharset, NamedCharset), TaskError> {
    let raw: TranscodeArgs = args.decode()?;
    if raw.from_charset.trim().is_empty() {
        return Err(TaskError::bad_args("missing source encoding"));
    }
    if raw.to_charset.trim().is_empty() {
        return Err(TaskError::bad_args("missing destination encoding"));
    }
    let from = lookup(&raw.from_charset)?;
    let to = lookup(&raw.to_charset)?;
    if from == to {
        return Err(TaskError::IdenticalCharsets);
    }
    Ok((from, to))
}

/// Stream `reader` into `writer`, decoding with `from` and encoding with `to`.
pub fn transcode(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    from: NamedCharset,
    to: NamedCharset,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), TaskError> {
    let mut decoder = TextDecoder::new(from);
    let mut encoder = TextEncoder::new(to);
    let mut buf = vec![0u8; CHUNK];
    let mut text = String::with_capacity(CHUNK);
    let mut out = Vec::with_capacity(CHUNK);

    loop {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled("transcoding".to_string()));
        }
        let n = reader.read(&mut buf)?;
        let last = n == 0;
        text.clear();
        out.clear();
        decoder.decode(&buf[..n], last, &mut text)?;
        encoder.encode(&text, last, &mut out)?;
        writer.write_all(&out)?;
        if last {
            return Ok(());
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscodeTask;

#[async_trait]
impl Task for TranscodeTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        parse(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let (from, to) = parse(cx.args)?;
        let path = cx.transfer.file().to_path_buf();
        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let target = path.clone();

        let size = blocking(move || {
            rewrite_in_place(fs.as_ref(), &target, |r, w| {
                transcode(r, w, from, to, &cancel)
            })
        })
        .await?;

        info!(file = ?path, from = %from, to = %to, size, "file transcoded");
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}
