// src/tasks/chnewline.rs

//! CHNEWLINE: replace one line separator with another.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::tasks::{RunContext, Task, TaskArgs, TaskError, blocking, rewrite_in_place};

const CHUNK: usize = 32 * 1024;

#[derive(Debug, Deserialize)]
struct NewlineArgs {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
}

/// Decode `\n`, `\r`, `\t` and `\\`. Other backslashes are kept as is.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse(args: &TaskArgs) -> Result<(Vec<u8>, Vec<u8>), TaskError> {
    let raw: NewlineArgs = args.decode()?;
    let from = unescape(&raw.from);
    let to = unescape(&raw.to);
    if from.is_empty() {
        return Err(TaskError::bad_args("missing the separator to replace"));
    }
    if from == to {
        return Err(TaskError::bad_args("the old and new separators are identical"));
    }
    Ok((from.into_bytes(), to.into_bytes()))
}

/// Copy `reader` to `writer`, replacing every `from` with `to`. A separator
/// cut by a chunk boundary is still found.
pub fn replace_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    from: &[u8],
    to: &[u8],
    cancel: &CancellationToken,
) -> Result<u64, TaskError> {
    let mut buf = vec![0u8; CHUNK];
    let mut window: Vec<u8> = Vec::with_capacity(CHUNK + from.len());
    let mut replaced = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled("newline conversion".to_string()));
        }
        let n = reader.read(&mut buf)?;
        window.extend_from_slice(&buf[..n]);
        let last = n == 0;

        let mut start = 0;
        let mut i = 0;
        while i + from.len() <= window.len() {
            if window[i..].starts_with(from) {
                writer.write_all(&window[start..i])?;
                writer.write_all(to)?;
                replaced += 1;
                i += from.len();
                start = i;
            } else {
                i += 1;
            }
        }

        // Hold back a tail that could be the start of a separator.
        let keep = if last { 0 } else { (from.len() - 1).min(window.len() - start) };
        let flush_to = window.len() - keep;
        writer.write_all(&window[start..flush_to])?;
        window.drain(..flush_to);

        if last {
            return Ok(replaced);
        }
    }
}

#[derive(Debug, Default)]
pub struct ChNewlineTask;

#[async_trait]
impl Task for ChNewlineTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        parse(args).map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let (from, to) = parse(cx.args)?;
        let path = cx.transfer.file().to_path_buf();
        let fs = Arc::clone(&cx.fs);
        let cancel = cx.cancel.clone();
        let target = path.clone();

        let (size, replaced) = blocking(move || {
            let mut replaced = 0;
            let size = rewrite_in_place(fs.as_ref(), &target, |r, w| {
                replaced = replace_stream(r, w, &from, &to, &cancel)?;
                Ok(())
            })?;
            Ok((size, replaced))
        })
        .await?;

        info!(file = ?path, replaced, "line separators converted");
        cx.transfer.transfer.filesize = size as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(input: &[u8], from: &str, to: &str) -> Vec<u8> {
        let mut out = Vec::new();
        replace_stream(
            &mut &input[..],
            &mut out,
            from.as_bytes(),
            to.as_bytes(),
            &CancellationToken::new(),
        )
        .unwrap();
        out
    }

    #[test]
    fn unescapes_separators() {
        assert_eq!(unescape(r"\r\n"), "\r\n");
        assert_eq!(unescape(r"\t\\x\q"), "\t\\x\\q");
    }

    #[test]
    fn replaces_every_separator() {
        assert_eq!(convert(b"a\r\nb\r\n", "\r\n", "\n"), b"a\nb\n");
        assert_eq!(convert(b"a\nb", "\n", "\r\n"), b"a\r\nb");
        assert_eq!(convert(b"", "\n", "\r\n"), b"");
        assert_eq!(convert(b"\r\r\n", "\r\n", "|"), b"\r|");
    }

    #[test]
    fn separator_split_across_chunks() {
        let mut input = vec![b'x'; CHUNK - 1];
        input.extend_from_slice(b"\r\ny");
        let mut expected = vec![b'x'; CHUNK - 1];
        expected.extend_from_slice(b"\ny");
        assert_eq!(convert(&input, "\r\n", "\n"), expected);
    }

    #[test]
    fn rejects_identical_or_empty_separators() {
        let args = TaskArgs::new().with("from", r"\n").with("to", "\n");
        assert!(ChNewlineTask.validate(&args).is_err());
        assert!(ChNewlineTask.validate(&TaskArgs::new().with("to", r"\n")).is_err());
    }
}
