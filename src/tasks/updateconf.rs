// src/tasks/updateconf.rs

//! UPDATECONF: import a JSON configuration into the store.
//!
//! The file is either the JSON document itself or a zip archive; in the
//! latter case the first `.json` member is imported.

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::store::ConfigImport;

use super::{RunContext, Task, TaskArgs, TaskError, blocking};

#[derive(Debug, Deserialize)]
struct UpdateConfArgs {
    #[serde(default)]
    file: String,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// The JSON document carried by `data`, unpacking a zip if needed.
pub fn config_document(data: Vec<u8>) -> Result<Vec<u8>, TaskError> {
    if !data.starts_with(ZIP_MAGIC) {
        return Ok(data);
    }

    let mut zip = zip::ZipArchive::new(Cursor::new(data)).context("reading configuration archive")?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("reading configuration archive")?;
        if entry.is_file() && entry.name().to_ascii_lowercase().ends_with(".json") {
            debug!(member = entry.name(), "configuration found in archive");
            let mut json = Vec::new();
            entry.read_to_end(&mut json)?;
            return Ok(json);
        }
    }
    Err(TaskError::NotFound(
        "JSON configuration inside the archive".to_string(),
    ))
}

#[derive(Debug, Default)]
pub struct UpdateConfTask;

#[async_trait]
impl Task for UpdateConfTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        args.decode::<UpdateConfArgs>().map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let raw: UpdateConfArgs = cx.args.decode()?;
        let path = match raw.file.trim() {
            "" => cx.transfer.file().to_path_buf(),
            file => PathBuf::from(file),
        };

        let fs = Arc::clone(&cx.fs);
        let source = path.clone();
        let document = blocking(move || {
            if !fs.is_file(&source) {
                return Err(TaskError::NotFound(format!("configuration file {:?}", source)));
            }
            config_document(fs.read(&source)?)
        })
        .await?;

        let import = ConfigImport::from_json(&document)
            .map_err(|e| TaskError::Other(anyhow::anyhow!("invalid configuration file: {}", e)))?;
        import.validate()?;
        if import.is_empty() {
            info!(file = ?path, "configuration file is empty, nothing imported");
            return Ok(());
        }

        let counts = (
            import.locals.len(),
            import.remotes.len(),
            import.rules.len(),
            import.crypto_keys.len(),
        );
        cx.store.import(import)?;
        info!(
            file = ?path,
            local_agents = counts.0,
            remote_agents = counts.1,
            rules = counts.2,
            crypto_keys = counts.3,
            "configuration imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn finds_json_inside_a_zip() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("readme.txt", options).unwrap();
            zip.write_all(b"ignored").unwrap();
            zip.start_file("gateway.json", options).unwrap();
            zip.write_all(br#"{"rules": []}"#).unwrap();
            zip.finish().unwrap();
        }
        let json = config_document(buf.into_inner()).unwrap();
        assert_eq!(json, br#"{"rules": []}"#);

        let plain = config_document(b"{}".to_vec()).unwrap();
        assert_eq!(plain, b"{}");
    }
}
