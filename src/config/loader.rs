// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile, TransferFile};
use crate::errors::{Result, TaskgateError};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation and does not read `key_file`s. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Reads every `key_file`, relative to the configuration file.
/// - Checks rules, task types, keys and agents.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;
    read_key_files(&mut raw_config, &config_dir(path))?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Load the transfer description used by `taskgate run`.
pub fn load_transfer(path: impl AsRef<Path>) -> Result<TransferFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ok(toml::from_str(&contents)?)
}

fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_key_files(cfg: &mut RawConfigFile, base: &Path) -> Result<()> {
    for key in cfg.crypto_key.iter_mut() {
        let Some(ref file) = key.key_file else {
            continue;
        };
        if key.key.is_some() {
            return Err(TaskgateError::ConfigError(format!(
                "crypto key '{}' sets both `key` and `key_file`",
                key.name
            )));
        }
        let full = base.join(file);
        let material = fs::read_to_string(&full).map_err(|e| {
            TaskgateError::ConfigError(format!(
                "crypto key '{}': cannot read key file {:?}: {}",
                key.name, full, e
            ))
        })?;
        key.key = Some(material.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(())
}
