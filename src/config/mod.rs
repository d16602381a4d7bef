// src/config/mod.rs

//! Configuration loading and validation for taskgate.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate rules, keys and agents before anything runs (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_transfer};
pub use model::{
    AgentConfig, ConfigFile, CryptoKeyConfig, RawConfigFile, RuleConfig, TransferFile,
};
pub use validate::validate_config;
