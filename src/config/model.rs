// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::model::{EmailTemplate, Paths, Rule, SmtpCredential, TaskSpec, Transfer};
use crate::store::{ConfigImport, MemoryStore, StoreResult};

/// Configuration file as read from TOML, before validation.
///
/// ```toml
/// [paths]
/// gateway_home = "/var/lib/taskgate"
///
/// [[local_agent]]
/// name = "sftp-server"
/// protocol = "sftp"
/// address = "0.0.0.0:2022"
/// accounts = ["alice"]
///
/// [[crypto_key]]
/// name = "partner-aes"
/// type = "AES"
/// key_file = "keys/partner.aes"
///
/// [[rule]]
/// name = "inbound"
/// direction = "receive"
/// local_dir = "inbound"
/// post = [
///   { type = "DECRYPT", args = { method = "AES-CFB", keyName = "partner-aes" } },
///   { type = "MOVE", args = { path = "archive" } },
/// ]
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub local_agent: Vec<AgentConfig>,

    #[serde(default)]
    pub remote_agent: Vec<AgentConfig>,

    #[serde(default)]
    pub crypto_key: Vec<CryptoKeyConfig>,

    #[serde(default)]
    pub rule: Vec<RuleConfig>,

    #[serde(default)]
    pub email_template: Vec<EmailTemplate>,

    #[serde(default)]
    pub smtp_credential: Vec<SmtpCredential>,
}

/// `[[local_agent]]` / `[[remote_agent]]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub address: String,

    /// Account logins attached to this agent.
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// `[[crypto_key]]`. The material is given inline (`key`) or read from
/// `key_file`, relative to the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoKeyConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// `[[rule]]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,

    /// `"send"` or `"receive"`. Required; kept optional here so a missing
    /// value is reported by validation with the rule's name.
    #[serde(default)]
    pub direction: Option<String>,

    #[serde(default)]
    pub local_dir: String,

    #[serde(default)]
    pub remote_dir: String,

    #[serde(default)]
    pub tmp_local_rcv_dir: String,

    #[serde(default)]
    pub pre: Vec<TaskSpec>,

    #[serde(default)]
    pub post: Vec<TaskSpec>,

    #[serde(default)]
    pub error: Vec<TaskSpec>,
}

/// Validated configuration. Only built through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub paths: Paths,
    import: ConfigImport,
}

impl ConfigFile {
    /// Construct without validation. Callers must have validated `import`.
    pub(crate) fn new_unchecked(paths: Paths, import: ConfigImport) -> Self {
        Self { paths, import }
    }

    /// Everything the configuration defines, in store import form.
    pub fn import(&self) -> &ConfigImport {
        &self.import
    }

    /// Rules with their chains, as the store will hold them.
    pub fn rules(&self) -> Vec<Rule> {
        self.import.rules.iter().map(|r| r.to_rule()).collect()
    }

    /// A fresh in-memory store seeded with this configuration.
    pub fn seed_store(&self) -> StoreResult<MemoryStore> {
        MemoryStore::from_import(self.import.clone())
    }
}

/// Transfer description used by `taskgate run`.
///
/// ```toml
/// id = 42
/// local_path = "in/report.csv"
/// remote_path = "/upload/report.csv"
/// filesize = 1024
/// remote_agent = "partner"
/// remote_account = "gw"
///
/// [transfer_info]
/// batch = "2024-06"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferFile {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub remote_transfer_id: String,

    #[serde(default)]
    pub local_path: PathBuf,

    #[serde(default)]
    pub remote_path: String,

    #[serde(default)]
    pub src_filename: String,

    #[serde(default)]
    pub dest_filename: String,

    #[serde(default = "unknown_size")]
    pub filesize: i64,

    /// Local agent and account, for a server transfer.
    #[serde(default)]
    pub local_agent: Option<String>,

    #[serde(default)]
    pub local_account: Option<String>,

    /// Remote agent and account, for a client transfer.
    #[serde(default)]
    pub remote_agent: Option<String>,

    #[serde(default)]
    pub remote_account: Option<String>,

    /// Resume point: index of the next task of the chain.
    #[serde(default)]
    pub task_number: u32,

    #[serde(default)]
    pub transfer_info: BTreeMap<String, serde_json::Value>,
}

fn unknown_size() -> i64 {
    -1
}

impl TransferFile {
    /// The transfer row, without store ids.
    pub fn to_transfer(&self, rule: &Rule) -> Transfer {
        Transfer {
            id: self.id,
            remote_transfer_id: self.remote_transfer_id.clone(),
            rule: rule.name.clone(),
            is_server: self.local_agent.is_some(),
            local_path: self.local_path.clone(),
            remote_path: self.remote_path.clone(),
            src_filename: self.src_filename.clone(),
            dest_filename: self.dest_filename.clone(),
            filesize: self.filesize,
            task_number: self.task_number,
            transfer_info: self.transfer_info.clone(),
            ..Transfer::default()
        }
    }
}
