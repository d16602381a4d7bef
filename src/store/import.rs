// src/store/import.rs

//! Configuration bundle imported into a [`Store`](super::Store) in one go.
//!
//! The JSON form is the one exchanged between gateways:
//!
//! ```json
//! {
//!   "locals":  [{ "name": "sftp-srv", "protocol": "sftp", "address": ":2022",
//!                 "accounts": [{ "login": "alice" }] }],
//!   "remotes": [{ "name": "partner", "protocol": "r66", "address": "10.0.0.1:6666",
//!                 "accounts": [{ "login": "gw" }] }],
//!   "rules":   [{ "name": "push", "isSend": true, "localDir": "push/out",
//!                 "pre": [{ "type": "COPY", "args": { "path": "backup" } }] }],
//!   "cryptoKeys": [{ "name": "aes", "type": "AES", "key": "..." }]
//! }
//! ```
//!
//! Unknown fields (credentials, clients, protocol configuration, ...) are
//! ignored.

use std::collections::HashSet;

use serde::Deserialize;

use crate::model::{CryptoKey, EmailTemplate, Rule, SmtpCredential, TaskSpec};
use crate::types::{Chain, Direction};

use super::{StoreError, StoreResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigImport {
    #[serde(default)]
    pub locals: Vec<AgentImport>,

    #[serde(default)]
    pub remotes: Vec<AgentImport>,

    #[serde(default)]
    pub rules: Vec<RuleImport>,

    #[serde(default)]
    pub crypto_keys: Vec<CryptoKey>,

    #[serde(default)]
    pub email_templates: Vec<EmailTemplate>,

    #[serde(default)]
    pub smtp_credentials: Vec<SmtpCredential>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentImport {
    pub name: String,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub accounts: Vec<AccountImport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountImport {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleImport {
    pub name: String,
    pub is_send: bool,

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

impl RuleImport {
    pub fn direction(&self) -> Direction {
        Direction::from_is_send(self.is_send)
    }

    pub fn to_rule(&self) -> Rule {
        let mut rule = Rule::new(self.name.clone(), self.direction());
        rule.local_dir = self.local_dir.clone();
        rule.remote_dir = self.remote_dir.clone();
        rule.tmp_local_rcv_dir = self.tmp_local_rcv_dir.clone();
        rule.set_chain(Chain::Pre, self.pre.clone());
        rule.set_chain(Chain::Post, self.post.clone());
        rule.set_chain(Chain::Error, self.error.clone());
        rule
    }
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::Invalid {
        kind,
        reason: reason.into(),
    }
}

impl ConfigImport {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
            && self.remotes.is_empty()
            && self.rules.is_empty()
            && self.crypto_keys.is_empty()
            && self.email_templates.is_empty()
            && self.smtp_credentials.is_empty()
    }

    /// Check every item before anything is written.
    pub fn validate(&self) -> StoreResult<()> {
        for key in &self.crypto_keys {
            key.validate()
                .map_err(|e| invalid("crypto key", e.to_string()))?;
        }

        for (kind, agents) in [("local agent", &self.locals), ("remote agent", &self.remotes)] {
            let mut seen = HashSet::new();
            for agent in agents {
                if agent.name.trim().is_empty() {
                    return Err(invalid(kind, "the name is missing"));
                }
                if !seen.insert(agent.name.as_str()) {
                    return Err(invalid(kind, format!("{:?} is defined twice", agent.name)));
                }
                if agent.accounts.iter().any(|a| a.login.trim().is_empty()) {
                    return Err(invalid(
                        kind,
                        format!("an account of {:?} has no login", agent.name),
                    ));
                }
            }
        }

        let mut rules = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(invalid("rule", "the name is missing"));
            }
            if !rules.insert((rule.name.as_str(), rule.is_send)) {
                return Err(invalid(
                    "rule",
                    format!("{:?} ({}) is defined twice", rule.name, rule.direction()),
                ));
            }
        }

        for template in &self.email_templates {
            if template.name.trim().is_empty() {
                return Err(invalid("email template", "the name is missing"));
            }
        }
        for cred in &self.smtp_credentials {
            if cred.email.trim().is_empty() {
                return Err(invalid("SMTP credential", "the sender address is missing"));
            }
        }

        Ok(())
    }
}
