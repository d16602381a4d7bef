// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{AgentConfig, ConfigFile, CryptoKeyConfig, RawConfigFile, RuleConfig};
use crate::errors::{Result, TaskgateError};
use crate::model::{CryptoKey, CryptoKeyType, TaskSpec};
use crate::store::ConfigImport;
use crate::store::import::{AccountImport, AgentImport, RuleImport};
use crate::tasks::TaskRegistry;
use crate::types::Direction;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskgateError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw, &TaskRegistry::with_builtin_tasks())?;
        let import = to_import(&raw)?;
        import
            .validate()
            .map_err(|e| TaskgateError::ConfigError(e.to_string()))?;
        Ok(ConfigFile::new_unchecked(raw.paths, import))
    }
}

/// Check `cfg` against the task types known to `registry`.
pub fn validate_config(cfg: &RawConfigFile, registry: &TaskRegistry) -> Result<()> {
    validate_agents("local_agent", &cfg.local_agent)?;
    validate_agents("remote_agent", &cfg.remote_agent)?;
    validate_rules(&cfg.rule, registry)?;
    validate_keys(&cfg.crypto_key)?;
    Ok(())
}

fn config_error(msg: String) -> TaskgateError {
    TaskgateError::ConfigError(msg)
}

fn validate_agents(section: &str, agents: &[AgentConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for agent in agents {
        if agent.name.trim().is_empty() {
            return Err(config_error(format!("[[{}]] entry without a name", section)));
        }
        if !names.insert(agent.name.as_str()) {
            return Err(config_error(format!(
                "{} '{}' is defined more than once",
                section, agent.name
            )));
        }
        let mut logins = HashSet::new();
        for login in &agent.accounts {
            if login.trim().is_empty() {
                return Err(config_error(format!(
                    "{} '{}' has an account without a login",
                    section, agent.name
                )));
            }
            if !logins.insert(login.as_str()) {
                return Err(config_error(format!(
                    "{} '{}' lists account '{}' twice",
                    section, agent.name, login
                )));
            }
        }
    }
    Ok(())
}

fn rule_direction(rule: &RuleConfig) -> Result<Direction> {
    let Some(ref direction) = rule.direction else {
        return Err(config_error(format!(
            "rule '{}' has no `direction` (expected 'send' or 'receive')",
            rule.name
        )));
    };
    direction
        .parse()
        .map_err(|e: String| config_error(format!("rule '{}': {}", rule.name, e)))
}

fn validate_chain(rule: &RuleConfig, chain: &str, tasks: &[TaskSpec], registry: &TaskRegistry) -> Result<()> {
    for (rank, task) in tasks.iter().enumerate() {
        if !registry.contains(&task.kind) {
            return Err(config_error(format!(
                "rule '{}' {} task #{} has unknown type '{}'",
                rule.name, chain, rank, task.kind
            )));
        }
    }
    Ok(())
}

fn validate_rules(rules: &[RuleConfig], registry: &TaskRegistry) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(config_error("[[rule]] entry without a name".to_string()));
        }
        let direction = rule_direction(rule)?;
        if !seen.insert((rule.name.as_str(), direction)) {
            return Err(config_error(format!(
                "rule '{}' ({}) is defined more than once",
                rule.name, direction
            )));
        }
        validate_chain(rule, "pre", &rule.pre, registry)?;
        validate_chain(rule, "post", &rule.post, registry)?;
        validate_chain(rule, "error", &rule.error, registry)?;
    }
    Ok(())
}

fn to_crypto_key(cfg: &CryptoKeyConfig) -> Result<CryptoKey> {
    let kind: CryptoKeyType = cfg
        .kind
        .parse()
        .map_err(|e| config_error(format!("crypto key '{}': {}", cfg.name, e)))?;
    let key = CryptoKey::new(cfg.name.clone(), kind, cfg.key.clone().unwrap_or_default());
    key.validate()
        .map_err(|e| config_error(format!("crypto key '{}': {}", cfg.name, e)))?;
    Ok(key)
}

fn validate_keys(keys: &[CryptoKeyConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for key in keys {
        to_crypto_key(key)?;
        if !names.insert(key.name.as_str()) {
            return Err(config_error(format!(
                "crypto key '{}' is defined more than once",
                key.name
            )));
        }
    }
    Ok(())
}

fn agent_import(agent: &AgentConfig) -> AgentImport {
    AgentImport {
        name: agent.name.clone(),
        protocol: agent.protocol.clone(),
        address: agent.address.clone(),
        accounts: agent
            .accounts
            .iter()
            .map(|login| AccountImport { login: login.clone() })
            .collect(),
    }
}

fn to_import(cfg: &RawConfigFile) -> Result<ConfigImport> {
    let rules = cfg
        .rule
        .iter()
        .map(|rule| {
            Ok(RuleImport {
                name: rule.name.clone(),
                is_send: rule_direction(rule)?.is_send(),
                local_dir: rule.local_dir.clone(),
                remote_dir: rule.remote_dir.clone(),
                tmp_local_rcv_dir: rule.tmp_local_rcv_dir.clone(),
                pre: rule.pre.clone(),
                post: rule.post.clone(),
                error: rule.error.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConfigImport {
        locals: cfg.local_agent.iter().map(agent_import).collect(),
        remotes: cfg.remote_agent.iter().map(agent_import).collect(),
        rules,
        crypto_keys: cfg.crypto_key.iter().map(to_crypto_key).collect::<Result<_>>()?,
        email_templates: cfg.email_template.clone(),
        smtp_credentials: cfg.smtp_credential.clone(),
    })
}
