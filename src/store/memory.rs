// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::model::{
    CryptoKey, EmailTemplate, LocalAccount, LocalAgent, RemoteAccount, RemoteAgent, Rule,
    SmtpCredential, Transfer,
};

use super::import::{AgentImport, ConfigImport};
use super::{ProgressUpdate, Store, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct Inner {
    last_id: i64,
    transfers: BTreeMap<i64, Transfer>,
    crypto_keys: BTreeMap<String, CryptoKey>,
    rules: Vec<Rule>,
    local_agents: Vec<LocalAgent>,
    local_accounts: Vec<LocalAccount>,
    remote_agents: Vec<RemoteAgent>,
    remote_accounts: Vec<RemoteAccount>,
    email_templates: BTreeMap<String, EmailTemplate>,
    smtp_credentials: BTreeMap<String, SmtpCredential>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn upsert_rule(&mut self, mut rule: Rule) -> i64 {
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|r| r.name == rule.name && r.direction == rule.direction)
        {
            rule.id = existing.id;
            *existing = rule;
            return existing.id;
        }
        if rule.id == 0 {
            rule.id = self.next_id();
        }
        let id = rule.id;
        self.rules.push(rule);
        id
    }

    fn upsert_local_agent(&mut self, import: &AgentImport) {
        let agent_id = match self.local_agents.iter_mut().find(|a| a.name == import.name) {
            Some(agent) => {
                agent.protocol = import.protocol.clone();
                agent.address = import.address.clone();
                agent.id
            }
            None => {
                let id = self.next_id();
                self.local_agents.push(LocalAgent {
                    id,
                    name: import.name.clone(),
                    protocol: import.protocol.clone(),
                    address: import.address.clone(),
                });
                id
            }
        };

        for account in &import.accounts {
            let exists = self
                .local_accounts
                .iter()
                .any(|a| a.local_agent_id == agent_id && a.login == account.login);
            if !exists {
                let id = self.next_id();
                self.local_accounts.push(LocalAccount {
                    id,
                    local_agent_id: agent_id,
                    login: account.login.clone(),
                });
            }
        }
    }

    fn upsert_remote_agent(&mut self, import: &AgentImport) {
        let agent_id = match self.remote_agents.iter_mut().find(|a| a.name == import.name) {
            Some(agent) => {
                agent.protocol = import.protocol.clone();
                agent.address = import.address.clone();
                agent.id
            }
            None => {
                let id = self.next_id();
                self.remote_agents.push(RemoteAgent {
                    id,
                    name: import.name.clone(),
                    protocol: import.protocol.clone(),
                    address: import.address.clone(),
                });
                id
            }
        };

        for account in &import.accounts {
            let exists = self
                .remote_accounts
                .iter()
                .any(|a| a.remote_agent_id == agent_id && a.login == account.login);
            if !exists {
                let id = self.next_id();
                self.remote_accounts.push(RemoteAccount {
                    id,
                    remote_agent_id: agent_id,
                    login: account.login.clone(),
                });
            }
        }
    }
}

/// Thread-safe in-memory [`Store`].
///
/// Every write takes the single lock, so progress updates and imports are
/// atomic with respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_import(import: ConfigImport) -> StoreResult<Self> {
        let store = Self::new();
        store.import(import)?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn add_rule(&self, rule: Rule) -> StoreResult<i64> {
        Ok(self.lock()?.upsert_rule(rule))
    }

    pub fn add_crypto_key(&self, key: CryptoKey) -> StoreResult<()> {
        key.validate().map_err(|e| StoreError::Invalid {
            kind: "crypto key",
            reason: e.to_string(),
        })?;
        self.lock()?.crypto_keys.insert(key.name.clone(), key);
        Ok(())
    }

    pub fn add_local_agent(&self, name: &str, protocol: &str) -> StoreResult<LocalAgent> {
        let mut inner = self.lock()?;
        if inner.local_agents.iter().any(|a| a.name == name) {
            return Err(StoreError::AlreadyExists {
                kind: "local agent",
                key: name.to_string(),
            });
        }
        let agent = LocalAgent {
            id: inner.next_id(),
            name: name.to_string(),
            protocol: protocol.to_string(),
            address: String::new(),
        };
        inner.local_agents.push(agent.clone());
        Ok(agent)
    }

    pub fn add_local_account(&self, agent_id: i64, login: &str) -> StoreResult<LocalAccount> {
        let mut inner = self.lock()?;
        if !inner.local_agents.iter().any(|a| a.id == agent_id) {
            return Err(StoreError::not_found("local agent", agent_id));
        }
        let account = LocalAccount {
            id: inner.next_id(),
            local_agent_id: agent_id,
            login: login.to_string(),
        };
        inner.local_accounts.push(account.clone());
        Ok(account)
    }

    pub fn add_remote_agent(&self, name: &str, protocol: &str) -> StoreResult<RemoteAgent> {
        let mut inner = self.lock()?;
        if inner.remote_agents.iter().any(|a| a.name == name) {
            return Err(StoreError::AlreadyExists {
                kind: "remote agent",
                key: name.to_string(),
            });
        }
        let agent = RemoteAgent {
            id: inner.next_id(),
            name: name.to_string(),
            protocol: protocol.to_string(),
            address: String::new(),
        };
        inner.remote_agents.push(agent.clone());
        Ok(agent)
    }

    pub fn add_remote_account(&self, agent_id: i64, login: &str) -> StoreResult<RemoteAccount> {
        let mut inner = self.lock()?;
        if !inner.remote_agents.iter().any(|a| a.id == agent_id) {
            return Err(StoreError::not_found("remote agent", agent_id));
        }
        let account = RemoteAccount {
            id: inner.next_id(),
            remote_agent_id: agent_id,
            login: login.to_string(),
        };
        inner.remote_accounts.push(account.clone());
        Ok(account)
    }

    /// Drop an account, e.g. to simulate a deletion while a transfer runs.
    pub fn remove_remote_account(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let before = inner.remote_accounts.len();
        inner.remote_accounts.retain(|a| a.id != id);
        if inner.remote_accounts.len() == before {
            return Err(StoreError::not_found("remote account", id));
        }
        Ok(())
    }

    pub fn add_email_template(&self, template: EmailTemplate) -> StoreResult<()> {
        self.lock()?
            .email_templates
            .insert(template.name.clone(), template);
        Ok(())
    }

    pub fn add_smtp_credential(&self, credential: SmtpCredential) -> StoreResult<()> {
        self.lock()?
            .smtp_credentials
            .insert(credential.email.clone(), credential);
        Ok(())
    }

    /// Every stored transfer, in id order.
    pub fn transfers(&self) -> StoreResult<Vec<Transfer>> {
        Ok(self.lock()?.transfers.values().cloned().collect())
    }

    pub fn rules(&self) -> StoreResult<Vec<Rule>> {
        Ok(self.lock()?.rules.clone())
    }
}

impl Store for MemoryStore {
    fn transfer(&self, id: i64) -> StoreResult<Transfer> {
        self.lock()?
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    fn insert_transfer(&self, mut transfer: Transfer) -> StoreResult<i64> {
        let mut inner = self.lock()?;
        if transfer.id == 0 {
            transfer.id = inner.next_id();
        } else if inner.transfers.contains_key(&transfer.id) {
            return Err(StoreError::AlreadyExists {
                kind: "transfer",
                key: transfer.id.to_string(),
            });
        } else {
            inner.last_id = inner.last_id.max(transfer.id);
        }
        let id = transfer.id;
        inner.transfers.insert(id, transfer);
        Ok(id)
    }

    fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let transfer = inner
            .transfers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("transfer", id))?;
        update.apply_to(transfer);
        Ok(())
    }

    fn crypto_key(&self, name: &str) -> StoreResult<CryptoKey> {
        self.lock()?
            .crypto_keys
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("crypto key", name))
    }

    fn rules_named(&self, name: &str) -> StoreResult<Vec<Rule>> {
        let rules: Vec<Rule> = self
            .lock()?
            .rules
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect();
        if rules.is_empty() {
            return Err(StoreError::not_found("rule", name));
        }
        Ok(rules)
    }

    fn local_agent(&self, id: i64) -> StoreResult<LocalAgent> {
        self.lock()?
            .local_agents
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("local agent", id))
    }

    fn local_agent_by_name(&self, name: &str) -> StoreResult<LocalAgent> {
        self.lock()?
            .local_agents
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("local agent", name))
    }

    fn remote_agent(&self, id: i64) -> StoreResult<RemoteAgent> {
        self.lock()?
            .remote_agents
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("remote agent", id))
    }

    fn remote_agent_by_name(&self, name: &str) -> StoreResult<RemoteAgent> {
        self.lock()?
            .remote_agents
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("remote agent", name))
    }

    fn local_account(&self, id: i64) -> StoreResult<LocalAccount> {
        self.lock()?
            .local_accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("local account", id))
    }

    fn local_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<LocalAccount> {
        self.lock()?
            .local_accounts
            .iter()
            .find(|a| a.local_agent_id == agent_id && a.login == login)
            .cloned()
            .ok_or_else(|| StoreError::not_found("local account", login))
    }

    fn remote_account(&self, id: i64) -> StoreResult<RemoteAccount> {
        self.lock()?
            .remote_accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("remote account", id))
    }

    fn remote_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<RemoteAccount> {
        self.lock()?
            .remote_accounts
            .iter()
            .find(|a| a.remote_agent_id == agent_id && a.login == login)
            .cloned()
            .ok_or_else(|| StoreError::not_found("remote account", login))
    }

    fn email_template(&self, name: &str) -> StoreResult<EmailTemplate> {
        self.lock()?
            .email_templates
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("email template", name))
    }

    fn smtp_credential(&self, email: &str) -> StoreResult<SmtpCredential> {
        self.lock()?
            .smtp_credentials
            .get(email)
            .cloned()
            .ok_or_else(|| StoreError::not_found("SMTP credential", email))
    }

    fn import(&self, import: ConfigImport) -> StoreResult<()> {
        import.validate()?;

        let mut guard = self.lock()?;
        let mut next = guard.clone();

        for key in import.crypto_keys {
            next.crypto_keys.insert(key.name.clone(), key);
        }
        for agent in &import.locals {
            next.upsert_local_agent(agent);
        }
        for agent in &import.remotes {
            next.upsert_remote_agent(agent);
        }
        for rule in &import.rules {
            next.upsert_rule(rule.to_rule());
        }
        for template in import.email_templates {
            next.email_templates.insert(template.name.clone(), template);
        }
        for cred in import.smtp_credentials {
            next.smtp_credentials.insert(cred.email.clone(), cred);
        }

        debug!(
            rules = next.rules.len(),
            keys = next.crypto_keys.len(),
            "configuration imported"
        );
        *guard = next;
        Ok(())
    }
}
