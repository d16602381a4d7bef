#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskgate::model::{
    CryptoKey, EmailTemplate, LocalAccount, LocalAgent, RemoteAccount, RemoteAgent, Rule,
    SmtpCredential, Transfer,
};
use taskgate::store::{ConfigImport, MemoryStore, ProgressUpdate, Store, StoreError, StoreResult};
use taskgate::tasks::{
    Mailer, OutgoingMail, RemoteDeleter, RunContext, Task, TaskArgs, TaskError, TaskRegistry,
};

/// Task type name of [`ScriptedTask`].
pub const SCRIPTED: &str = "SCRIPTED";

/// A task whose behaviour is read from its arguments:
///
/// - `outcome`: `ok` (default), `warn`, `fail`, `invalid` (fails validation)
///   or `sleep` (waits `ms` milliseconds, or until cancelled).
/// - `size`: new transfer file size.
/// - `path`: new local path.
#[derive(Debug, Default)]
pub struct ScriptedTask;

#[async_trait]
impl Task for ScriptedTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        if args.get("outcome") == Some("invalid") {
            return Err(TaskError::bad_args("scripted validation failure"));
        }
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if let Some(size) = cx.args.get("size") {
            cx.transfer.transfer.filesize = size.parse().map_err(|_| TaskError::bad_args("size"))?;
        }
        if let Some(path) = cx.args.get("path") {
            cx.transfer.transfer.local_path = PathBuf::from(path);
        }
        match cx.args.get("outcome").unwrap_or("ok") {
            "warn" => Err(TaskError::Warning(format!("scripted warning {}", cx.args.str("label")))),
            "fail" => Err(TaskError::Other(anyhow::anyhow!("scripted failure"))),
            "sleep" => {
                let ms: u64 = cx.args.get("ms").and_then(|v| v.parse().ok()).unwrap_or(1000);
                tokio::select! {
                    _ = cx.cancel.cancelled() => Err(TaskError::Cancelled("scripted sleep".into())),
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Built-in tasks plus [`ScriptedTask`].
pub fn registry_with_scripted() -> TaskRegistry {
    let mut reg = TaskRegistry::with_builtin_tasks();
    reg.register(SCRIPTED, || -> Box<dyn Task> { Box::new(ScriptedTask) });
    reg
}

/// Records mail instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<(SmtpCredential, OutgoingMail)>>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<(SmtpCredential, OutgoingMail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, relay: &SmtpCredential, mail: OutgoingMail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((relay.clone(), mail));
        Ok(())
    }
}

/// Records remote deletions, optionally failing them.
#[derive(Debug, Default, Clone)]
pub struct RecordingDeleter {
    pub deleted: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl RecordingDeleter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteDeleter for RecordingDeleter {
    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("550 {}: permission denied", path);
        }
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// A `MemoryStore` whose progress writes start failing after `budget`
/// successful calls.
#[derive(Debug)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    budget: Mutex<usize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, budget: usize) -> Self {
        Self {
            inner,
            budget: Mutex::new(budget),
        }
    }
}

impl Store for FlakyStore {
    fn transfer(&self, id: i64) -> StoreResult<Transfer> {
        self.inner.transfer(id)
    }

    fn insert_transfer(&self, transfer: Transfer) -> StoreResult<i64> {
        self.inner.insert_transfer(transfer)
    }

    fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()> {
        let mut budget = self.budget.lock().unwrap();
        if *budget == 0 {
            return Err(StoreError::Invalid {
                kind: "transfer",
                reason: "database is read-only".to_string(),
            });
        }
        *budget -= 1;
        self.inner.update_progress(id, update)
    }

    fn crypto_key(&self, name: &str) -> StoreResult<CryptoKey> {
        self.inner.crypto_key(name)
    }

    fn rules_named(&self, name: &str) -> StoreResult<Vec<Rule>> {
        self.inner.rules_named(name)
    }

    fn local_agent(&self, id: i64) -> StoreResult<LocalAgent> {
        self.inner.local_agent(id)
    }

    fn local_agent_by_name(&self, name: &str) -> StoreResult<LocalAgent> {
        self.inner.local_agent_by_name(name)
    }

    fn remote_agent(&self, id: i64) -> StoreResult<RemoteAgent> {
        self.inner.remote_agent(id)
    }

    fn remote_agent_by_name(&self, name: &str) -> StoreResult<RemoteAgent> {
        self.inner.remote_agent_by_name(name)
    }

    fn local_account(&self, id: i64) -> StoreResult<LocalAccount> {
        self.inner.local_account(id)
    }

    fn local_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<LocalAccount> {
        self.inner.local_account_by_login(agent_id, login)
    }

    fn remote_account(&self, id: i64) -> StoreResult<RemoteAccount> {
        self.inner.remote_account(id)
    }

    fn remote_account_by_login(&self, agent_id: i64, login: &str) -> StoreResult<RemoteAccount> {
        self.inner.remote_account_by_login(agent_id, login)
    }

    fn email_template(&self, name: &str) -> StoreResult<EmailTemplate> {
        self.inner.email_template(name)
    }

    fn smtp_credential(&self, email: &str) -> StoreResult<SmtpCredential> {
        self.inner.smtp_credential(email)
    }

    fn import(&self, import: ConfigImport) -> StoreResult<()> {
        self.inner.import(import)
    }
}
