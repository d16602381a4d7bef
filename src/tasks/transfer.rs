// src/tasks/transfer.rs

//! TRANSFER and PREREGISTER: plan new transfers from inside a chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::model::{LocalAccount, RemoteAccount, Rule, Transfer};
use crate::store::Store;
use crate::types::{Direction, TransferStatus};

use super::args::de;
use super::{RunContext, Task, TaskArgs, TaskError};

type InfoMap = BTreeMap<String, Value>;

fn required<'a>(value: &'a str, name: &str) -> Result<&'a str, TaskError> {
    let value = value.trim();
    if value.is_empty() {
        Err(TaskError::bad_args(format!("missing {}", name)))
    } else {
        Ok(value)
    }
}

fn parse_info(raw: &str) -> Result<InfoMap, TaskError> {
    if raw.trim().is_empty() {
        return Ok(InfoMap::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| TaskError::bad_args(format!("transfer info is not a JSON object: {}", e)))
}

fn parse_date(raw: &str, name: &str) -> Result<Option<DateTime<Utc>>, TaskError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| Some(d.with_timezone(&Utc)))
        .map_err(|e| TaskError::bad_args(format!("invalid {} {:?}: {}", name, raw, e)))
}

/// Info of the new transfer: the current transfer's (if copied), then the
/// explicit entries on top.
fn merged_info(current: &InfoMap, copy: bool, extra: &InfoMap) -> InfoMap {
    let mut info = if copy { current.clone() } else { InfoMap::new() };
    info.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    info
}

fn base_name(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/// Rule lookup by name alone; the rule's direction decides the transfer's.
fn unique_rule(store: &dyn Store, name: &str) -> Result<Rule, TaskError> {
    let mut rules = store.rules_named(name).map_err(TaskError::from_lookup)?;
    match rules.len() {
        0 => Err(TaskError::NotFound(format!("rule {:?}", name))),
        1 => Ok(rules.remove(0)),
        _ => Err(TaskError::bad_args(format!(
            "rule name {:?} is used by both a send and a receive rule",
            name
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferArgs {
    #[serde(default)]
    file: String,
    #[serde(default)]
    using: String,
    #[serde(default)]
    to: String,
    #[serde(default, rename = "as")]
    account: String,
    #[serde(default)]
    rule: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    copy_info: bool,
    #[serde(default)]
    info: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Clone)]
struct PlannedClient {
    file: String,
    client: Option<String>,
    partner: String,
    login: String,
    rule_name: String,
    copy_info: bool,
    info: InfoMap,
    start: Option<DateTime<Utc>>,
}

impl PlannedClient {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: TransferArgs = args.decode()?;
        Ok(Self {
            file: required(&raw.file, "file")?.to_string(),
            client: Some(raw.using.trim().to_string()).filter(|c| !c.is_empty()),
            partner: required(&raw.to, "partner name")?.to_string(),
            login: required(&raw.account, "account login")?.to_string(),
            rule_name: required(&raw.rule, "rule name")?.to_string(),
            copy_info: raw.copy_info,
            info: parse_info(&raw.info)?,
            start: parse_date(&raw.date, "date")?,
        })
    }
}

/// Schedules a client transfer to a partner.
#[derive(Debug, Default)]
pub struct TransferTask {
    planned: Option<PlannedClient>,
    account: Option<RemoteAccount>,
    rule: Option<Rule>,
}

#[async_trait]
impl Task for TransferTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.planned = Some(PlannedClient::parse(args)?);
        Ok(())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let planned = PlannedClient::parse(args)?;

        let partner = store
            .remote_agent_by_name(&planned.partner)
            .map_err(TaskError::from_lookup)?;
        let account = store
            .remote_account_by_login(partner.id, &planned.login)
            .map_err(TaskError::from_lookup)?;
        let rule = unique_rule(store, &planned.rule_name)?;

        self.account = Some(account);
        self.rule = Some(rule);
        self.planned = Some(planned);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.planned.is_none() || self.account.is_none() || self.rule.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (Some(planned), Some(account), Some(rule)) =
            (self.planned.take(), self.account.take(), self.rule.take())
        else {
            return Err(TaskError::bad_args("transfer task was not validated"));
        };

        let mut transfer = Transfer {
            rule: rule.name.clone(),
            is_server: false,
            remote_account_id: Some(account.id),
            client: planned.client.clone(),
            filesize: -1,
            start: Some(planned.start.unwrap_or_else(Utc::now)),
            status: TransferStatus::Planned,
            transfer_info: merged_info(
                &cx.transfer.transfer.transfer_info,
                planned.copy_info,
                &planned.info,
            ),
            ..Transfer::default()
        };
        match rule.direction {
            Direction::Send => {
                transfer.local_path = PathBuf::from(&planned.file);
                transfer.src_filename = planned.file.clone();
                transfer.dest_filename = base_name(&planned.file);
            }
            Direction::Receive => {
                transfer.remote_path = planned.file.clone();
                transfer.src_filename = planned.file.clone();
                transfer.dest_filename = base_name(&planned.file);
            }
        }

        let id = cx.store.insert_transfer(transfer)?;
        info!(
            new_transfer = id,
            partner = %planned.partner,
            account = %account.login,
            rule = %rule.name,
            direction = %rule.direction,
            "transfer scheduled"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreregisterArgs {
    #[serde(default)]
    file: String,
    #[serde(default)]
    rule: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    is_send: bool,
    #[serde(default)]
    account: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    due_date: String,
    #[serde(default, deserialize_with = "de::quoted_bool")]
    copy_info: bool,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Clone)]
struct PlannedServer {
    file: String,
    rule_name: String,
    direction: Direction,
    login: String,
    server: String,
    due: DateTime<Utc>,
    copy_info: bool,
    info: InfoMap,
}

impl PlannedServer {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: PreregisterArgs = args.decode()?;
        let due = parse_date(&raw.due_date, "due date")?
            .ok_or_else(|| TaskError::bad_args("missing due date"))?;
        Ok(Self {
            file: required(&raw.file, "file")?.to_string(),
            rule_name: required(&raw.rule, "rule name")?.to_string(),
            direction: Direction::from_is_send(raw.is_send),
            login: required(&raw.account, "account login")?.to_string(),
            server: required(&raw.server, "server name")?.to_string(),
            due,
            copy_info: raw.copy_info,
            info: parse_info(&raw.info)?,
        })
    }
}

/// Registers a server transfer that a partner is expected to start later.
#[derive(Debug, Default)]
pub struct PreregisterTask {
    planned: Option<PlannedServer>,
    account: Option<LocalAccount>,
}

#[async_trait]
impl Task for PreregisterTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.planned = Some(PlannedServer::parse(args)?);
        Ok(())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let planned = PlannedServer::parse(args)?;

        store
            .rule(&planned.rule_name, planned.direction)
            .map_err(TaskError::from_lookup)?;
        let server = store
            .local_agent_by_name(&planned.server)
            .map_err(TaskError::from_lookup)?;
        let account = store
            .local_account_by_login(server.id, &planned.login)
            .map_err(TaskError::from_lookup)?;

        self.account = Some(account);
        self.planned = Some(planned);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        if self.planned.is_none() || self.account.is_none() {
            self.validate_db(cx.store.as_ref(), cx.args)?;
        }
        let (Some(planned), Some(account)) = (self.planned.take(), self.account.take()) else {
            return Err(TaskError::bad_args("preregister task was not validated"));
        };

        let mut transfer = Transfer {
            rule: planned.rule_name.clone(),
            is_server: true,
            local_account_id: Some(account.id),
            filesize: -1,
            start: Some(planned.due),
            status: TransferStatus::Planned,
            transfer_info: merged_info(
                &cx.transfer.transfer.transfer_info,
                planned.copy_info,
                &planned.info,
            ),
            ..Transfer::default()
        };
        match planned.direction {
            Direction::Send => {
                transfer.local_path = PathBuf::from(&planned.file);
                transfer.src_filename = base_name(&planned.file);
            }
            Direction::Receive => transfer.dest_filename = base_name(&planned.file),
        }

        let id = cx.store.insert_transfer(transfer)?;
        info!(
            new_transfer = id,
            server = %planned.server,
            account = %account.login,
            rule = %planned.rule_name,
            due = %planned.due,
            "transfer preregistered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_requires_partner_account_and_rule() {
        let args = TaskArgs::new().with("file", "a.txt").with("to", "partner");
        assert!(matches!(
            TransferTask::default().validate(&args),
            Err(TaskError::BadArguments(_))
        ));

        let args = args.with("as", "login").with("rule", "push");
        assert!(TransferTask::default().validate(&args).is_ok());
    }

    #[test]
    fn info_must_be_a_json_object() {
        assert!(parse_info(r#"{"a":1}"#).is_ok());
        assert!(parse_info("[1,2]").is_err());
        assert!(parse_info("").unwrap().is_empty());
    }

    #[test]
    fn preregister_needs_a_due_date() {
        let args = TaskArgs::new()
            .with("file", "a.txt")
            .with("rule", "push")
            .with("isSend", "true")
            .with("account", "toto")
            .with("server", "sftp");
        assert!(PreregisterTask::default().validate(&args).is_err());

        let args = args.with("dueDate", "2030-01-01T10:00:00Z");
        assert!(PreregisterTask::default().validate(&args).is_ok());
    }

    #[test]
    fn copied_info_is_overridden_by_explicit_entries() {
        let mut current = InfoMap::new();
        current.insert("a".into(), Value::from(1));
        current.insert("b".into(), Value::from(2));
        let mut extra = InfoMap::new();
        extra.insert("b".into(), Value::from("x"));

        let merged = merged_info(&current, true, &extra);
        assert_eq!(merged["a"], Value::from(1));
        assert_eq!(merged["b"], Value::from("x"));
        assert_eq!(merged_info(&current, false, &extra).len(), 1);
    }
}
