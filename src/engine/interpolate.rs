// src/engine/interpolate.rs

//! `#TOKEN#` substitution in task arguments.
//!
//! Argument values are typed: strings are interpolated as text, scalars are
//! stringified, and arrays/objects are serialized to compact JSON with every
//! substituted value JSON-escaped. Tokens are resolved lazily, at most once
//! per [`ContextResolver`], so a lookup that is not needed can never fail.
//! Unknown `#...#` sequences are left untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::TransferContext;
use crate::store::Store;
use crate::tasks::TaskArgs;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([A-Za-z0-9_.\-]+)(?::([^#]*))?#").unwrap_or_else(|e| panic!("token regex: {e}"))
});

/// Tokens that are recognized but no longer carry a value.
const DEPRECATED: &[&str] = &[
    "ARCHPATH",
    "REMOTEHOSTIP",
    "LOCALHOSTIP",
    "RANKTRANSFER",
    "BLOCKSIZE",
    "NOWAIT",
    "LOCALEXEC",
];

/// Tokens exported to external programs.
const ENV_TOKENS: &[&str] = &[
    "TRUEFULLPATH",
    "TRUEFILENAME",
    "ORIGINALFULLPATH",
    "ORIGINALFILENAME",
    "FILESIZE",
    "INPATH",
    "OUTPATH",
    "WORKPATH",
    "HOMEPATH",
    "RULE",
    "DATE",
    "HOUR",
    "TRANSFERID",
    "TRANFERID",
    "REMOTEHOST",
    "LOCALHOST",
    "REQUESTERHOST",
    "REQUESTEDHOST",
    "FULLTRANFERID",
    "ERRORMSG",
    "ERRORCODE",
    "ERRORSTRCODE",
];

/// Tokens that need the transfer's account.
const HOST_TOKENS: &[&str] = &["REMOTEHOST", "LOCALHOST", "REQUESTERHOST", "REQUESTEDHOST"];

#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("failed to resolve #{token}#: {reason}")]
    Lookup { token: String, reason: String },

    #[error("invalid date format {format:?}")]
    DateFormat { format: String },

    #[error("failed to serialize argument {key:?}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

fn base_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolves tokens against one transfer context.
pub struct ContextResolver<'a> {
    ctx: &'a TransferContext,
    store: &'a dyn Store,
    now: DateTime<Local>,
    cache: HashMap<String, String>,
}

impl<'a> ContextResolver<'a> {
    pub fn new(ctx: &'a TransferContext, store: &'a dyn Store) -> Self {
        Self::at(ctx, store, Local::now())
    }

    /// A resolver with a fixed clock, for reproducible dates.
    pub fn at(ctx: &'a TransferContext, store: &'a dyn Store, now: DateTime<Local>) -> Self {
        Self {
            ctx,
            store,
            now,
            cache: HashMap::new(),
        }
    }

    fn lookup_err(token: &str, err: impl ToString) -> InterpolationError {
        InterpolationError::Lookup {
            token: token.to_string(),
            reason: err.to_string(),
        }
    }

    /// Login of the account on the requesting side.
    fn requester(&self, token: &str) -> Result<String, InterpolationError> {
        let t = &self.ctx.transfer;
        if t.is_server() {
            let id = t
                .local_account_id
                .ok_or_else(|| Self::lookup_err(token, "transfer has no local account"))?;
            let account = self
                .store
                .local_account(id)
                .map_err(|e| Self::lookup_err(token, e))?;
            Ok(account.login)
        } else {
            let id = t
                .remote_account_id
                .ok_or_else(|| Self::lookup_err(token, "transfer has no remote account"))?;
            let account = self
                .store
                .remote_account(id)
                .map_err(|e| Self::lookup_err(token, e))?;
            Ok(account.login)
        }
    }

    /// Name of the agent on the serving side.
    fn requested(&self, token: &str) -> Result<String, InterpolationError> {
        let t = &self.ctx.transfer;
        if t.is_server() {
            let id = t
                .local_account_id
                .ok_or_else(|| Self::lookup_err(token, "transfer has no local account"))?;
            let account = self
                .store
                .local_account(id)
                .map_err(|e| Self::lookup_err(token, e))?;
            let agent = self
                .store
                .local_agent(account.local_agent_id)
                .map_err(|e| Self::lookup_err(token, e))?;
            Ok(agent.name)
        } else {
            let id = t
                .remote_account_id
                .ok_or_else(|| Self::lookup_err(token, "transfer has no remote account"))?;
            let account = self
                .store
                .remote_account(id)
                .map_err(|e| Self::lookup_err(token, e))?;
            let agent = self
                .store
                .remote_agent(account.remote_agent_id)
                .map_err(|e| Self::lookup_err(token, e))?;
            Ok(agent.name)
        }
    }

    fn format_date(&self, format: &str) -> Result<String, InterpolationError> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(InterpolationError::DateFormat {
                format: format.to_string(),
            });
        }
        Ok(self.now.format(format).to_string())
    }

    fn compute(&self, name: &str, param: Option<&str>) -> Result<Option<String>, InterpolationError> {
        let ctx = self.ctx;
        let t = &ctx.transfer;
        let is_send = ctx.rule.is_send();

        if let Some(info_key) = name.strip_prefix("TI_") {
            return Ok(t.transfer_info.get(info_key).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }));
        }
        if DEPRECATED.contains(&name) {
            return Ok(Some(String::new()));
        }

        let value = match (name, param) {
            ("DATE", Some(format)) => self.format_date(format)?,
            (_, Some(_)) => return Ok(None),
            ("TRUEFULLPATH", None) => t.local_path.to_string_lossy().into_owned(),
            ("TRUEFILENAME", None) => base_name(&t.local_path),
            ("ORIGINALFULLPATH", None) => {
                if is_send {
                    t.local_path.to_string_lossy().into_owned()
                } else if !t.is_server() {
                    t.remote_path.clone()
                } else {
                    t.dest_filename.clone()
                }
            }
            ("ORIGINALFILENAME", None) => {
                if t.is_server() && !is_send {
                    base_name(&t.dest_filename)
                } else {
                    base_name(&t.src_filename)
                }
            }
            ("FILESIZE", None) => t.filesize.to_string(),
            ("INPATH", None) => ctx.in_dir().to_string_lossy().into_owned(),
            ("OUTPATH", None) => ctx.out_dir().to_string_lossy().into_owned(),
            ("WORKPATH", None) => ctx.work_dir().to_string_lossy().into_owned(),
            ("HOMEPATH", None) => ctx.paths.gateway_home.to_string_lossy().into_owned(),
            ("RULE", None) => ctx.rule.name.clone(),
            ("DATE", None) => self.now.format("%Y%m%d").to_string(),
            ("HOUR", None) => self.now.format("%I%M%S").to_string(),
            ("TRANSFERID" | "TRANFERID", None) => t.id.to_string(),
            ("REMOTEHOST", None) => {
                if t.is_server() {
                    self.requester(name)?
                } else {
                    self.requested(name)?
                }
            }
            ("LOCALHOST", None) => {
                if t.is_server() {
                    self.requested(name)?
                } else {
                    self.requester(name)?
                }
            }
            ("REQUESTERHOST", None) => self.requester(name)?,
            ("REQUESTEDHOST", None) => self.requested(name)?,
            ("FULLTRANFERID", None) => match (self.requester(name), self.requested(name)) {
                (Ok(client), Ok(server)) => format!("{}_{}_{}", t.id, client, server),
                _ => String::new(),
            },
            ("ERRORMSG" | "ERRORSTRCODE", None) => t.error.details.clone(),
            ("ERRORCODE", None) => t.error.code.r66_code().to_string(),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Value of one token, `None` when the token is unknown.
    pub fn resolve(&mut self, name: &str, param: Option<&str>) -> Result<Option<String>, InterpolationError> {
        let key = match param {
            Some(p) => format!("{}:{}", name, p),
            None => name.to_string(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit.clone()));
        }
        let value = self.compute(name, param)?;
        if let Some(ref v) = value {
            self.cache.insert(key, v.clone());
        }
        Ok(value)
    }

    fn substitute(&mut self, text: &str, json_escape: bool) -> Result<String, InterpolationError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('#') {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];

            if let Some(caps) = TOKEN_RE.captures(candidate) {
                let whole = caps.get(0).map_or(0, |m| m.end());
                let name = caps.get(1).map_or("", |m| m.as_str());
                let param = caps.get(2).map(|m| m.as_str());

                if let Some(value) = self.resolve(name, param)? {
                    if json_escape {
                        let quoted = Value::String(value).to_string();
                        out.push_str(&quoted[1..quoted.len() - 1]);
                    } else {
                        out.push_str(&value);
                    }
                    rest = &candidate[whole..];
                    continue;
                }
            }

            out.push('#');
            rest = &candidate[1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Interpolate free text (email subjects and bodies, paths, ...).
    pub fn interpolate_str(&mut self, text: &str) -> Result<String, InterpolationError> {
        self.substitute(text, false)
    }

    /// Turn a raw argument object into flat, interpolated task arguments.
    pub fn interpolate_args(&mut self, raw: &Map<String, Value>) -> Result<TaskArgs, InterpolationError> {
        let mut args = TaskArgs::new();
        for (key, value) in raw {
            let flat = match value {
                Value::String(s) => self.substitute(s, false)?,
                Value::Null => String::new(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    let json = serde_json::to_string(value).map_err(|source| InterpolationError::Json {
                        key: key.clone(),
                        source,
                    })?;
                    self.substitute(&json, true)?
                }
            };
            args.insert(key.clone(), flat);
        }
        Ok(args)
    }

    /// Whether the transfer references the account its host tokens come from.
    fn has_account(&self) -> bool {
        let t = &self.ctx.transfer;
        if t.is_server() {
            t.local_account_id.is_some()
        } else {
            t.remote_account_id.is_some()
        }
    }

    /// Environment exported to external programs: one `#TOKEN#=value` pair
    /// per token. Host tokens are left out when the transfer has no account;
    /// any other failed lookup is an error.
    pub fn environment(&mut self) -> Result<Vec<(String, String)>, InterpolationError> {
        let mut env = Vec::new();
        let has_account = self.has_account();
        for name in ENV_TOKENS {
            if HOST_TOKENS.contains(name) && !has_account {
                continue;
            }
            if let Some(value) = self.resolve(name, None)? {
                env.push((format!("#{}#", name), value));
            }
        }
        let info_keys: Vec<String> = self.ctx.transfer.transfer_info.keys().cloned().collect();
        for key in info_keys {
            let name = format!("TI_{}", key);
            if let Some(value) = self.resolve(&name, None)? {
                env.push((format!("#{}#", name), value));
            }
        }
        Ok(env)
    }
}

/// Interpolate a task's raw arguments against `ctx`.
pub fn interpolate_args(
    raw: &Map<String, Value>,
    ctx: &TransferContext,
    store: &dyn Store,
) -> Result<TaskArgs, InterpolationError> {
    ContextResolver::new(ctx, store).interpolate_args(raw)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::model::{Paths, Rule, Transfer, TransferError};
    use crate::store::MemoryStore;
    use crate::types::{Direction, ErrorCode};

    fn context(direction: Direction) -> TransferContext {
        let transfer = Transfer {
            id: 1000,
            local_path: "/data/in/file.txt".into(),
            remote_path: "/remote/file.txt".into(),
            src_filename: "src/file.txt".into(),
            dest_filename: "dest/file.txt".into(),
            filesize: 42,
            error: TransferError::new(ErrorCode::Integrity, "bad hash"),
            ..Transfer::default()
        };
        TransferContext::new(transfer, Rule::new("push", direction), Paths::with_home("/gw"))
    }

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn substitutes_basic_tokens() {
        let store = MemoryStore::new();
        let ctx = context(Direction::Send);
        let args = interpolate_args(
            &raw(json!({ "out": "#RULE#-#TRANSFERID#", "legacy": "#TRANFERID#" })),
            &ctx,
            &store,
        )
        .unwrap();
        assert_eq!(args.get("out"), Some("push-1000"));
        assert_eq!(args.get("legacy"), Some("1000"));
    }

    #[test]
    fn scalars_are_stringified_and_unknown_tokens_kept() {
        let store = MemoryStore::new();
        let ctx = context(Direction::Send);
        let args = interpolate_args(
            &raw(json!({ "n": 5, "b": true, "z": null, "s": "#NOPE# #FILESIZE#" })),
            &ctx,
            &store,
        )
        .unwrap();
        assert_eq!(args.get("n"), Some("5"));
        assert_eq!(args.get("b"), Some("true"));
        assert_eq!(args.get("z"), Some(""));
        assert_eq!(args.get("s"), Some("#NOPE# 42"));
    }

    #[test]
    fn unknown_token_does_not_swallow_the_next_one() {
        let store = MemoryStore::new();
        let ctx = context(Direction::Send);
        let mut r = ContextResolver::new(&ctx, &store);
        assert_eq!(r.interpolate_str("#x#RULE#").unwrap(), "#xpush");
    }

    #[test]
    fn substitutions_inside_objects_are_json_escaped() {
        let store = MemoryStore::new();
        let mut ctx = context(Direction::Send);
        ctx.transfer.error.details = "say \"hi\"".into();
        let args = interpolate_args(&raw(json!({ "o": { "msg": "#ERRORMSG#" } })), &ctx, &store).unwrap();
        let parsed: Value = serde_json::from_str(args.get("o").unwrap()).unwrap();
        assert_eq!(parsed["msg"], "say \"hi\"");
    }

    #[test]
    fn original_names_depend_on_direction_and_side() {
        let store = MemoryStore::new();
        let mut ctx = context(Direction::Receive);
        {
            let mut r = ContextResolver::new(&ctx, &store);
            assert_eq!(r.interpolate_str("#ORIGINALFULLPATH#").unwrap(), "/remote/file.txt");
            assert_eq!(r.interpolate_str("#ORIGINALFILENAME#").unwrap(), "file.txt");
        }
        ctx.transfer.is_server = true;
        let mut r = ContextResolver::new(&ctx, &store);
        assert_eq!(r.interpolate_str("#ORIGINALFULLPATH#").unwrap(), "dest/file.txt");
    }

    #[test]
    fn dates_use_the_resolver_clock() {
        let store = MemoryStore::new();
        let ctx = context(Direction::Send);
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut r = ContextResolver::at(&ctx, &store, now);
        assert_eq!(r.interpolate_str("#DATE#_#HOUR#").unwrap(), "20240309_020507");
        assert_eq!(r.interpolate_str("#DATE:%Y-%m#").unwrap(), "2024-03");
        assert!(matches!(
            r.interpolate_str("#DATE:%Q#"),
            Err(InterpolationError::DateFormat { .. })
        ));
    }

    #[test]
    fn host_tokens_fail_when_account_is_missing() {
        let store = MemoryStore::new();
        let mut ctx = context(Direction::Send);
        ctx.transfer.remote_account_id = Some(77);
        let mut r = ContextResolver::new(&ctx, &store);
        assert!(r.interpolate_str("#REMOTEHOST#").is_err());
        assert_eq!(r.interpolate_str("#FULLTRANFERID#").unwrap(), "");
        assert_eq!(r.interpolate_str("#ERRORCODE#").unwrap(), "M");
        assert_eq!(r.interpolate_str("#ARCHPATH#").unwrap(), "");
    }

    #[test]
    fn host_tokens_resolve_for_client_transfers() {
        let store = MemoryStore::new();
        let partner = store.add_remote_agent("partner", "sftp").unwrap();
        let account = store.add_remote_account(partner.id, "gw-login").unwrap();

        let mut ctx = context(Direction::Send);
        ctx.transfer.remote_account_id = Some(account.id);
        let mut r = ContextResolver::new(&ctx, &store);
        assert_eq!(r.interpolate_str("#REMOTEHOST#").unwrap(), "partner");
        assert_eq!(r.interpolate_str("#LOCALHOST#").unwrap(), "gw-login");
        assert_eq!(
            r.interpolate_str("#FULLTRANFERID#").unwrap(),
            "1000_gw-login_partner"
        );

        let env = r.environment().unwrap();
        assert!(env.contains(&("#REQUESTEDHOST#".to_string(), "partner".to_string())));
    }

    #[test]
    fn environment_fails_when_the_account_is_gone() {
        let store = MemoryStore::new();
        let mut ctx = context(Direction::Send);

        let env = ContextResolver::new(&ctx, &store).environment().unwrap();
        assert!(env.iter().any(|(k, v)| k == "#RULE#" && !v.is_empty()));
        assert!(!env.iter().any(|(k, _)| k == "#REMOTEHOST#"));

        ctx.transfer.remote_account_id = Some(404);
        let err = ContextResolver::new(&ctx, &store).environment().unwrap_err();
        assert!(matches!(err, InterpolationError::Lookup { ref token, .. } if token == "REMOTEHOST"));
    }

    #[test]
    fn transfer_info_strings_are_verbatim() {
        let store = MemoryStore::new();
        let mut ctx = context(Direction::Send);
        ctx.transfer.transfer_info.insert("who".into(), json!("bob"));
        ctx.transfer.transfer_info.insert("n".into(), json!([1, 2]));
        let mut r = ContextResolver::new(&ctx, &store);
        assert_eq!(r.interpolate_str("#TI_who#/#TI_n#").unwrap(), "bob/[1,2]");
    }
}
