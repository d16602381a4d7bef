// src/model/context.rs

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::{LocalAccount, LocalAgent, RemoteAccount, RemoteAgent, Rule, Transfer};

/// `[paths]` section: gateway-wide directory layout.
///
/// ```toml
/// [paths]
/// gateway_home = "/var/lib/gateway"
/// default_in_dir = "in"
/// default_out_dir = "out"
/// default_tmp_dir = "tmp"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Paths {
    #[serde(default = "default_home")]
    pub gateway_home: PathBuf,

    #[serde(default = "default_in_dir")]
    pub default_in_dir: PathBuf,

    #[serde(default = "default_out_dir")]
    pub default_out_dir: PathBuf,

    #[serde(default = "default_tmp_dir")]
    pub default_tmp_dir: PathBuf,
}

fn default_home() -> PathBuf {
    PathBuf::from(".")
}

fn default_in_dir() -> PathBuf {
    PathBuf::from("in")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            gateway_home: default_home(),
            default_in_dir: default_in_dir(),
            default_out_dir: default_out_dir(),
            default_tmp_dir: default_tmp_dir(),
        }
    }
}

impl Paths {
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            gateway_home: home.into(),
            ..Self::default()
        }
    }

    /// Resolve `dir` against the gateway home unless it is already absolute.
    pub fn under_home(&self, dir: impl AsRef<Path>) -> PathBuf {
        self.gateway_home.join(dir)
    }
}

/// Everything a task may look at while it runs.
///
/// Server transfers carry the local agent and account the partner logged
/// into; client transfers carry the remote agent and account used to reach
/// the partner.
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub transfer: Transfer,
    pub rule: Rule,
    pub local_agent: Option<LocalAgent>,
    pub local_account: Option<LocalAccount>,
    pub remote_agent: Option<RemoteAgent>,
    pub remote_account: Option<RemoteAccount>,
    pub paths: Paths,
}

impl TransferContext {
    pub fn new(transfer: Transfer, rule: Rule, paths: Paths) -> Self {
        Self {
            transfer,
            rule,
            local_agent: None,
            local_account: None,
            remote_agent: None,
            remote_account: None,
            paths,
        }
    }

    /// Directory received files land in.
    pub fn in_dir(&self) -> PathBuf {
        if !self.rule.is_send() && !self.rule.local_dir.is_empty() {
            return self.paths.under_home(&self.rule.local_dir);
        }
        self.paths.under_home(&self.paths.default_in_dir)
    }

    /// Directory files to send are taken from.
    pub fn out_dir(&self) -> PathBuf {
        if self.rule.is_send() && !self.rule.local_dir.is_empty() {
            return self.paths.under_home(&self.rule.local_dir);
        }
        self.paths.under_home(&self.paths.default_out_dir)
    }

    /// Directory receptions are written to before completion.
    pub fn work_dir(&self) -> PathBuf {
        if !self.rule.tmp_local_rcv_dir.is_empty() {
            return self.paths.under_home(&self.rule.tmp_local_rcv_dir);
        }
        self.paths.under_home(&self.paths.default_tmp_dir)
    }

    /// The file the chain currently operates on.
    pub fn file(&self) -> &Path {
        &self.transfer.local_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn ctx(direction: Direction, local_dir: &str) -> TransferContext {
        let mut rule = Rule::new("r", direction);
        rule.local_dir = local_dir.to_string();
        TransferContext::new(Transfer::default(), rule, Paths::with_home("/gw"))
    }

    #[test]
    fn rule_dir_overrides_the_matching_default_only() {
        let recv = ctx(Direction::Receive, "incoming");
        assert_eq!(recv.in_dir(), PathBuf::from("/gw/incoming"));
        assert_eq!(recv.out_dir(), PathBuf::from("/gw/out"));

        let send = ctx(Direction::Send, "/abs/outgoing");
        assert_eq!(send.in_dir(), PathBuf::from("/gw/in"));
        assert_eq!(send.out_dir(), PathBuf::from("/abs/outgoing"));
    }

    #[test]
    fn work_dir_falls_back_to_default_tmp() {
        let mut c = ctx(Direction::Receive, "");
        assert_eq!(c.work_dir(), PathBuf::from("/gw/tmp"));
        c.rule.tmp_local_rcv_dir = "work".to_string();
        assert_eq!(c.work_dir(), PathBuf::from("/gw/work"));
    }
}
