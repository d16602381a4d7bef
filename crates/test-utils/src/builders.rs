#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::Value;
use taskgate::model::{
    LocalAccount, LocalAgent, Paths, RemoteAccount, RemoteAgent, Rule, TaskSpec, Transfer,
    TransferContext,
};
use taskgate::types::{Chain, Direction};

/// Builder for `Rule` to simplify test setup. Ranks follow insertion order.
pub struct RuleBuilder {
    rule: Rule,
    pre: Vec<TaskSpec>,
    post: Vec<TaskSpec>,
    error: Vec<TaskSpec>,
}

impl RuleBuilder {
    pub fn new(name: &str, direction: Direction) -> Self {
        Self {
            rule: Rule::new(name, direction),
            pre: Vec::new(),
            post: Vec::new(),
            error: Vec::new(),
        }
    }

    pub fn local_dir(mut self, dir: &str) -> Self {
        self.rule.local_dir = dir.to_string();
        self
    }

    pub fn tmp_dir(mut self, dir: &str) -> Self {
        self.rule.tmp_local_rcv_dir = dir.to_string();
        self
    }

    pub fn task(mut self, chain: Chain, spec: TaskSpec) -> Self {
        match chain {
            Chain::Pre => self.pre.push(spec),
            Chain::Post => self.post.push(spec),
            Chain::Error => self.error.push(spec),
        }
        self
    }

    pub fn pre(self, spec: TaskSpec) -> Self {
        self.task(Chain::Pre, spec)
    }

    pub fn post(self, spec: TaskSpec) -> Self {
        self.task(Chain::Post, spec)
    }

    pub fn error(self, spec: TaskSpec) -> Self {
        self.task(Chain::Error, spec)
    }

    pub fn build(self) -> Rule {
        let mut rule = self.rule;
        rule.set_chain(Chain::Pre, self.pre);
        rule.set_chain(Chain::Post, self.post);
        rule.set_chain(Chain::Error, self.error);
        rule
    }
}

/// Builder for `Transfer`.
pub struct TransferBuilder {
    transfer: Transfer,
}

impl TransferBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            transfer: Transfer {
                id,
                filesize: -1,
                ..Transfer::default()
            },
        }
    }

    pub fn local_path(mut self, path: impl AsRef<Path>) -> Self {
        self.transfer.local_path = path.as_ref().to_path_buf();
        self
    }

    pub fn remote_path(mut self, path: &str) -> Self {
        self.transfer.remote_path = path.to_string();
        self
    }

    pub fn filesize(mut self, size: i64) -> Self {
        self.transfer.filesize = size;
        self
    }

    pub fn server(mut self) -> Self {
        self.transfer.is_server = true;
        self
    }

    pub fn info(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.transfer.transfer_info.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Transfer {
        self.transfer
    }
}

/// Builder for `TransferContext`. The transfer's `rule` field follows the
/// rule given here.
pub struct ContextBuilder {
    ctx: TransferContext,
}

impl ContextBuilder {
    pub fn new(rule: Rule, transfer: Transfer) -> Self {
        let mut transfer = transfer;
        transfer.rule = rule.name.clone();
        Self {
            ctx: TransferContext::new(transfer, rule, Paths::default()),
        }
    }

    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.ctx.paths = Paths::with_home(home);
        self
    }

    pub fn local(mut self, agent: LocalAgent, account: LocalAccount) -> Self {
        self.ctx.transfer.is_server = true;
        self.ctx.transfer.local_account_id = Some(account.id);
        self.ctx.local_agent = Some(agent);
        self.ctx.local_account = Some(account);
        self
    }

    pub fn remote(mut self, agent: RemoteAgent, account: RemoteAccount) -> Self {
        self.ctx.transfer.is_server = false;
        self.ctx.transfer.remote_account_id = Some(account.id);
        self.ctx.remote_agent = Some(agent);
        self.ctx.remote_account = Some(account);
        self
    }

    pub fn build(self) -> TransferContext {
        self.ctx
    }
}

/// Shorthand for a `TaskSpec` with string arguments.
pub fn spec(kind: &str, args: &[(&str, &str)]) -> TaskSpec {
    args.iter()
        .fold(TaskSpec::new(kind), |spec, (k, v)| spec.arg(k, *v))
}
