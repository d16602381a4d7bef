// src/model/rule.rs

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{Chain, Direction};

/// One configured step of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDef {
    pub chain: Chain,
    /// Position inside the chain, starting at 0.
    pub rank: u32,
    /// Type name, used as the registry key.
    pub kind: String,
    /// Raw argument object, interpolated before each run.
    pub args: Map<String, Value>,
}

impl TaskDef {
    /// Identity of the step as configured: type plus raw arguments.
    ///
    /// Uses the first 16 bytes of SHA-256 (32 hex characters).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(Value::Object(self.args.clone()).to_string().as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// `{ type, args }` as written in configuration files.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub args: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// A transfer rule and its three task chains.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub direction: Direction,
    pub local_dir: String,
    pub remote_dir: String,
    pub tmp_local_rcv_dir: String,
    pub pre: Vec<TaskDef>,
    pub post: Vec<TaskDef>,
    pub error: Vec<TaskDef>,
}

impl Rule {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: 0,
            name: name.into(),
            direction,
            local_dir: String::new(),
            remote_dir: String::new(),
            tmp_local_rcv_dir: String::new(),
            pre: Vec::new(),
            post: Vec::new(),
            error: Vec::new(),
        }
    }

    pub fn is_send(&self) -> bool {
        self.direction.is_send()
    }

    pub fn tasks(&self, chain: Chain) -> &[TaskDef] {
        match chain {
            Chain::Pre => &self.pre,
            Chain::Post => &self.post,
            Chain::Error => &self.error,
        }
    }

    /// Replace a chain, assigning ranks in list order.
    pub fn set_chain(&mut self, chain: Chain, specs: Vec<TaskSpec>) {
        let defs = specs
            .into_iter()
            .enumerate()
            .map(|(rank, spec)| TaskDef {
                chain,
                rank: rank as u32,
                kind: spec.kind,
                args: spec.args,
            })
            .collect();

        match chain {
            Chain::Pre => self.pre = defs,
            Chain::Post => self.post = defs,
            Chain::Error => self.error = defs,
        }
    }
}
