// src/model/agent.rs

/// A server hosted by this gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAgent {
    pub id: i64,
    pub name: String,
    pub protocol: String,
    pub address: String,
}

/// A partner this gateway connects to as a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAgent {
    pub id: i64,
    pub name: String,
    pub protocol: String,
    pub address: String,
}

/// An account partners use to log into a local agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAccount {
    pub id: i64,
    pub local_agent_id: i64,
    pub login: String,
}

/// An account this gateway uses to log into a partner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAccount {
    pub id: i64,
    pub remote_agent_id: i64,
    pub login: String,
}
