// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three task lists a rule carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Pre,
    Post,
    Error,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Pre, Chain::Post, Chain::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Pre => "PRE",
            Chain::Post => "POST",
            Chain::Error => "ERROR",
        }
    }

    /// The transfer step recorded while this chain is running.
    pub fn step(self) -> TransferStep {
        match self {
            Chain::Pre => TransferStep::PreTasks,
            Chain::Post => TransferStep::PostTasks,
            Chain::Error => TransferStep::ErrorTasks,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRE" => Ok(Chain::Pre),
            "POST" => Ok(Chain::Post),
            "ERROR" => Ok(Chain::Error),
            other => Err(format!(
                "invalid chain '{}'; expected 'pre', 'post' or 'error'",
                other
            )),
        }
    }
}

/// Whether a rule sends or receives files, from the gateway's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn is_send(self) -> bool {
        matches!(self, Direction::Send)
    }

    pub fn from_is_send(is_send: bool) -> Self {
        if is_send {
            Direction::Send
        } else {
            Direction::Receive
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "send" => Ok(Direction::Send),
            "receive" | "recv" => Ok(Direction::Receive),
            other => Err(format!(
                "invalid direction '{}'; expected 'send' or 'receive'",
                other
            )),
        }
    }
}

/// Lifecycle stage of a transfer. The runner uses it together with
/// `task_number` as the resume key of a chain.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum TransferStep {
    #[default]
    None,
    PreTasks,
    PostTasks,
    ErrorTasks,
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStep::None => "StepNone",
            TransferStep::PreTasks => "StepPreTasks",
            TransferStep::PostTasks => "StepPostTasks",
            TransferStep::ErrorTasks => "StepErrorTasks",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    #[default]
    Planned,
    Running,
    Error,
}

/// Classification of the last error recorded on a transfer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[default]
    Ok,
    Unknown,
    Internal,
    Unimplemented,
    Connection,
    ConnectionReset,
    UnknownRemote,
    ExceededLimit,
    BadAuthentication,
    DataTransfer,
    Integrity,
    Finalization,
    ExternalOperation,
    Warning,
    Stopped,
    Canceled,
    FileNotFound,
    Forbidden,
    BadSize,
    ShuttingDown,
}

impl ErrorCode {
    const NAMES: [(ErrorCode, &'static str, char); 20] = [
        (ErrorCode::Ok, "TeOk", 'O'),
        (ErrorCode::Unknown, "TeUnknown", '.'),
        (ErrorCode::Internal, "TeInternal", 'I'),
        (ErrorCode::Unimplemented, "TeUnimplemented", 'U'),
        (ErrorCode::Connection, "TeConnection", 'C'),
        (ErrorCode::ConnectionReset, "TeConnectionReset", 'D'),
        (ErrorCode::UnknownRemote, "TeUnknownRemote", 'N'),
        (ErrorCode::ExceededLimit, "TeExceededLimit", 'l'),
        (ErrorCode::BadAuthentication, "TeBadAuthentication", 'A'),
        (ErrorCode::DataTransfer, "TeDataTransfer", 'T'),
        (ErrorCode::Integrity, "TeIntegrity", 'M'),
        (ErrorCode::Finalization, "TeFinalization", 'F'),
        (ErrorCode::ExternalOperation, "TeExternalOperation", 'E'),
        (ErrorCode::Warning, "TeWarning", 'w'),
        (ErrorCode::Stopped, "TeStopped", 'H'),
        (ErrorCode::Canceled, "TeCanceled", 'K'),
        (ErrorCode::FileNotFound, "TeFileNotFound", 'f'),
        (ErrorCode::Forbidden, "TeForbidden", 'a'),
        (ErrorCode::BadSize, "TeBadSize", 'd'),
        (ErrorCode::ShuttingDown, "TeShuttingDown", 'S'),
    ];

    fn entry(self) -> (ErrorCode, &'static str, char) {
        Self::NAMES
            .iter()
            .copied()
            .find(|(code, _, _)| *code == self)
            .unwrap_or((ErrorCode::Unknown, "TeUnknown", '.'))
    }

    pub fn as_str(self) -> &'static str {
        self.entry().1
    }

    /// Single-character code used by the R66 protocol.
    pub fn r66_code(self) -> char {
        self.entry().2
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    /// Unrecognised names map to `TeUnknown`, an empty string to `TeOk`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(ErrorCode::Ok);
        }
        Ok(Self::NAMES
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(code, _, _)| *code)
            .unwrap_or(ErrorCode::Unknown))
    }
}
