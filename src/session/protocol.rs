//! NDJSON wire messages exchanged with an interpreter session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProtocolError;

pub type MessageId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Request {
    ExecuteRequest { id: MessageId, code: String },
    InterruptRequest { id: MessageId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Reply {
    Stream {
        id: MessageId,
        name: StreamName,
        text: String,
    },
    /// Terminal message for `id`; always the last one for that id.
    ExecuteReply {
        id: MessageId,
        status: Status,
        #[serde(default)]
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evalue: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        traceback: Vec<String>,
    },
}

impl Reply {
    pub fn id(&self) -> MessageId {
        match self {
            Reply::Stream { id, .. } | Reply::ExecuteReply { id, .. } => *id,
        }
    }
}

pub fn encode(request: &Request) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line. On failure, also returns the message id when the line
/// was at least a JSON object carrying one, so the caller can fail that
/// request instead of guessing.
pub fn decode(line: &str) -> Result<Reply, (ProtocolError, Option<MessageId>)> {
    serde_json::from_str::<Reply>(line).map_err(|err| {
        let id = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_u64));
        (ProtocolError::Malformed(err.to_string()), id)
    })
}
