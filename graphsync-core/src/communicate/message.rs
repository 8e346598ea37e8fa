/*
    message.rs - Wire messages exchanged by host and client

    One JSON object per frame, discriminated by `cmd`:
    ```json
    {"cmd": "update", "data": {"updated_member": [...], ...}}
    ```
    `responce` is the historical spelling of a forwarded call request and is
    kept on the wire.
*/

use crate::codec::Snapshot;
use crate::error::{SyncError, SyncResult};
use crate::sync::Delta;
use serde::{Deserialize, Serialize};

const COMMANDS: [&str; 10] = [
    "init", "start", "sync", "update", "updated", "echo", "end", "exception", "responce", "return",
];

/// Reply the host gives a successful `init`
pub const INIT_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Message {
    /// Client offers its graph; host answers with `data: "success"`
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shared_object: Option<Snapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    Start {
        conflict: u8,
        configure: Snapshot,
    },
    /// Host asks for a snapshot; client answers with one
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shared_object: Option<Snapshot>,
    },
    Update {
        data: Delta,
    },
    Updated,
    Echo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<i64>,
    },
    End {
        result: EndResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Exception {
        #[serde(default)]
        message: String,
    },
    /// Forwarded call request
    Responce {
        data: Snapshot,
    },
    Return {
        data: Snapshot,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndResult {
    Complete,
    Abort,
    Error,
    Exception,
}

impl Message {
    pub fn end(result: EndResult) -> Self {
        Message::End { result, message: None }
    }

    /// Exception message carrying a rendered error
    pub fn exception(err: &SyncError) -> Self {
        Message::Exception { message: err.render() }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Message::Init { .. } => "init",
            Message::Start { .. } => "start",
            Message::Sync { .. } => "sync",
            Message::Update { .. } => "update",
            Message::Updated => "updated",
            Message::Echo { .. } => "echo",
            Message::End { .. } => "end",
            Message::Exception { .. } => "exception",
            Message::Responce { .. } => "responce",
            Message::Return { .. } => "return",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::Send(e.to_string()))
    }

    /// Parse one message, telling a missing or unknown `cmd` apart from a
    /// malformed body
    pub fn parse(text: &str) -> SyncResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SyncError::Recv(format!("{} {}", e, text)))?;

        let cmd = value
            .get("cmd")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SyncError::Communicate("message format error".to_string()))?;
        if !COMMANDS.contains(&cmd) {
            return Err(SyncError::Communicate(format!("unknown command {}", cmd)));
        }

        serde_json::from_value(value)
            .map_err(|e| SyncError::Communicate(format!("message format error - {}", e)))
    }
}
