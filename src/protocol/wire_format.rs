//! Envelope records and command names.
//!
//! Every request starts with a [`RequestHeader`] and every response with a
//! [`ResponseHeader`]. Either may be followed by one body record, depending
//! on the command. Field names are the agent's (`Command`, `Seq`, `Error`).

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Highest IPC protocol version this client speaks.
pub const MAX_IPC_VERSION: i32 = 1;

/// Command names understood by the agent.
pub mod commands {
    pub const HANDSHAKE: &str = "handshake";
    pub const AUTH: &str = "auth";
    pub const EVENT: &str = "event";
    pub const FORCE_LEAVE: &str = "force-leave";
    pub const JOIN: &str = "join";
    pub const MEMBERS: &str = "members";
    pub const MEMBERS_FILTERED: &str = "members-filtered";
    pub const STREAM: &str = "stream";
    pub const STOP: &str = "stop";
    pub const MONITOR: &str = "monitor";
    pub const LEAVE: &str = "leave";
    pub const TAGS: &str = "tags";
    pub const STATS: &str = "stats";
    pub const RESPOND: &str = "respond";
}

/// Header preceding every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestHeader {
    pub command: String,
    pub seq: u64,
}

impl RequestHeader {
    pub fn new(command: &str, seq: u64) -> Self {
        Self {
            command: command.to_string(),
            seq,
        }
    }
}

/// Header preceding every response.
///
/// Both fields default when absent. A body record that ends up in header
/// position (its owner already deregistered) then reads as seq 0, which is
/// never allocated, and gets discarded as unrouted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub error: String,
}

impl ResponseHeader {
    /// Whether the agent reported success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// The agent's verdict. A non-empty error becomes
    /// [`ClientError::Remote`] with the message verbatim.
    pub fn status(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Remote(self.error.clone()))
        }
    }
}
