//! Control protocol: one JSON object per line in each direction.
//!
//! Every request carries a `cmd` tag; every reply is either an object
//! with a `status` field or `{"error": "..."}`. Unknown fields are
//! ignored on the way in, so clients may attach `_meta`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use plexus_core::MetricsFormat;

/// Error string replied to an unrecognized `cmd`.
pub const CONTROL_ERROR_UNKNOWN_COMMAND: &str = "unknown_command";

/// Requests accepted on the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Readiness/health probe
    Health,

    /// Add `peer` to the routing table
    Connect { peer: String, endpoint: String },

    /// Remove `peer` from the routing table (no error if absent)
    Disconnect { peer: String },

    /// Snapshot the routing table
    ListConnections,

    /// Metrics snapshot, JSON by default
    Metrics {
        #[serde(default)]
        format: MetricsFormat,
    },

    /// Long-lived event stream, optionally replaying from `since_seq`
    SubscribeEvents {
        #[serde(default)]
        since_seq: Option<u64>,
    },

    /// Inject a user turn and wait for the reasoning loop to quiesce
    Chat {
        message: String,
        #[serde(default)]
        correlation_id: Option<String>,
    },

    /// Graceful exit
    Shutdown,
}

/// Readiness state reported by `health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Peer transport listening, reasoning loop accepting input
    Ready,
    /// Socket up but the runtime is still wiring itself
    Starting,
}

/// Reply to the `health` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub status: HealthState,
    pub peer_port: u16,
    pub peers: Vec<String>,
    pub uptime_s: u64,
}

/// Errors raised by the control client.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Socket missing or connection refused
    #[error("cannot reach control socket: {0}")]
    Connection(std::io::Error),

    /// I/O failure mid-exchange
    #[error("control I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reply was not valid JSON or missed expected fields
    #[error("malformed control reply: {0}")]
    Malformed(String),

    /// Agent answered `{"error": ...}`
    #[error("agent error: {0}")]
    Remote(String),

    /// The exchange exceeded its deadline
    #[error("control request timed out")]
    Timeout,

    /// Stream ended before a final reply
    #[error("connection closed by agent")]
    Closed,
}

/// Parse one reply line, separating remote errors from payloads.
///
/// # Errors
///
/// `Malformed` when the line is not a JSON object, `Remote` when the
/// agent reported an error.
pub fn parse_reply(line: &str) -> Result<Value, ControlError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ControlError::Malformed(e.to_string()))?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ControlError::Remote(error.to_string()));
    }
    Ok(value)
}
