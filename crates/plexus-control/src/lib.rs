//! # plexus-control
//!
//! The operator-facing control plane of a single agent: a line-delimited
//! JSON protocol over a local Unix socket. This crate holds the protocol
//! types, the deterministic socket/log/registry paths, and the async
//! client used by the supervisor and the CLI. The server side lives in
//! the agent runtime.

mod client;
pub mod paths;
pub mod protocol;

pub use client::{ControlClient, EventStream};
pub use protocol::{
    ControlError, ControlRequest, HealthReply, HealthState, CONTROL_ERROR_UNKNOWN_COMMAND,
};
