//! # plexus-agent
//!
//! The per-process agent runtime. One [`AgentRuntime`] owns the reasoning
//! loop, the peer routing table, the conversation log and the event
//! stream; [`control`] serves the operator-facing socket and [`runner`]
//! is the process entry point the supervisor spawns.

pub mod control;
pub mod conversation;
mod error;
pub mod routing;
pub mod runner;
pub mod runtime;

pub use error::AgentError;
pub use routing::RoutingTable;
pub use runtime::{AgentRuntime, Origin};
