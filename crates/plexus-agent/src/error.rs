//! Agent runtime error types.

use thiserror::Error;

/// Errors that can occur inside an agent process.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Model call failed after the retry budget
    #[error("model failure: {0}")]
    Model(#[from] plexus_llm::ProviderError),

    /// Peer transport could not start
    #[error(transparent)]
    Peer(#[from] plexus_peer::PeerError),

    /// Another live agent already owns this name's control socket
    #[error("control socket {0} is in use: an agent with this name is already running")]
    NameCollision(String),

    /// Routing-table rejection
    #[error("agent cannot connect to itself")]
    SelfConnect,

    /// Shutdown in progress; new and in-flight turns are refused
    #[error("agent is shutting down")]
    ShuttingDown,

    /// Socket or filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor failed validation at startup
    #[error(transparent)]
    Spec(#[from] plexus_core::SpecError),
}
