//! Supervisor error types.

use thiserror::Error;

use plexus_control::ControlError;

/// Phase at which a `connect` request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    /// Looking up the target agent's endpoint in the registry
    Resolve,
    /// Delivering the control request to the source agent
    Dispatch,
    /// Source agent refused the peer (e.g. self-connect)
    Acknowledge,
}

impl std::fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resolve => "resolve",
            Self::Dispatch => "dispatch",
            Self::Acknowledge => "acknowledge",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Name not present in the registry
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Descriptor name already registered
    #[error("agent {0} already exists")]
    DuplicateAgent(String),

    /// Descriptor port already claimed by another agent
    #[error("port {port} is already used by agent {taken_by}")]
    DuplicatePort {
        /// Requested port
        port: u16,
        /// Agent holding it
        taken_by: String,
    },

    /// Operation requires a running agent
    #[error("agent {0} is not running")]
    NotRunning(String),

    /// Agent did not reach readiness before the deadline
    #[error("agent {name} failed to start: {reason}")]
    Startup {
        /// Agent name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Peer link establishment failed
    #[error("connect {from} -> {to} failed during {phase}: {reason}")]
    Connect {
        /// Source agent
        from: String,
        /// Target agent
        to: String,
        /// Failing phase
        phase: ConnectPhase,
        /// What went wrong
        reason: String,
    },

    /// Control-plane exchange failed
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Descriptor failed validation
    #[error(transparent)]
    Spec(#[from] plexus_core::SpecError),

    /// Filesystem or process failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
