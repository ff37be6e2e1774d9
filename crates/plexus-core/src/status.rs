//! Supervisor-visible agent lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised agent process.
///
/// Transitions are monotone through the lifecycle except for the
/// `Running <-> Unhealthy` flips driven by the health loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Process spawned, readiness handshake pending
    Starting,
    /// Readiness confirmed, control socket answering
    Running,
    /// Consecutive health probes failed; recovery in progress
    Unhealthy,
    /// Startup deadline exceeded or restart budget exhausted
    Failed,
    /// Graceful shutdown in progress
    Stopping,
    /// Process exited; record retained until removed by the operator
    #[default]
    Stopped,
}

impl AgentStatus {
    /// Whether the health loop should probe an agent in this state.
    #[must_use]
    pub fn is_probed(self) -> bool {
        matches!(self, Self::Running | Self::Unhealthy)
    }

    /// Whether a transition from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use AgentStatus::{Failed, Running, Starting, Stopped, Stopping, Unhealthy};
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running | Failed)
                | (Running, Unhealthy | Stopping | Failed)
                | (Unhealthy, Running | Stopping | Failed | Starting)
                | (Stopping, Stopped)
                | (Failed, Starting)
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_flip_is_legal_both_ways() {
        assert!(AgentStatus::Running.can_transition(AgentStatus::Unhealthy));
        assert!(AgentStatus::Unhealthy.can_transition(AgentStatus::Running));
    }

    #[test]
    fn test_no_resurrection_without_restart() {
        assert!(!AgentStatus::Stopped.can_transition(AgentStatus::Running));
        assert!(!AgentStatus::Failed.can_transition(AgentStatus::Running));
        assert!(AgentStatus::Failed.can_transition(AgentStatus::Starting));
    }

    #[test]
    fn test_probed_states() {
        assert!(AgentStatus::Running.is_probed());
        assert!(AgentStatus::Unhealthy.is_probed());
        assert!(!AgentStatus::Starting.is_probed());
        assert!(!AgentStatus::Stopped.is_probed());
    }
}
