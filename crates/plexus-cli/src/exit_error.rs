//! Error type carrying a process exit code.
//!
//! Commands return `ExitError` instead of calling `std::process::exit()`
//! directly, so `main()` owns process termination. Codes: 1 operator
//! error, 2 agent failure, 3 transport error.

use std::fmt;

use plexus_supervisor::{ConnectPhase, SupervisorError};

/// Operator mistake (bad arguments, unknown name).
pub const EXIT_OPERATOR: i32 = 1;
/// One or more agents failed to start or exited.
pub const EXIT_AGENT: i32 = 2;
/// Control or peer transport failure.
pub const EXIT_TRANSPORT: i32 = 3;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn operator(message: impl Into<String>) -> Self {
        Self::new(EXIT_OPERATOR, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<SupervisorError> for ExitError {
    fn from(e: SupervisorError) -> Self {
        let code = match &e {
            SupervisorError::UnknownAgent(_)
            | SupervisorError::DuplicateAgent(_)
            | SupervisorError::DuplicatePort { .. }
            | SupervisorError::NotRunning(_)
            | SupervisorError::Spec(_) => EXIT_OPERATOR,
            SupervisorError::Startup { .. } => EXIT_AGENT,
            SupervisorError::Connect { phase, .. } => match phase {
                ConnectPhase::Resolve | ConnectPhase::Acknowledge => EXIT_OPERATOR,
                ConnectPhase::Dispatch => EXIT_TRANSPORT,
            },
            SupervisorError::Control(_) | SupervisorError::Io(_) => EXIT_TRANSPORT,
        };
        Self::new(code, e.to_string())
    }
}

impl From<plexus_control::ControlError> for ExitError {
    fn from(e: plexus_control::ControlError) -> Self {
        Self::new(EXIT_TRANSPORT, e.to_string())
    }
}

impl From<std::io::Error> for ExitError {
    fn from(e: std::io::Error) -> Self {
        Self::new(EXIT_TRANSPORT, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_mapping() {
        let e: ExitError = SupervisorError::UnknownAgent("ghost".into()).into();
        assert_eq!(e.code, EXIT_OPERATOR);

        let e: ExitError =
            SupervisorError::Startup { name: "alice".into(), reason: "deadline".into() }.into();
        assert_eq!(e.code, EXIT_AGENT);

        let e: ExitError = SupervisorError::Connect {
            from: "a".into(),
            to: "b".into(),
            phase: ConnectPhase::Dispatch,
            reason: "socket gone".into(),
        }
        .into();
        assert_eq!(e.code, EXIT_TRANSPORT);
    }
}
