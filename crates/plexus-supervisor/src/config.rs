//! Supervisor tunables and the runner command line.

use std::path::PathBuf;
use std::time::Duration;

use plexus_core::AgentSpec;

/// Timeouts and bounds for supervision.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Deadline for an agent to become ready after spawn
    pub ready_deadline: Duration,
    /// First readiness poll delay
    pub ready_backoff_initial: Duration,
    /// Multiplier applied to the poll delay after each miss
    pub ready_backoff_factor: f64,
    /// Upper bound on the poll delay
    pub ready_backoff_cap: Duration,
    /// Interval between health probes
    pub check_interval: Duration,
    /// Per-probe reply deadline
    pub check_timeout: Duration,
    /// Consecutive probe failures before an agent is unhealthy
    pub failure_threshold: u32,
    /// Restarts allowed within one rolling window
    pub max_restarts: u32,
    /// Length of the rolling restart window
    pub restart_window: Duration,
    /// Wait after a control-socket `shutdown` before escalating
    pub graceful_timeout: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL
    pub terminate_timeout: Duration,
    /// Wait after SIGKILL for the process to be reaped
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_deadline: Duration::from_secs(30),
            ready_backoff_initial: Duration::from_millis(100),
            ready_backoff_factor: 1.5,
            ready_backoff_cap: Duration::from_secs(2),
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(1),
            failure_threshold: 3,
            max_restarts: 5,
            restart_window: Duration::from_secs(3600),
            graceful_timeout: Duration::from_secs(5),
            terminate_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
        }
    }
}

/// Exponential readiness poll schedule: initial delay, multiplied by the
/// factor after each miss, capped.
pub fn ready_backoff(config: &SupervisorConfig) -> impl Iterator<Item = Duration> + '_ {
    let mut delay = config.ready_backoff_initial;
    std::iter::from_fn(move || {
        let current = delay;
        let next = delay.mul_f64(config.ready_backoff_factor);
        delay = next.min(config.ready_backoff_cap);
        Some(current)
    })
}

/// The command used to spawn an agent process.
///
/// Defaults to re-invoking the current executable with the hidden
/// `agent-runner` subcommand; tests substitute their own program.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl RunnerCommand {
    /// Spawn agents by re-invoking this executable.
    ///
    /// # Errors
    ///
    /// Returns an error when the current executable path is unknown.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["agent-runner".to_string()],
        })
    }

    /// Spawn agents with an explicit program and leading arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Build the spawn command for one descriptor.
    ///
    /// The child gets a null stdin/stdout/stderr and is not killed when
    /// the handle drops: agents survive supervisor exit.
    ///
    /// # Errors
    ///
    /// Serialization of the descriptor (practically infallible).
    pub fn command(&self, spec: &AgentSpec) -> Result<tokio::process::Command, serde_json::Error> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--spec")
            .arg(serde_json::to_string(spec)?)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(false);
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_backoff_schedule() {
        let config = SupervisorConfig::default();
        let delays: Vec<Duration> = ready_backoff(&config).take(10).collect();

        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(150));
        assert_eq!(delays[2], Duration::from_millis(225));
        // Grows monotonically and caps at 2 s.
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[9], Duration::from_secs(2));
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.ready_deadline, Duration::from_secs(30));
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.check_timeout, Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.max_restarts, 5);
        assert_eq!(config.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.terminate_timeout, Duration::from_secs(2));
    }
}
