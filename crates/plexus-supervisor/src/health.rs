//! Health loop and the rolling restart budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::supervisor::Supervisor;

/// Rolling window of restart timestamps.
///
/// The budget resets implicitly: timestamps older than the window are
/// pruned on every query, so a quiet hour forgives earlier restarts.
#[derive(Debug, Default)]
pub struct RestartWindow {
    timestamps: Vec<Instant>,
}

impl RestartWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to consume one restart slot at `now`. Returns `false` when the
    /// window already holds `max` restarts.
    pub fn try_acquire(&mut self, now: Instant, max: usize, window: Duration) -> bool {
        self.timestamps.retain(|t| now.duration_since(*t) < window);
        if self.timestamps.len() >= max {
            return false;
        }
        self.timestamps.push(now);
        true
    }

    /// Restarts currently inside the window (as of the last acquire).
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no restarts are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Forget all recorded restarts (manual operator restart).
    pub fn reset(&mut self) {
        self.timestamps.clear();
    }
}

/// Periodic health probing with bounded auto-recovery.
///
/// Probe failures are never propagated to callers; they flip status,
/// emit events on the supervisor bus and drive recovery.
pub struct HealthMonitor {
    supervisor: Arc<Supervisor>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor, task: Mutex::new(None) }
    }

    /// Start the background loop; idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let supervisor = Arc::clone(&self.supervisor);
        *task = Some(tokio::spawn(async move {
            let interval = supervisor.config().check_interval;
            loop {
                tokio::time::sleep(interval).await;
                check_all(&supervisor).await;
            }
        }));
        info!("health monitoring started");
    }

    /// Stop the background loop.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("health monitoring stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One probe round over every probed agent.
pub(crate) async fn check_all(supervisor: &Supervisor) {
    for name in supervisor.probed_agents() {
        let healthy = supervisor.probe_health(&name).await;
        if supervisor.note_probe(&name, healthy) {
            supervisor.recover(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunnerCommand, SupervisorConfig};
    use plexus_control::paths;
    use plexus_core::{AgentSpec, AgentStatus, EventKind};

    const WINDOW: Duration = Duration::from_secs(3600);

    fn spec(name: &str, port: u16) -> AgentSpec {
        AgentSpec::new(name, port, "openai", "gpt-4o", "helper").unwrap()
    }

    /// Minimal control-socket stub that answers `health` with `ready`.
    async fn spawn_ready_stub(path: std::path::PathBuf) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut line = String::new();
                    if BufReader::new(read_half).read_line(&mut line).await.is_ok() {
                        let reply = "{\"status\":\"ready\",\"peer_port\":1,\"peers\":[],\"uptime_s\":1}\n";
                        let _ = write_half.write_all(reply.as_bytes()).await;
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn test_probe_against_ready_stub_clears_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(
            SupervisorConfig::default(),
            RunnerCommand::new("/bin/false", vec![]),
            dir.path().to_path_buf(),
        );
        sup.add(spec("alice", 18551)).unwrap();
        sup.force_status("alice", AgentStatus::Unhealthy);

        spawn_ready_stub(paths::socket_path(dir.path(), "alice")).await;

        assert!(sup.probe_health("alice").await);
        assert!(!sup.note_probe("alice", true));
        // A healthy probe flips unhealthy back to running.
        assert_eq!(sup.status()[0].status, AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_recovery_is_bounded_by_restart_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            failure_threshold: 2,
            max_restarts: 2,
            ready_deadline: Duration::from_millis(200),
            check_timeout: Duration::from_millis(50),
            graceful_timeout: Duration::from_millis(100),
            terminate_timeout: Duration::from_millis(100),
            kill_grace: Duration::from_millis(100),
            ..SupervisorConfig::default()
        };
        let sup = Supervisor::new(
            config,
            // Crashes on every start, so each recovery attempt fails.
            RunnerCommand::new("/bin/false", vec![]),
            dir.path().to_path_buf(),
        );
        sup.add(spec("alice", 18552)).unwrap();
        let mut sub = sup.events().subscribe(Some(1));

        // Three rounds of: agent looks alive in the registry, probes fail
        // past the threshold, recovery runs.
        for _ in 0..3 {
            sup.force_status("alice", AgentStatus::Running);
            check_all(&sup).await; // failure 1 of 2
            check_all(&sup).await; // failure 2 -> unhealthy -> recover
        }

        // Two restarts were attempted, the third hit the exhausted budget.
        let mut health_failures = 0;
        let mut exhausted = 0;
        while let Some(record) = sub.try_next() {
            if record.kind == EventKind::Error {
                match record.payload["kind"].as_str() {
                    Some("health_failure") => health_failures += 1,
                    Some("restart_budget_exhausted") => exhausted += 1,
                    _ => {}
                }
            }
        }
        assert_eq!(health_failures, 2);
        assert_eq!(exhausted, 1);
        assert_eq!(sup.status()[0].status, AgentStatus::Failed);

        // No further recovery once failed: nothing left to probe.
        assert!(sup.probed_agents().is_empty());
    }

    #[test]
    fn test_budget_is_bounded() {
        let mut window = RestartWindow::new();
        let now = Instant::now();

        assert!(window.try_acquire(now, 3, WINDOW));
        assert!(window.try_acquire(now, 3, WINDOW));
        assert!(window.try_acquire(now, 3, WINDOW));
        assert!(!window.try_acquire(now, 3, WINDOW));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_budget_resets_when_window_elapses() {
        let mut window = RestartWindow::new();
        let start = Instant::now();

        assert!(window.try_acquire(start, 1, WINDOW));
        assert!(!window.try_acquire(start, 1, WINDOW));

        // One window later the old restart has aged out.
        let later = start + WINDOW + Duration::from_secs(1);
        assert!(window.try_acquire(later, 1, WINDOW));
    }

    #[tokio::test]
    async fn test_monitor_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Arc::new(Supervisor::new(
            SupervisorConfig::default(),
            RunnerCommand::new("/bin/false", vec![]),
            dir.path().to_path_buf(),
        ));

        let monitor = HealthMonitor::new(Arc::clone(&sup));
        monitor.start();
        monitor.start();
        monitor.stop();
        monitor.stop();
    }

    #[test]
    fn test_manual_reset_clears_budget() {
        let mut window = RestartWindow::new();
        let now = Instant::now();

        window.try_acquire(now, 1, WINDOW);
        assert!(!window.try_acquire(now, 1, WINDOW));

        window.reset();
        assert!(window.is_empty());
        assert!(window.try_acquire(now, 1, WINDOW));
    }
}
