//! The supervisor proper.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::process::Child;
use tracing::{debug, info, warn};

use plexus_control::protocol::{HealthReply, HealthState};
use plexus_control::{paths, ControlClient, ControlError};
use plexus_core::{AgentSpec, AgentStatus, EventBus, EventKind, MetricsFormat};

use crate::config::{ready_backoff, RunnerCommand, SupervisorConfig};
use crate::error::{ConnectPhase, SupervisorError};
use crate::health::RestartWindow;
use crate::registry::{RegistryEntry, RegistryFile};

/// Supervisor-owned state for one agent.
struct AgentRecord {
    spec: AgentSpec,
    child: Option<Child>,
    pid: Option<u32>,
    status: AgentStatus,
    started_at: Option<Instant>,
    health_failures: u32,
    restarts: RestartWindow,
    last_error: Option<String>,
}

impl AgentRecord {
    fn new(spec: AgentSpec) -> Self {
        Self {
            spec,
            child: None,
            pid: None,
            status: AgentStatus::Stopped,
            started_at: None,
            health_failures: 0,
            restarts: RestartWindow::new(),
            last_error: None,
        }
    }
}

/// Result of one agent's start attempt, for `start_all` reporting.
#[derive(Debug)]
pub struct StartOutcome {
    pub name: String,
    pub status: AgentStatus,
    pub error: Option<String>,
}

/// One row of the operator-facing status table.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub name: String,
    pub status: AgentStatus,
    pub pid: Option<u32>,
    pub port: u16,
    pub uptime_s: Option<u64>,
    pub restart_count: usize,
    pub last_error: Option<String>,
}

/// Spawns and supervises agent processes.
///
/// All methods take `&self`; the record map is behind a short mutex that
/// is never held across I/O.
pub struct Supervisor {
    config: SupervisorConfig,
    runner: RunnerCommand,
    runtime_dir: PathBuf,
    agents: Mutex<HashMap<String, AgentRecord>>,
    events: Arc<EventBus>,
}

impl Supervisor {
    /// New empty supervisor.
    #[must_use]
    pub fn new(config: SupervisorConfig, runner: RunnerCommand, runtime_dir: PathBuf) -> Self {
        Self {
            config,
            runner,
            runtime_dir,
            agents: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new("supervisor")),
        }
    }

    /// Supervisor pre-populated from the persisted registry, so a fresh
    /// CLI invocation can manage agents an earlier one spawned.
    ///
    /// # Errors
    ///
    /// Registry read failures.
    pub fn load(
        config: SupervisorConfig,
        runner: RunnerCommand,
        runtime_dir: PathBuf,
    ) -> std::io::Result<Self> {
        let registry = RegistryFile::load(&paths::registry_path(&runtime_dir))?;
        let supervisor = Self::new(config, runner, runtime_dir);
        {
            let mut agents = supervisor.agents.lock();
            for (name, entry) in registry.agents {
                let mut record = AgentRecord::new(entry.spec);
                record.pid = entry.pid;
                record.status = entry.status;
                agents.insert(name, record);
            }
        }
        Ok(supervisor)
    }

    /// Supervisor-side event bus (`error` events for startup/health
    /// failures).
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Runtime directory holding sockets, logs and the registry.
    #[must_use]
    pub fn runtime_dir(&self) -> &std::path::Path {
        &self.runtime_dir
    }

    /// Supervision tunables.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Register a descriptor.
    ///
    /// # Errors
    ///
    /// Rejects invalid descriptors, duplicate names and duplicate ports.
    pub fn add(&self, spec: AgentSpec) -> Result<(), SupervisorError> {
        spec.validate()?;
        let mut agents = self.agents.lock();
        if agents.contains_key(&spec.name) {
            return Err(SupervisorError::DuplicateAgent(spec.name));
        }
        if let Some(taken_by) = agents.values().find(|r| r.spec.port == spec.port) {
            return Err(SupervisorError::DuplicatePort {
                port: spec.port,
                taken_by: taken_by.spec.name.clone(),
            });
        }
        info!(agent = %spec.name, port = spec.port, "registered agent");
        agents.insert(spec.name.clone(), AgentRecord::new(spec));
        Ok(())
    }

    /// Register a descriptor, replacing a previous one of the same name
    /// as long as that agent is not running. Used by CLI invocations that
    /// re-read descriptor files.
    ///
    /// # Errors
    ///
    /// Rejects invalid descriptors, a live agent under the same name, and
    /// duplicate ports.
    pub fn add_or_replace(&self, spec: AgentSpec) -> Result<(), SupervisorError> {
        spec.validate()?;
        let mut agents = self.agents.lock();
        if let Some(existing) = agents.get(&spec.name) {
            if existing.status.is_probed() || existing.status == AgentStatus::Starting {
                return Err(SupervisorError::DuplicateAgent(spec.name));
            }
        }
        if let Some(taken_by) = agents
            .values()
            .find(|r| r.spec.port == spec.port && r.spec.name != spec.name)
        {
            return Err(SupervisorError::DuplicatePort {
                port: spec.port,
                taken_by: taken_by.spec.name.clone(),
            });
        }
        agents.insert(spec.name.clone(), AgentRecord::new(spec));
        Ok(())
    }

    /// Names of all registered agents.
    #[must_use]
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptor for one agent.
    ///
    /// # Errors
    ///
    /// Unknown name.
    pub fn spec(&self, name: &str) -> Result<AgentSpec, SupervisorError> {
        self.agents
            .lock()
            .get(name)
            .map(|r| r.spec.clone())
            .ok_or_else(|| SupervisorError::UnknownAgent(name.to_string()))
    }

    fn control_client(&self, name: &str) -> ControlClient {
        ControlClient::new(paths::socket_path(&self.runtime_dir, name))
    }

    /// Start one agent and wait for readiness or the deadline.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Startup`] when the agent never becomes ready
    /// (the child is reaped and the record moves to `failed`).
    pub async fn start(&self, name: &str) -> Result<(), SupervisorError> {
        let spec = {
            let mut agents = self.agents.lock();
            let record = agents
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownAgent(name.to_string()))?;
            match record.status {
                AgentStatus::Running | AgentStatus::Starting => {
                    debug!(agent = name, "already running");
                    return Ok(());
                }
                _ => {}
            }
            record.status = AgentStatus::Starting;
            record.last_error = None;
            record.spec.clone()
        };

        let spawned = self
            .runner
            .command(&spec)
            .map_err(|e| e.to_string())
            .and_then(|mut command| command.spawn().map_err(|e| e.to_string()));
        let child = match spawned {
            Ok(child) => child,
            Err(reason) => {
                self.mark_failed(name, &reason);
                return Err(SupervisorError::Startup { name: name.to_string(), reason });
            }
        };

        let pid = child.id();
        {
            let mut agents = self.agents.lock();
            if let Some(record) = agents.get_mut(name) {
                record.pid = pid;
                record.child = Some(child);
            }
        }
        info!(agent = name, pid, "spawned agent process");

        match self.await_ready(name).await {
            Ok(()) => {
                {
                    let mut agents = self.agents.lock();
                    if let Some(record) = agents.get_mut(name) {
                        record.status = AgentStatus::Running;
                        record.started_at = Some(Instant::now());
                        record.health_failures = 0;
                    }
                }
                self.persist();
                info!(agent = name, "agent is ready");
                Ok(())
            }
            Err(reason) => {
                // Reap the child and clean up its socket.
                self.reap(name).await;
                self.mark_failed(name, &reason);
                self.events.emit(
                    EventKind::Error,
                    None,
                    None,
                    json!({"kind": "startup_failure", "agent": name, "detail": reason}),
                );
                Err(SupervisorError::Startup { name: name.to_string(), reason })
            }
        }
    }

    /// Poll the control endpoint until it reports ready.
    async fn await_ready(&self, name: &str) -> Result<(), String> {
        let client = self.control_client(name);
        let deadline = Instant::now() + self.config.ready_deadline;

        for delay in ready_backoff(&self.config) {
            // A child that already exited will never become ready.
            if let Some(code) = self.child_exit_code(name) {
                return Err(format!("process exited during startup (status {code})"));
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "not ready within {:?}",
                    self.config.ready_deadline
                ));
            }
            tokio::time::sleep(delay).await;

            match client.health(self.config.check_timeout).await {
                Ok(HealthReply { status: HealthState::Ready, .. }) => return Ok(()),
                Ok(_) => debug!(agent = name, "agent still starting"),
                Err(e) => debug!(agent = name, "readiness probe: {e}"),
            }
        }
        unreachable!("ready_backoff is infinite")
    }

    fn child_exit_code(&self, name: &str) -> Option<i32> {
        let mut agents = self.agents.lock();
        let record = agents.get_mut(name)?;
        let child = record.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    fn mark_failed(&self, name: &str, reason: &str) {
        {
            let mut agents = self.agents.lock();
            if let Some(record) = agents.get_mut(name) {
                record.status = AgentStatus::Failed;
                record.last_error = Some(reason.to_string());
                record.child = None;
                record.pid = None;
            }
        }
        self.persist();
        warn!(agent = name, reason, "agent failed");
    }

    async fn reap(&self, name: &str) {
        let child = {
            let mut agents = self.agents.lock();
            agents.get_mut(name).and_then(|r| r.child.take())
        };
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        let socket = paths::socket_path(&self.runtime_dir, name);
        if socket.exists() {
            let _ = std::fs::remove_file(&socket);
        }
    }

    /// Start every registered agent in parallel; returns per-agent
    /// outcomes once each has reached `running` or `failed`.
    pub async fn start_all(&self) -> Vec<StartOutcome> {
        let names = self.agent_names();
        let starts = names.iter().map(|name| async {
            let result = self.start(name).await;
            let status = self.status_of(name).unwrap_or(AgentStatus::Failed);
            StartOutcome {
                name: name.clone(),
                status,
                error: result.err().map(|e| e.to_string()),
            }
        });
        futures::future::join_all(starts).await
    }

    fn status_of(&self, name: &str) -> Option<AgentStatus> {
        self.agents.lock().get(name).map(|r| r.status)
    }

    /// Stop one agent via the graceful shutdown escalation.
    ///
    /// (1) control-socket `shutdown`, (2) SIGTERM, (3) SIGKILL, each step
    /// bounded by its configured timeout. Stopping a stopped agent is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Unknown agent name.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let (mut child, pid) = {
            let mut agents = self.agents.lock();
            let record = agents
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownAgent(name.to_string()))?;
            if !matches!(
                record.status,
                AgentStatus::Running | AgentStatus::Unhealthy | AgentStatus::Starting
            ) {
                return Ok(());
            }
            record.status = AgentStatus::Stopping;
            (record.child.take(), record.pid)
        };

        info!(agent = name, pid, "stopping agent");

        // Phase 1: ask nicely over the control socket.
        let client = self.control_client(name);
        let _ = tokio::time::timeout(self.config.check_timeout, client.shutdown()).await;
        let mut gone = wait_exit(&mut child, pid, self.config.graceful_timeout).await;

        // Phase 2: SIGTERM.
        if !gone {
            warn!(agent = name, "graceful shutdown timed out, sending SIGTERM");
            signal_pid(pid, nix::sys::signal::Signal::SIGTERM);
            gone = wait_exit(&mut child, pid, self.config.terminate_timeout).await;
        }

        // Phase 3: SIGKILL.
        if !gone {
            warn!(agent = name, "SIGTERM ignored, sending SIGKILL");
            if let Some(child) = child.as_mut() {
                let _ = child.start_kill();
            } else {
                signal_pid(pid, nix::sys::signal::Signal::SIGKILL);
            }
            let _ = wait_exit(&mut child, pid, self.config.kill_grace).await;
        }

        let socket = paths::socket_path(&self.runtime_dir, name);
        if socket.exists() {
            let _ = std::fs::remove_file(&socket);
        }

        {
            let mut agents = self.agents.lock();
            if let Some(record) = agents.get_mut(name) {
                record.status = AgentStatus::Stopped;
                record.pid = None;
                record.started_at = None;
                record.health_failures = 0;
            }
        }
        self.persist();
        info!(agent = name, "agent stopped");
        Ok(())
    }

    /// Stop every agent in parallel, each with the full escalation.
    pub async fn stop_all(&self) {
        let names = self.agent_names();
        let stops = names.iter().map(|name| self.stop(name));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                warn!("stop failed: {e}");
            }
        }
    }

    /// Stop then start, resetting the restart budget (manual restarts are
    /// operator intent, not recovery).
    ///
    /// # Errors
    ///
    /// See [`Self::stop`] and [`Self::start`].
    pub async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.stop(name).await?;
        if let Some(record) = self.agents.lock().get_mut(name) {
            record.restarts.reset();
        }
        self.start(name).await
    }

    /// Establish a directed (or bidirectional) peer link.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Connect`] tagged with the failing phase.
    pub async fn connect(
        &self,
        from: &str,
        to: &str,
        bidirectional: bool,
    ) -> Result<(), SupervisorError> {
        self.connect_directed(from, to).await?;
        if bidirectional {
            self.connect_directed(to, from).await?;
        }
        Ok(())
    }

    async fn connect_directed(&self, from: &str, to: &str) -> Result<(), SupervisorError> {
        let connect_err = |phase: ConnectPhase, reason: String| SupervisorError::Connect {
            from: from.to_string(),
            to: to.to_string(),
            phase,
            reason,
        };

        // Resolve: both agents known, source running, target's endpoint.
        let endpoint = {
            let agents = self.agents.lock();
            let from_record = agents
                .get(from)
                .ok_or_else(|| connect_err(ConnectPhase::Resolve, format!("unknown agent {from}")))?;
            if from_record.status != AgentStatus::Running {
                return Err(connect_err(
                    ConnectPhase::Resolve,
                    format!("agent {from} is not running"),
                ));
            }
            let to_record = agents
                .get(to)
                .ok_or_else(|| connect_err(ConnectPhase::Resolve, format!("unknown agent {to}")))?;
            if to_record.status != AgentStatus::Running {
                return Err(connect_err(
                    ConnectPhase::Resolve,
                    format!("agent {to} is not running"),
                ));
            }
            to_record.spec.peer_endpoint()
        };

        // Dispatch + acknowledge over the source's control socket.
        self.control_client(from)
            .connect_peer(to, &endpoint)
            .await
            .map_err(|e| match e {
                ControlError::Remote(reason) => connect_err(ConnectPhase::Acknowledge, reason),
                other => connect_err(ConnectPhase::Dispatch, other.to_string()),
            })?;

        info!(from, to, endpoint, "peer link established");
        Ok(())
    }

    /// Remove a directed peer link. Disconnecting one side leaves the
    /// reverse link intact.
    ///
    /// # Errors
    ///
    /// Unknown/not-running source, or control transport failure.
    pub async fn disconnect(&self, from: &str, to: &str) -> Result<(), SupervisorError> {
        {
            let agents = self.agents.lock();
            let record = agents
                .get(from)
                .ok_or_else(|| SupervisorError::UnknownAgent(from.to_string()))?;
            if record.status != AgentStatus::Running {
                return Err(SupervisorError::NotRunning(from.to_string()));
            }
        }
        self.control_client(from).disconnect_peer(to).await?;
        info!(from, to, "peer link removed");
        Ok(())
    }

    /// Query one agent's `health` over its control socket.
    ///
    /// # Errors
    ///
    /// Unknown agent or control transport failure.
    pub async fn health(&self, name: &str) -> Result<HealthReply, SupervisorError> {
        if !self.agents.lock().contains_key(name) {
            return Err(SupervisorError::UnknownAgent(name.to_string()));
        }
        Ok(self.control_client(name).health(self.config.check_timeout).await?)
    }

    /// Query one agent's `metrics` over its control socket.
    ///
    /// # Errors
    ///
    /// Unknown agent or control transport failure.
    pub async fn metrics(&self, name: &str, format: MetricsFormat) -> Result<Value, SupervisorError> {
        if !self.agents.lock().contains_key(name) {
            return Err(SupervisorError::UnknownAgent(name.to_string()));
        }
        Ok(self.control_client(name).metrics(format).await?)
    }

    /// Tabular status of every registered agent.
    #[must_use]
    pub fn status(&self) -> Vec<StatusEntry> {
        let agents = self.agents.lock();
        let mut entries: Vec<StatusEntry> = agents
            .iter()
            .map(|(name, record)| StatusEntry {
                name: name.clone(),
                status: record.status,
                pid: record.pid,
                port: record.spec.port,
                uptime_s: record.started_at.map(|t| t.elapsed().as_secs()),
                restart_count: record.restarts.len(),
                last_error: record.last_error.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Re-check recorded liveness against the OS (pid probe). Used by
    /// status displays in fresh CLI processes that hold no child handles.
    pub fn refresh_liveness(&self) {
        let mut agents = self.agents.lock();
        for record in agents.values_mut() {
            if let (Some(pid), true) = (record.pid, record.status.is_probed()) {
                if !pid_alive(pid) {
                    record.status = AgentStatus::Failed;
                    record.pid = None;
                }
            }
        }
    }

    /// Write the registry file; failures are logged, not fatal.
    pub fn persist(&self) {
        let registry = {
            let agents = self.agents.lock();
            RegistryFile {
                agents: agents
                    .iter()
                    .map(|(name, record)| {
                        (
                            name.clone(),
                            RegistryEntry {
                                spec: record.spec.clone(),
                                pid: record.pid,
                                status: record.status,
                            },
                        )
                    })
                    .collect(),
            }
        };
        let path = paths::registry_path(&self.runtime_dir);
        if let Err(e) = registry.save(&path) {
            warn!("cannot persist registry {}: {e}", path.display());
        }
    }

    // ---- health-loop plumbing -------------------------------------------

    /// Agents the health loop should probe.
    pub(crate) fn probed_agents(&self) -> Vec<String> {
        self.agents
            .lock()
            .iter()
            .filter(|(_, r)| r.status.is_probed())
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// One health probe: process liveness first, then the socket.
    pub(crate) async fn probe_health(&self, name: &str) -> bool {
        let pid = self.agents.lock().get(name).and_then(|r| r.pid);
        if let Some(pid) = pid {
            if !pid_alive(pid) {
                return false;
            }
        }
        matches!(
            self.control_client(name).health(self.config.check_timeout).await,
            Ok(HealthReply { status: HealthState::Ready, .. })
        )
    }

    /// Record a probe result; `true` means the failure threshold was hit
    /// and recovery should run.
    pub(crate) fn note_probe(&self, name: &str, healthy: bool) -> bool {
        let mut agents = self.agents.lock();
        let Some(record) = agents.get_mut(name) else { return false };

        if healthy {
            record.health_failures = 0;
            if record.status == AgentStatus::Unhealthy {
                record.status = AgentStatus::Running;
                info!(agent = name, "agent recovered");
            }
            return false;
        }

        record.health_failures += 1;
        warn!(
            agent = name,
            failures = record.health_failures,
            "health probe failed"
        );
        if record.health_failures >= self.config.failure_threshold {
            record.status = AgentStatus::Unhealthy;
            return true;
        }
        false
    }

    /// Recover an unhealthy agent: restart within the rolling budget or
    /// give up and mark it failed.
    pub(crate) async fn recover(&self, name: &str) {
        let allowed = {
            let mut agents = self.agents.lock();
            let Some(record) = agents.get_mut(name) else { return };
            record.restarts.try_acquire(
                Instant::now(),
                self.config.max_restarts as usize,
                self.config.restart_window,
            )
        };

        if !allowed {
            self.events.emit(
                EventKind::Error,
                None,
                None,
                json!({"kind": "restart_budget_exhausted", "agent": name}),
            );
            // Reap the stuck process but do not respawn it.
            let _ = self.stop(name).await;
            self.mark_failed(name, "restart budget exhausted");
            return;
        }

        self.events.emit(
            EventKind::Error,
            None,
            None,
            json!({"kind": "health_failure", "agent": name}),
        );
        info!(agent = name, "restarting unhealthy agent");

        if let Err(e) = self.stop(name).await {
            warn!(agent = name, "stop during recovery failed: {e}");
        }
        if let Err(e) = self.start(name).await {
            warn!(agent = name, "restart failed: {e}");
        }
    }
}

#[cfg(test)]
impl Supervisor {
    /// Test hook: force a record into a given status.
    pub(crate) fn force_status(&self, name: &str, status: AgentStatus) {
        if let Some(record) = self.agents.lock().get_mut(name) {
            record.status = status;
            record.health_failures = 0;
        }
    }
}

/// Wait for a process to exit, via the child handle when we own one or a
/// pid probe otherwise. Returns `true` once the process is gone.
async fn wait_exit(child: &mut Option<Child>, pid: Option<u32>, limit: std::time::Duration) -> bool {
    if let Some(child) = child.as_mut() {
        return tokio::time::timeout(limit, child.wait()).await.is_ok();
    }
    let Some(pid) = pid else { return true };

    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    !pid_alive(pid)
}

fn signal_pid(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    if let Some(pid) = pid {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
    }
}

fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(name: &str, port: u16) -> AgentSpec {
        AgentSpec::new(name, port, "openai", "gpt-4o", "helper").unwrap()
    }

    fn supervisor(dir: &std::path::Path) -> Supervisor {
        Supervisor::new(
            SupervisorConfig::default(),
            RunnerCommand::new("/bin/false", vec![]),
            dir.to_path_buf(),
        )
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        sup.add(spec("alice", 8001)).unwrap();
        assert!(matches!(
            sup.add(spec("alice", 8009)),
            Err(SupervisorError::DuplicateAgent(_))
        ));
        assert!(matches!(
            sup.add(spec("bob", 8001)),
            Err(SupervisorError::DuplicatePort { port: 8001, .. })
        ));
        sup.add(spec("bob", 8002)).unwrap();
        assert_eq!(sup.agent_names(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_connect_requires_known_running_agents() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.add(spec("alice", 8001)).unwrap();

        let err = sup.connect("alice", "ghost", false).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Connect { phase: ConnectPhase::Resolve, .. }
        ));

        let err = sup.connect("alice", "alice", false).await.unwrap_err();
        // alice is registered but not running.
        assert!(matches!(
            err,
            SupervisorError::Connect { phase: ConnectPhase::Resolve, .. }
        ));
    }

    #[tokio::test]
    async fn test_stop_of_stopped_agent_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.add(spec("alice", 8001)).unwrap();

        sup.stop("alice").await.unwrap();
        assert!(matches!(sup.stop("ghost").await, Err(SupervisorError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(
            SupervisorConfig::default(),
            RunnerCommand::new("/nonexistent/program", vec![]),
            dir.path().to_path_buf(),
        );
        sup.add(spec("alice", 8001)).unwrap();

        let err = sup.start("alice").await.unwrap_err();
        assert!(matches!(err, SupervisorError::Startup { .. }));
        assert_eq!(sup.status()[0].status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn test_ready_deadline_produces_failed_and_no_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            ready_deadline: Duration::from_millis(300),
            check_timeout: Duration::from_millis(50),
            ..SupervisorConfig::default()
        };

        // `sleep` never opens a control socket, so readiness must time out.
        let sup = Supervisor::new(
            config,
            RunnerCommand::new("/bin/sleep", vec!["30".into()]),
            dir.path().to_path_buf(),
        );
        sup.add(spec("alice", 18321)).unwrap();

        let err = sup.start("alice").await.unwrap_err();
        assert!(matches!(err, SupervisorError::Startup { .. }));

        let entries = sup.status();
        assert_eq!(entries[0].status, AgentStatus::Failed);
        assert!(!paths::socket_path(dir.path(), "alice").exists());

        // A startup_failure error event was emitted.
        let mut sub = sup.events().subscribe(Some(1));
        let record = sub.try_next().unwrap();
        assert_eq!(record.payload["kind"], "startup_failure");
    }

    #[tokio::test]
    async fn test_start_all_reports_per_agent_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(
            SupervisorConfig::default(),
            RunnerCommand::new("/nonexistent/program", vec![]),
            dir.path().to_path_buf(),
        );
        sup.add(spec("alice", 8001)).unwrap();
        sup.add(spec("bob", 8002)).unwrap();

        let outcomes = sup.start_all().await;
        assert_eq!(outcomes.len(), 2);
        // One failed start does not abort the other's attempt.
        for outcome in &outcomes {
            assert_eq!(outcome.status, AgentStatus::Failed);
            assert!(outcome.error.is_some());
        }

        // stop_all on failed agents is a quiet no-op.
        sup.stop_all().await;
    }

    #[test]
    fn test_registry_round_trip_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.add(spec("alice", 8001)).unwrap();
        sup.persist();

        let reloaded = Supervisor::load(
            SupervisorConfig::default(),
            RunnerCommand::new("/bin/false", vec![]),
            dir.path().to_path_buf(),
        )
        .unwrap();
        assert_eq!(reloaded.agent_names(), vec!["alice"]);
        assert_eq!(reloaded.spec("alice").unwrap().port, 8001);
    }
}
