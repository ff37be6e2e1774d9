//! Control socket server.
//!
//! One Unix stream socket per agent at a deterministic path. Each
//! accepted connection carries a single request/reply exchange, except
//! `subscribe_events` (server-push until the client closes) and `chat`
//! (correlated events interleaved before the final reply). Requests on
//! one connection are serialized; connections proceed in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use plexus_control::protocol::{ControlRequest, HealthReply, HealthState};
use plexus_control::CONTROL_ERROR_UNKNOWN_COMMAND;
use plexus_core::{EventKind, MetricsFormat};

use crate::error::AgentError;
use crate::runtime::AgentRuntime;

/// Control server for one agent runtime.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    runtime: Arc<AgentRuntime>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for ControlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlServer")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ControlServer {
    /// Bind the control socket, refusing to clobber a live agent.
    ///
    /// A leftover socket file is probed first: if something accepts the
    /// connection the name is taken and startup fails; a dead file is
    /// unlinked.
    ///
    /// # Errors
    ///
    /// [`AgentError::NameCollision`] when a live agent owns the socket,
    /// otherwise I/O errors from bind.
    pub async fn bind(
        runtime: Arc<AgentRuntime>,
        path: &Path,
        shutdown: Arc<Notify>,
    ) -> Result<Self, AgentError> {
        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => {
                    return Err(AgentError::NameCollision(path.display().to_string()));
                }
                Err(_) => {
                    debug!("removing stale control socket {}", path.display());
                    std::fs::remove_file(path)?;
                }
            }
        }

        let listener = UnixListener::bind(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        info!("control socket listening at {}", path.display());

        Ok(Self { listener, path: path.to_path_buf(), runtime, shutdown })
    }

    /// Socket path this server is bound to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is aborted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let runtime = Arc::clone(&self.runtime);
                    let shutdown = Arc::clone(&self.shutdown);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, runtime, shutdown).await {
                            debug!("control connection ended: {e}");
                        }
                    });
                }
                Err(e) => {
                    // Accept failures (fd exhaustion and the like) are
                    // usually transient; back off instead of spinning and
                    // surface them on the event stream.
                    error!("control accept error: {e}");
                    self.runtime.events().emit(
                        EventKind::Error,
                        None,
                        None,
                        json!({"kind": "control_accept", "detail": e.to_string()}),
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Remove an agent's control socket file, ignoring absence.
pub fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove control socket {}: {e}", path.display());
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    runtime: Arc<AgentRuntime>,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let line = line.trim_end();

    // Malformed JSON gets a best-effort error before close; a valid
    // object with an unrecognized cmd gets the dedicated reply.
    let request: ControlRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(_) => {
            let reply = match serde_json::from_str::<Value>(line) {
                Ok(_) => json!({"error": CONTROL_ERROR_UNKNOWN_COMMAND}),
                Err(_) => json!({"error": "malformed_request"}),
            };
            return write_line(&mut write_half, &reply).await;
        }
    };

    debug!(?request, "control request");
    match request {
        ControlRequest::Health => {
            let reply = HealthReply {
                status: if runtime.is_ready() { HealthState::Ready } else { HealthState::Starting },
                peer_port: runtime.spec().port,
                peers: runtime.routing().peer_names(),
                uptime_s: runtime.uptime_s(),
            };
            write_line(&mut write_half, &serde_json::to_value(reply).unwrap_or_default()).await
        }

        ControlRequest::Connect { peer, endpoint } => {
            let reply = match runtime.connect_peer(&peer, &endpoint) {
                Ok(_) => json!({"status": "connected"}),
                Err(e) => json!({"error": e.to_string()}),
            };
            write_line(&mut write_half, &reply).await
        }

        ControlRequest::Disconnect { peer } => {
            runtime.disconnect_peer(&peer);
            write_line(&mut write_half, &json!({"status": "disconnected"})).await
        }

        ControlRequest::ListConnections => {
            let peers = runtime.routing().snapshot();
            write_line(&mut write_half, &json!({"peers": peers})).await
        }

        ControlRequest::Metrics { format } => {
            runtime.refresh_gauges();
            let metrics = match format {
                MetricsFormat::Json => runtime.metrics().snapshot_json(),
                MetricsFormat::Prometheus => Value::String(runtime.metrics().render_prometheus()),
            };
            write_line(&mut write_half, &json!({"status": "ok", "metrics": metrics})).await
        }

        ControlRequest::SubscribeEvents { since_seq } => {
            let mut subscription = runtime.events().subscribe(since_seq);
            while let Some(record) = subscription.next().await {
                let value = serde_json::to_value(&record).unwrap_or_default();
                if write_line(&mut write_half, &value).await.is_err() {
                    // Client went away.
                    break;
                }
            }
            Ok(())
        }

        ControlRequest::Chat { message, correlation_id } => {
            let correlation_id =
                correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            // Forward correlated events while the turn is in flight.
            let mut subscription = runtime.events().subscribe(None);
            let (done_tx, mut done_rx) = tokio::sync::oneshot::channel::<()>();

            let turn = {
                let runtime = Arc::clone(&runtime);
                let correlation_id = correlation_id.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    let result = runtime
                        .handle_message(crate::runtime::Origin::User, &message, &correlation_id)
                        .await;
                    let _ = done_tx.send(());
                    result
                })
            };

            loop {
                tokio::select! {
                    record = subscription.next() => {
                        let Some(record) = record else { break };
                        if record.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                            continue;
                        }
                        let line = json!({"event": record});
                        if write_line(&mut write_half, &line).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut done_rx => break,
                }
            }
            // Drain anything emitted before the turn completed.
            while let Some(record) = subscription.try_next() {
                if record.correlation_id.as_deref() == Some(correlation_id.as_str()) {
                    let _ = write_line(&mut write_half, &json!({"event": record})).await;
                }
            }

            let reply = match turn.await {
                Ok(Ok(response)) => {
                    json!({"status": "ok", "response": response, "correlation_id": correlation_id})
                }
                Ok(Err(e)) => json!({"error": e.to_string()}),
                Err(e) => json!({"error": format!("chat task failed: {e}")}),
            };
            write_line(&mut write_half, &reply).await
        }

        ControlRequest::Shutdown => {
            runtime.events().emit(EventKind::ShutdownRequested, None, None, Value::Null);
            let result =
                write_line(&mut write_half, &json!({"status": "shutting_down"})).await;
            // notify_one stores a permit, so a shutdown that lands before
            // the runner reaches its wait point is not lost.
            shutdown.notify_one();
            result
        }
    }
}

async fn write_line(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    value: &Value,
) -> std::io::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{scripted_runtime, ScriptedProvider};
    use plexus_control::{ControlClient, ControlError};
    use std::time::Duration;

    async fn start_server(
        runtime: Arc<AgentRuntime>,
    ) -> (ControlClient, Arc<Notify>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-alice.sock");
        let shutdown = Arc::new(Notify::new());
        let server = ControlServer::bind(runtime, &path, Arc::clone(&shutdown)).await.unwrap();
        tokio::spawn(server.run());
        (ControlClient::new(path), shutdown, dir)
    }

    #[tokio::test]
    async fn test_health_reflects_readiness() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(Arc::clone(&runtime)).await;

        let health = client.health(Duration::from_secs(1)).await.unwrap();
        assert_eq!(health.status, HealthState::Starting);
        assert_eq!(health.peer_port, 18001);

        runtime.set_ready();
        let health = client.health(Duration::from_secs(1)).await.unwrap();
        assert_eq!(health.status, HealthState::Ready);
    }

    #[tokio::test]
    async fn test_connect_disconnect_read_your_writes() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        client.connect_peer("bob", "http://127.0.0.1:8002/mcp").await.unwrap();
        // Duplicate connect is ok.
        client.connect_peer("bob", "http://127.0.0.1:8002/mcp").await.unwrap();

        let peers = client.list_connections().await.unwrap();
        assert_eq!(peers.get("bob").unwrap(), "http://127.0.0.1:8002/mcp");

        client.disconnect_peer("bob").await.unwrap();
        // Disconnecting an absent peer is still ok.
        client.disconnect_peer("bob").await.unwrap();
        assert!(client.list_connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_connect_is_rejected() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        let err = client.connect_peer("alice", "http://127.0.0.1:18001/mcp").await.unwrap_err();
        assert!(matches!(err, ControlError::Remote(_)));
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        let mut stream = UnixStream::connect(client.path()).await.unwrap();
        stream.write_all(b"{\"cmd\":\"frobnicate\"}\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(&mut stream).read_line(&mut reply).await.unwrap();
        assert!(reply.contains(CONTROL_ERROR_UNKNOWN_COMMAND));
    }

    #[tokio::test]
    async fn test_malformed_json_gets_best_effort_error() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        let mut stream = UnixStream::connect(client.path()).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(&mut stream).read_line(&mut reply).await.unwrap();
        assert!(reply.contains("malformed_request"));
    }

    #[tokio::test]
    async fn test_metrics_both_formats() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        let json_metrics = client.metrics(MetricsFormat::Json).await.unwrap();
        assert!(json_metrics.get("counters").is_some());

        let prom = client.metrics(MetricsFormat::Prometheus).await.unwrap();
        assert!(prom.as_str().unwrap().contains("# TYPE agent_up gauge"));
    }

    #[tokio::test]
    async fn test_chat_streams_events_then_final_reply() {
        let (runtime, _) =
            scripted_runtime(true, vec![ScriptedProvider::text("the answer is 42")]);
        let (client, _shutdown, _dir) = start_server(runtime).await;

        let mut seen = Vec::new();
        let reply = client
            .chat("what is the answer?", Some("c42"), |record| seen.push(record.kind))
            .await
            .unwrap();

        assert_eq!(reply, "the answer is 42");
        assert!(seen.contains(&EventKind::TurnStarted));
        assert!(seen.contains(&EventKind::TurnFinished));
    }

    #[tokio::test]
    async fn test_subscribe_events_replays_backlog() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        runtime.events().emit(EventKind::Connected, None, Some("bob"), Value::Null);
        let (client, _shutdown, _dir) = start_server(Arc::clone(&runtime)).await;

        let mut stream = client.subscribe_events(Some(1)).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, EventKind::Connected);
        assert_eq!(first.seq, 1);

        runtime.events().emit(EventKind::Disconnected, None, Some("bob"), Value::Null);
        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, EventKind::Disconnected);
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn test_shutdown_acknowledges_then_notifies() {
        let (runtime, _) = scripted_runtime(true, vec![]);
        let (client, shutdown, _dir) = start_server(runtime).await;

        client.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .expect("shutdown notify fired");
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced_live_socket_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-alice.sock");

        // Dead file: bind succeeds after unlink.
        std::fs::write(&path, b"").unwrap();
        let (runtime, _) = scripted_runtime(true, vec![]);
        let shutdown = Arc::new(Notify::new());
        let server = ControlServer::bind(Arc::clone(&runtime), &path, Arc::clone(&shutdown))
            .await
            .unwrap();
        tokio::spawn(server.run());

        // Live socket: second bind refuses with a name collision.
        let (runtime2, _) = scripted_runtime(true, vec![]);
        let err = ControlServer::bind(runtime2, &path, shutdown).await.unwrap_err();
        assert!(matches!(err, AgentError::NameCollision(_)));
    }
}
