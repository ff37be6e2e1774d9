//! Async client for the control socket.
//!
//! One connection carries one request/reply exchange, except
//! `subscribe_events` (server-push stream until the client closes) and
//! `chat` (interleaved events, then a final reply).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedReadHalf, UnixStream};
use tracing::debug;

use plexus_core::{EventRecord, MetricsFormat};

use crate::protocol::{parse_reply, ControlError, ControlRequest, HealthReply};

/// Client for one agent's control socket.
#[derive(Clone)]
pub struct ControlClient {
    path: PathBuf,
}

impl ControlClient {
    /// Client for the socket at `path`. No connection is made yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The socket path this client targets.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn exchange(&self, request: &ControlRequest) -> Result<Value, ControlError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(ControlError::Connection)?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request)
            .map_err(|e| ControlError::Malformed(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        let n = reader.read_line(&mut reply).await?;
        if n == 0 {
            return Err(ControlError::Closed);
        }
        parse_reply(reply.trim_end())
    }

    /// Issue a request with a deadline.
    ///
    /// # Errors
    ///
    /// [`ControlError::Timeout`] when the deadline elapses, otherwise the
    /// underlying exchange error.
    pub async fn request_with_timeout(
        &self,
        request: &ControlRequest,
        timeout: Duration,
    ) -> Result<Value, ControlError> {
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    /// `health` probe with a deadline.
    ///
    /// # Errors
    ///
    /// Timeout, connection or protocol errors.
    pub async fn health(&self, timeout: Duration) -> Result<HealthReply, ControlError> {
        let value = self.request_with_timeout(&ControlRequest::Health, timeout).await?;
        serde_json::from_value(value).map_err(|e| ControlError::Malformed(e.to_string()))
    }

    /// Add a routing-table entry on the agent.
    ///
    /// # Errors
    ///
    /// [`ControlError::Remote`] when the agent rejects the peer (e.g.
    /// self-connect), otherwise transport errors.
    pub async fn connect_peer(&self, peer: &str, endpoint: &str) -> Result<(), ControlError> {
        let value = self
            .exchange(&ControlRequest::Connect {
                peer: peer.to_string(),
                endpoint: endpoint.to_string(),
            })
            .await?;
        match value.get("status").and_then(Value::as_str) {
            Some("connected") => Ok(()),
            other => Err(ControlError::Malformed(format!(
                "unexpected connect reply status: {other:?}"
            ))),
        }
    }

    /// Remove a routing-table entry. Succeeds even if absent.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn disconnect_peer(&self, peer: &str) -> Result<(), ControlError> {
        self.exchange(&ControlRequest::Disconnect { peer: peer.to_string() })
            .await
            .map(|_| ())
    }

    /// Snapshot the agent's routing table.
    ///
    /// # Errors
    ///
    /// Transport or protocol errors.
    pub async fn list_connections(&self) -> Result<BTreeMap<String, String>, ControlError> {
        let value = self.exchange(&ControlRequest::ListConnections).await?;
        let peers = value
            .get("peers")
            .cloned()
            .ok_or_else(|| ControlError::Malformed("missing peers".into()))?;
        serde_json::from_value(peers).map_err(|e| ControlError::Malformed(e.to_string()))
    }

    /// Fetch a metrics snapshot in the requested format.
    ///
    /// # Errors
    ///
    /// Transport or protocol errors.
    pub async fn metrics(&self, format: MetricsFormat) -> Result<Value, ControlError> {
        let value = self.exchange(&ControlRequest::Metrics { format }).await?;
        value
            .get("metrics")
            .cloned()
            .ok_or_else(|| ControlError::Malformed("missing metrics".into()))
    }

    /// Request a graceful shutdown. The agent acknowledges before exiting.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.exchange(&ControlRequest::Shutdown).await.map(|_| ())
    }

    /// Open the long-lived event stream.
    ///
    /// # Errors
    ///
    /// Connection errors.
    pub async fn subscribe_events(
        &self,
        since_seq: Option<u64>,
    ) -> Result<EventStream, ControlError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(ControlError::Connection)?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line =
            serde_json::to_string(&ControlRequest::SubscribeEvents { since_seq })
                .map_err(|e| ControlError::Malformed(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        Ok(EventStream {
            reader: BufReader::new(read_half),
            _write_half: write_half,
        })
    }

    /// Inject a user turn and stream activity until the final reply.
    ///
    /// `on_event` observes every event the agent correlates with this
    /// turn; the returned string is the final model reply.
    ///
    /// # Errors
    ///
    /// Transport errors, or [`ControlError::Remote`] when the turn fails.
    pub async fn chat(
        &self,
        message: &str,
        correlation_id: Option<&str>,
        mut on_event: impl FnMut(EventRecord),
    ) -> Result<String, ControlError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(ControlError::Connection)?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&ControlRequest::Chat {
            message: message.to_string(),
            correlation_id: correlation_id.map(str::to_owned),
        })
        .map_err(|e| ControlError::Malformed(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        let mut reader = BufReader::new(read_half);
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = reader.read_line(&mut buf).await?;
            if n == 0 {
                return Err(ControlError::Closed);
            }
            let value = parse_reply(buf.trim_end())?;

            if let Some(event) = value.get("event") {
                if let Ok(record) = serde_json::from_value::<EventRecord>(event.clone()) {
                    debug!(seq = record.seq, "chat event");
                    on_event(record);
                }
                continue;
            }
            if value.get("status").is_some() {
                let response = value
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(response);
            }
        }
    }
}

/// Server-push stream of [`EventRecord`] lines.
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Keeps the write half open; dropping it would close the connection.
    _write_half: tokio::net::unix::OwnedWriteHalf,
}

impl EventStream {
    /// Next event, or `None` when the agent closes the stream.
    pub async fn next(&mut self) -> Option<EventRecord> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => match serde_json::from_str(line.trim_end()) {
                    Ok(record) => return Some(record),
                    // Skip anything that is not an event record.
                    Err(_) => continue,
                },
            }
        }
    }
}
