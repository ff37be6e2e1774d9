//! Inbound peer server.
//!
//! A plain axum app with a single POST route at `/mcp`. The server binds
//! its listener eagerly so a busy port surfaces as a startup failure
//! before the agent ever reports itself ready.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::PeerError;
use crate::rpc::{RpcRequest, RpcResponse, HANDLER_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

/// Small self-description returned by the `status` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Agent name
    pub name: String,
    /// Names currently in the routing table
    pub peers: Vec<String>,
    /// Seconds since the agent process started
    pub uptime_s: u64,
}

/// Inbound operations every agent exposes to its peers.
///
/// `receive_message` handles agent-to-agent traffic, `chat_with_user`
/// accepts messages from an external human interface, and `status` backs
/// capability discovery.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Handle a message from peer `from`; the returned string is the reply.
    async fn receive_message(
        &self,
        from: &str,
        message: &str,
        correlation_id: &str,
    ) -> Result<String, String>;

    /// Handle a message from a human; identical semantics to the control
    /// socket's `chat` command.
    async fn chat_with_user(&self, message: &str, correlation_id: &str) -> Result<String, String>;

    /// Self-description used in capability discovery.
    async fn status(&self) -> PeerStatus;
}

#[derive(Deserialize)]
struct ReceiveMessageParams {
    from: String,
    message: String,
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Deserialize)]
struct ChatParams {
    message: String,
    #[serde(default)]
    correlation_id: Option<String>,
}

/// Build the router for a handler. Exposed separately for tests.
#[must_use]
pub fn router(handler: Arc<dyn PeerHandler>) -> Router {
    Router::new().route("/mcp", post(handle_rpc)).with_state(handler)
}

/// Bind the peer listener on `127.0.0.1:port`.
///
/// # Errors
///
/// Returns [`PeerError::Bind`] when the port is already in use.
pub async fn try_bind(port: u16) -> Result<TcpListener, PeerError> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|source| PeerError::Bind { port, source })
}

/// Serve the handler on an already-bound listener until the task is
/// aborted.
pub async fn serve(listener: TcpListener, handler: Arc<dyn PeerHandler>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("peer transport listening on http://{addr}/mcp");
    }
    axum::serve(listener, router(handler)).await
}

async fn handle_rpc(
    State(handler): State<Arc<dyn PeerHandler>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let id = request.id.clone();
    debug!(method = %request.method, "peer request");

    let response = match request.method.as_str() {
        "receive_message" => {
            match serde_json::from_value::<ReceiveMessageParams>(request.params) {
                Ok(params) => {
                    let correlation_id = params.correlation_id.unwrap_or_default();
                    match handler
                        .receive_message(&params.from, &params.message, &correlation_id)
                        .await
                    {
                        Ok(reply) => RpcResponse::result(id, serde_json::Value::String(reply)),
                        Err(message) => {
                            warn!("receive_message failed: {message}");
                            RpcResponse::error(id, HANDLER_ERROR, message)
                        }
                    }
                }
                Err(e) => RpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            }
        }
        "chat_with_user" => match serde_json::from_value::<ChatParams>(request.params) {
            Ok(params) => {
                let correlation_id = params.correlation_id.unwrap_or_default();
                match handler.chat_with_user(&params.message, &correlation_id).await {
                    Ok(reply) => RpcResponse::result(id, serde_json::Value::String(reply)),
                    Err(message) => RpcResponse::error(id, HANDLER_ERROR, message),
                }
            }
            Err(e) => RpcResponse::error(id, INVALID_PARAMS, e.to_string()),
        },
        "status" => {
            let status = handler.status().await;
            match serde_json::to_value(status) {
                Ok(value) => RpcResponse::result(id, value),
                Err(e) => RpcResponse::error(id, HANDLER_ERROR, e.to_string()),
            }
        }
        other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method: {other}")),
    };

    Json(response)
}
