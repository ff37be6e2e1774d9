//! Outbound peer client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::PeerError;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::server::PeerStatus;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Pooled JSON-RPC client for calling peer agents and external tool
/// endpoints. Connections are pooled per host by the underlying client.
pub struct PeerClient {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl PeerClient {
    /// Create a client with the default timeouts (connect 2 s, request 60 s).
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_timeout(REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    #[must_use]
    pub fn with_request_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue a raw JSON-RPC call and return the `result` value.
    ///
    /// # Errors
    ///
    /// Returns a [`PeerError`] on transport failure, timeout, or a
    /// JSON-RPC error response.
    #[instrument(skip(self, params), fields(endpoint = %endpoint, method = %method))]
    pub async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, PeerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        debug!("outbound peer call");

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PeerError::Timeout
                } else {
                    PeerError::Connection(e.to_string())
                }
            })?;

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| PeerError::InvalidResponse(e.to_string()))?;

        if let Some(error) = rpc.error {
            return Err(PeerError::Rpc { code: error.code, message: error.message });
        }
        rpc.result
            .ok_or_else(|| PeerError::InvalidResponse("response carries neither result nor error".into()))
    }

    /// Deliver a message to a peer's inbound `receive_message` operation.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn receive_message(
        &self,
        endpoint: &str,
        from: &str,
        message: &str,
        correlation_id: &str,
    ) -> Result<String, PeerError> {
        let result = self
            .call(
                endpoint,
                "receive_message",
                json!({
                    "from": from,
                    "message": message,
                    "correlation_id": correlation_id,
                }),
            )
            .await?;

        match result {
            Value::String(reply) => Ok(reply),
            other => Ok(other.to_string()),
        }
    }

    /// Call a named tool on an external tool endpoint (`tools/call`).
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn call_tool(
        &self,
        endpoint: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, PeerError> {
        self.call(endpoint, "tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// Fetch a peer's self-description.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn status(&self, endpoint: &str) -> Result<PeerStatus, PeerError> {
        let result = self.call(endpoint, "status", json!({})).await?;
        serde_json::from_value(result).map_err(|e| PeerError::InvalidResponse(e.to_string()))
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}
