//! Peer transport error types.

use thiserror::Error;

/// Errors from outbound peer calls.
///
/// These are surfaced to the tool-dispatch layer, which renders them as
/// tool errors for the model; the transport itself never retries.
#[derive(Error, Debug)]
pub enum PeerError {
    /// Could not reach the peer endpoint
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request exceeded its deadline
    #[error("peer call timed out")]
    Timeout,

    /// Peer answered with a JSON-RPC error
    #[error("peer error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable message
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("invalid peer response: {0}")]
    InvalidResponse(String),

    /// Listener could not bind its port
    #[error("cannot bind peer port {port}: {source}")]
    Bind {
        /// Requested port
        port: u16,
        /// Underlying I/O error
        source: std::io::Error,
    },
}
