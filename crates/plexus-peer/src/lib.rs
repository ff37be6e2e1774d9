//! # plexus-peer
//!
//! The work-plane transport between agents: an inbound axum server
//! exposing JSON-RPC-shaped operations on `/mcp`, and an outbound pooled
//! client. The control plane (local sockets) never crosses through here.

mod client;
mod error;
mod rpc;
mod server;

pub use client::PeerClient;
pub use error::PeerError;
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use server::{serve, try_bind, PeerHandler, PeerStatus};
