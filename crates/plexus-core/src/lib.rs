//! # plexus-core
//!
//! Core components shared by every Plexus crate:
//!
//! - [`AgentSpec`] - the immutable descriptor of an agent (name, port,
//!   provider, model, role)
//! - [`AgentStatus`] - the supervisor-visible lifecycle state machine
//! - [`EventBus`] - in-process publish/subscribe with bounded replay
//! - [`Metrics`] - counters, gauges and histograms with JSON and
//!   Prometheus rendering
//!
//! Everything here is plain data and in-process plumbing; no networking.

pub mod event;
pub mod metrics;
pub mod spec;
pub mod status;

pub use event::{EventBus, EventKind, EventRecord, EventSubscription};
pub use metrics::{Metrics, MetricsFormat};
pub use spec::{AgentSpec, ExternalTool, LogConfig, SpecError};
pub use status::AgentStatus;
