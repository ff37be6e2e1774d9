//! # plexus-supervisor
//!
//! Owns the agent lifecycle: spawns one OS process per descriptor, runs
//! the readiness handshake, probes health on an interval, recovers
//! unhealthy agents within a bounded restart budget, and walks the
//! graceful shutdown escalation on stop. Process isolation is the fault
//! domain; everything here talks to agents over their control sockets.

pub mod config;
mod error;
pub mod health;
pub mod registry;
mod supervisor;

pub use config::{RunnerCommand, SupervisorConfig};
pub use error::{ConnectPhase, SupervisorError};
pub use health::{HealthMonitor, RestartWindow};
pub use registry::{RegistryEntry, RegistryFile};
pub use supervisor::{StartOutcome, StatusEntry, Supervisor};
