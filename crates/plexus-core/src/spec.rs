//! Agent descriptors and the declarative descriptor file loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while building or loading a descriptor.
#[derive(Error, Debug)]
pub enum SpecError {
    /// Name is empty or contains characters unsafe for socket/log paths
    #[error("invalid agent name {0:?}: must be non-empty, [a-zA-Z0-9_-] only")]
    InvalidName(String),

    /// Port outside the unprivileged range
    #[error("invalid port {0}: must be between 1024 and 65535")]
    InvalidPort(u16),

    /// Role text is empty
    #[error("agent {0:?} has an empty role")]
    EmptyRole(String),

    /// Descriptor file could not be read
    #[error("cannot read descriptor file: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor file could not be parsed (includes unknown fields)
    #[error("invalid descriptor file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Per-agent logging overrides.
///
/// Both fields are optional: the level falls back to `info` (with
/// `RUST_LOG` taking precedence over either), the file to
/// `<runtime_dir>/agent-<name>.log`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive, e.g. `debug` or `plexus_agent=trace`
    #[serde(default)]
    pub level: Option<String>,
    /// Log file path override
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// An external tool endpoint an agent may call in addition to its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalTool {
    /// Tool name as exposed to the model
    pub name: String,
    /// JSON-RPC endpoint URL
    pub endpoint: String,
    /// One-line description shown in the tool catalogue
    #[serde(default)]
    pub description: Option<String>,
}

/// Immutable identity and configuration of a single agent.
///
/// Created once by the operator, serialized into the spawned agent
/// process, and never mutated afterwards. Restarts reuse the same spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    /// Unique, filesystem-safe agent name
    pub name: String,
    /// TCP port for the peer transport, unique per host
    pub port: u16,
    /// Model provider identifier ("anthropic", "openai", "ollama")
    pub provider: String,
    /// Model identifier passed to the provider
    pub model: String,
    /// Role text used as the seed instruction of the system preamble
    pub role: String,
    /// Optional external tool endpoints
    #[serde(default)]
    pub external_tools: Vec<ExternalTool>,
    /// Logging overrides for the agent process
    #[serde(default)]
    pub logging: LogConfig,
}

impl AgentSpec {
    /// Create a spec and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not filesystem-safe, the port is
    /// outside 1024..=65535, or the role is empty.
    pub fn new(
        name: impl Into<String>,
        port: u16,
        provider: impl Into<String>,
        model: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<Self, SpecError> {
        let spec = Self {
            name: name.into(),
            port,
            provider: provider.into(),
            model: model.into(),
            role: role.into(),
            external_tools: Vec::new(),
            logging: LogConfig::default(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Add an external tool endpoint.
    #[must_use]
    pub fn with_external_tool(mut self, tool: ExternalTool) -> Self {
        self.external_tools.push(tool);
        self
    }

    /// Override the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Validate the descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() || !self.name.chars().all(is_name_char) {
            return Err(SpecError::InvalidName(self.name.clone()));
        }
        if self.port < 1024 {
            return Err(SpecError::InvalidPort(self.port));
        }
        if self.role.trim().is_empty() {
            return Err(SpecError::EmptyRole(self.name.clone()));
        }
        Ok(())
    }

    /// Peer-transport endpoint URL other agents use to reach this agent.
    #[must_use]
    pub fn peer_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/mcp", self.port)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// On-disk layout of a declarative descriptor file.
///
/// ```yaml
/// agent:
///   name: researcher
///   provider: anthropic
///   model: claude-sonnet-4-20250514
///   role: "You are a research assistant."
///   port: 8001
/// external_tools:
///   - name: web_search
///     endpoint: http://localhost:9001/mcp
/// logging:
///   level: debug
///   file: /var/log/plexus/researcher.log
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpecFile {
    agent: SpecFileAgent,
    #[serde(default)]
    external_tools: Vec<ExternalTool>,
    #[serde(default)]
    logging: LogConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpecFileAgent {
    name: String,
    port: u16,
    provider: String,
    model: String,
    role: String,
}

/// Load and validate a descriptor from a YAML file.
///
/// Unrecognized keys anywhere in the document are rejected.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails
/// descriptor validation.
pub fn load_spec_file(path: &Path) -> Result<AgentSpec, SpecError> {
    let raw = std::fs::read_to_string(path)?;
    let file: SpecFile = serde_yaml::from_str(&raw)?;
    let spec = AgentSpec {
        name: file.agent.name,
        port: file.agent.port,
        provider: file.agent.provider,
        model: file.agent.model,
        role: file.agent.role,
        external_tools: file.external_tools,
        logging: file.logging,
    };
    spec.validate()?;
    Ok(spec)
}
