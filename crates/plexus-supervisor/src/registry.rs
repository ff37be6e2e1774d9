//! Persisted registry for cross-invocation CLI discovery.
//!
//! A single JSON file under the runtime directory records every known
//! agent with its descriptor, last pid, port and status, so a fresh CLI
//! process can find agents spawned by an earlier one. Writes go through
//! a temp file and an atomic rename; readers re-probe liveness before
//! trusting an entry, so last-writer-wins is acceptable.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use plexus_core::{AgentSpec, AgentStatus};

/// One persisted agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Full descriptor; restarts re-use it
    pub spec: AgentSpec,
    /// Last known pid, if the agent was running when recorded
    #[serde(default)]
    pub pid: Option<u32>,
    /// Last recorded status
    pub status: AgentStatus,
}

/// The on-disk registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    /// Agent name to entry
    #[serde(default)]
    pub agents: BTreeMap<String, RegistryEntry>,
}

impl RegistryFile {
    /// Load the registry, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// I/O errors other than not-found, or a corrupt document.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Write the registry atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Filesystem errors.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, port: u16) -> AgentSpec {
        AgentSpec::new(name, port, "openai", "gpt-4o", "helper").unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RegistryFile::load(&dir.path().join("registry.json")).unwrap();
        assert!(registry.agents.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = RegistryFile::default();
        registry.agents.insert(
            "alice".into(),
            RegistryEntry { spec: spec("alice", 8001), pid: Some(4242), status: AgentStatus::Running },
        );
        registry.save(&path).unwrap();

        let loaded = RegistryFile::load(&path).unwrap();
        let entry = loaded.agents.get("alice").unwrap();
        assert_eq!(entry.pid, Some(4242));
        assert_eq!(entry.status, AgentStatus::Running);
        assert_eq!(entry.spec.port, 8001);

        // No stray temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(RegistryFile::load(&path).is_err());
    }
}
