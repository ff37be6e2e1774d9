//! Deterministic filesystem locations for the control plane.
//!
//! Everything lives under one runtime directory: control sockets, agent
//! log files and the registry file. The directory is created with
//! owner-only permissions.

use std::path::PathBuf;

/// Environment variable overriding the runtime directory.
pub const RUNTIME_DIR_ENV: &str = "PLEXUS_RUNTIME_DIR";

/// Resolve the runtime directory (`$PLEXUS_RUNTIME_DIR` or
/// `<os tmp>/plexus`). Does not create it.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    std::env::var_os(RUNTIME_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("plexus"))
}

/// Create the runtime directory with mode 0700 if missing.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn ensure_runtime_dir(dir: &std::path::Path) -> std::io::Result<()> {
    if !dir.exists() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        }
        #[cfg(not(unix))]
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Control socket path for an agent: `<runtime_dir>/agent-<name>.sock`.
#[must_use]
pub fn socket_path(runtime_dir: &std::path::Path, name: &str) -> PathBuf {
    runtime_dir.join(format!("agent-{name}.sock"))
}

/// Log file path for an agent: `<runtime_dir>/agent-<name>.log`.
#[must_use]
pub fn log_path(runtime_dir: &std::path::Path, name: &str) -> PathBuf {
    runtime_dir.join(format!("agent-{name}.log"))
}

/// Registry file path: `<runtime_dir>/registry.json`.
#[must_use]
pub fn registry_path(runtime_dir: &std::path::Path) -> PathBuf {
    runtime_dir.join("registry.json")
}
