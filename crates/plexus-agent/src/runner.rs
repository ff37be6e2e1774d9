//! Agent process entry point.
//!
//! The supervisor spawns the CLI binary with the hidden `agent-runner`
//! subcommand, which lands here. Order matters: the peer transport must
//! be listening before the control socket reports `ready`, and the
//! control socket file must be gone on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plexus_control::paths;
use plexus_core::{AgentSpec, EventKind};

use crate::control::{remove_socket, ControlServer};
use crate::error::AgentError;
use crate::runtime::AgentRuntime;

/// Hard deadline on graceful shutdown; past this the process exits
/// regardless of what is still in flight.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Route this process's tracing output to the agent's log file.
///
/// The descriptor's `logging` section may override the file path and the
/// default filter level; `RUST_LOG` wins over both.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(spec: &AgentSpec, runtime_dir: &std::path::Path) -> Result<(), AgentError> {
    let path = spec
        .logging
        .file
        .clone()
        .unwrap_or_else(|| paths::log_path(runtime_dir, &spec.name));
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;

    let default_level = spec.logging.level.as_deref().unwrap_or("info");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}

/// Run an agent process to completion.
///
/// Returns once a graceful shutdown finishes; the caller exits with
/// status 0. Startup failures (busy port, missing credentials, name
/// collision) return an error and the process exits nonzero, which the
/// supervisor's readiness poll turns into `failed`.
///
/// # Errors
///
/// Any startup failure; after startup, errors are handled internally.
pub async fn run_agent(spec: AgentSpec) -> Result<(), AgentError> {
    spec.validate()?;

    let runtime_dir = paths::runtime_dir();
    paths::ensure_runtime_dir(&runtime_dir)?;
    init_logging(&spec, &runtime_dir)?;

    info!(agent = %spec.name, port = spec.port, "starting agent");

    let provider = plexus_llm::create_provider(&spec.provider, &spec.model)?;
    let runtime = Arc::new(AgentRuntime::new(spec.clone(), provider));

    // Bind the work plane first so a busy port fails startup here.
    let listener = plexus_peer::try_bind(spec.port).await?;
    let peer_task = {
        let handler: Arc<dyn plexus_peer::PeerHandler> = Arc::clone(&runtime) as Arc<dyn plexus_peer::PeerHandler>;
        tokio::spawn(plexus_peer::serve(listener, handler))
    };

    let shutdown = Arc::new(Notify::new());
    let socket = paths::socket_path(&runtime_dir, &spec.name);
    let control = match ControlServer::bind(Arc::clone(&runtime), &socket, Arc::clone(&shutdown)).await
    {
        Ok(control) => control,
        Err(e) => {
            peer_task.abort();
            return Err(e);
        }
    };
    let control_task = tokio::spawn(control.run());

    runtime.set_ready();
    info!(agent = %spec.name, "agent ready");

    wait_for_shutdown(&runtime, &shutdown).await;

    // Cancel in-flight turns first: each returns an error to its caller
    // over its still-open connection. Then stop accepting, and wait for
    // the conversations to unwind, all under the hard deadline.
    runtime.begin_shutdown();
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        peer_task.abort();
        control_task.abort();
        let _ = peer_task.await;
        let _ = control_task.await;
        runtime.drain().await;
    })
    .await;

    remove_socket(&socket);
    info!(agent = %spec.name, "agent stopped");
    Ok(())
}

async fn wait_for_shutdown(runtime: &Arc<AgentRuntime>, shutdown: &Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                shutdown.notified().await;
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("cannot install SIGINT handler: {e}");
                shutdown.notified().await;
                return;
            }
        };

        tokio::select! {
            () = shutdown.notified() => {
                info!("shutdown requested over control socket");
            }
            _ = sigterm.recv() => {
                runtime.events().emit(
                    EventKind::ShutdownRequested,
                    None,
                    None,
                    serde_json::json!({"signal": "SIGTERM"}),
                );
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                runtime.events().emit(
                    EventKind::ShutdownRequested,
                    None,
                    None,
                    serde_json::json!({"signal": "SIGINT"}),
                );
                info!("received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    shutdown.notified().await;
}
