//! Command implementations.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use plexus_control::{paths, ControlClient};
use plexus_core::spec::load_spec_file;
use plexus_core::{AgentStatus, MetricsFormat};
use plexus_supervisor::{RunnerCommand, Supervisor, SupervisorConfig};

use crate::exit_error::{ExitError, EXIT_AGENT};
use crate::output::{status_table, transcript_line};

/// Build a supervisor attached to the persisted registry.
fn load_supervisor() -> Result<Arc<Supervisor>, ExitError> {
    let runtime_dir = paths::runtime_dir();
    paths::ensure_runtime_dir(&runtime_dir)?;
    let runner = RunnerCommand::current_exe()?;
    let supervisor = Supervisor::load(SupervisorConfig::default(), runner, runtime_dir)?;
    Ok(Arc::new(supervisor))
}

fn require_known(supervisor: &Supervisor, name: &str) -> Result<(), ExitError> {
    if supervisor.agent_names().iter().any(|n| n == name) {
        Ok(())
    } else {
        Err(ExitError::operator(format!("unknown agent: {name}")))
    }
}

/// `plexus start <file>... [--connect-all]`
pub async fn start(files: Vec<PathBuf>, connect_all: bool) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;

    let mut names = Vec::new();
    for file in &files {
        let spec = load_spec_file(file)
            .map_err(|e| ExitError::operator(format!("{}: {e}", file.display())))?;
        names.push(spec.name.clone());
        supervisor.add_or_replace(spec)?;
        println!("{} loaded descriptor {}", "✓".green(), file.display());
    }

    // Start the batch in parallel; each start returns only once its agent
    // is running or failed.
    let mut handles = Vec::new();
    for name in &names {
        let supervisor = Arc::clone(&supervisor);
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            let result = supervisor.start(&name).await;
            (name, result)
        }));
    }

    let mut failures = 0;
    for handle in handles {
        let (name, result) = handle.await.map_err(|e| ExitError::new(EXIT_AGENT, e.to_string()))?;
        match result {
            Ok(()) => println!("{} {} is running", "✓".green(), name.bold()),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {e}", "✗".red(), name.bold());
            }
        }
    }
    supervisor.persist();

    if connect_all && names.len() > 1 && failures == 0 {
        for (i, a) in names.iter().enumerate() {
            for b in names.iter().skip(i + 1) {
                supervisor.connect(a, b, true).await?;
                println!("{} connected {} {} {}", "✓".green(), a.bold(), "↔".cyan(), b.bold());
            }
        }
    }

    if failures > 0 {
        return Err(ExitError::new(
            EXIT_AGENT,
            format!("{failures} agent(s) failed to start"),
        ));
    }
    println!("\nAgents are running in the background; `plexus status` to inspect.");
    Ok(())
}

/// `plexus stop [name...]`
pub async fn stop(names: Vec<String>) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    let targets = if names.is_empty() { supervisor.agent_names() } else { names };

    for name in &targets {
        require_known(&supervisor, name)?;
    }

    let mut handles = Vec::new();
    for name in targets {
        let supervisor = Arc::clone(&supervisor);
        handles.push(tokio::spawn(async move {
            let result = supervisor.stop(&name).await;
            (name, result)
        }));
    }
    for handle in handles {
        let (name, result) = handle.await.map_err(|e| ExitError::new(EXIT_AGENT, e.to_string()))?;
        match result {
            Ok(()) => println!("{} stopped {}", "✓".green(), name.bold()),
            Err(e) => eprintln!("{} {}: {e}", "✗".red(), name.bold()),
        }
    }
    supervisor.persist();
    Ok(())
}

/// `plexus restart [name...]`
pub async fn restart(names: Vec<String>) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    let targets = if names.is_empty() { supervisor.agent_names() } else { names };

    for name in &targets {
        require_known(&supervisor, name)?;
        supervisor.restart(name).await?;
        println!("{} restarted {}", "✓".green(), name.bold());
    }
    supervisor.persist();
    Ok(())
}

/// `plexus status`
pub async fn status() -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    let entries = {
        supervisor.refresh_liveness();
        supervisor.persist();
        supervisor.status()
    };

    if entries.is_empty() {
        println!("No agents are registered.");
        return Ok(());
    }
    print!("{}", status_table(&entries));

    if entries.iter().any(|e| e.status == AgentStatus::Failed) {
        return Err(ExitError::new(EXIT_AGENT, "one or more agents have failed"));
    }
    Ok(())
}

/// `plexus connect <from> <to> [-b]`
pub async fn connect(from: String, to: String, bidirectional: bool) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    supervisor.refresh_liveness();
    supervisor.connect(&from, &to, bidirectional).await?;
    let arrow = if bidirectional { "↔" } else { "→" };
    println!("{} connected {} {} {}", "✓".green(), from.bold(), arrow.cyan(), to.bold());
    Ok(())
}

/// `plexus disconnect <from> <to>`
pub async fn disconnect(from: String, to: String) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    supervisor.refresh_liveness();
    supervisor.disconnect(&from, &to).await?;
    println!("{} disconnected {} {} {}", "✓".green(), from.bold(), "→".dimmed(), to.bold());
    Ok(())
}

/// `plexus health <name>`
pub async fn health(name: String) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    require_known(&supervisor, &name)?;
    let reply = supervisor.health(&name).await?;
    println!("{}", serde_json::to_string_pretty(&reply).unwrap_or_default());
    Ok(())
}

/// `plexus metrics <name> [-f json|prometheus]`
pub async fn metrics(name: String, format: MetricsFormat) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    require_known(&supervisor, &name)?;
    let value = supervisor.metrics(&name, format).await?;
    match value.as_str() {
        // Prometheus text comes through as a string payload.
        Some(text) => println!("{text}"),
        None => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
    }
    Ok(())
}

/// `plexus chat <name> [-v] [-i] [message]`
pub async fn chat(
    name: String,
    message: Option<String>,
    verbose: bool,
    interactive: bool,
) -> Result<(), ExitError> {
    let supervisor = load_supervisor()?;
    require_known(&supervisor, &name)?;

    let client = ControlClient::new(paths::socket_path(&paths::runtime_dir(), &name));
    // One correlation id for the whole sitting, so an interactive session
    // accumulates a single conversation on the agent.
    let correlation_id = uuid::Uuid::new_v4().to_string();

    if let Some(message) = &message {
        send_chat(&client, &name, &correlation_id, verbose, message).await?;
    } else if !interactive {
        return Err(ExitError::operator("a message is required unless --interactive is set"));
    }

    if interactive {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("{} ", ">".bold());
            let Ok(Some(line)) = lines.next_line().await else { break };
            let line = line.trim();
            if line.is_empty() || line == "exit" {
                break;
            }
            send_chat(&client, &name, &correlation_id, verbose, line).await?;
        }
    }
    Ok(())
}

async fn send_chat(
    client: &ControlClient,
    name: &str,
    correlation_id: &str,
    verbose: bool,
    message: &str,
) -> Result<(), ExitError> {
    let reply = client
        .chat(message, Some(correlation_id), |record| {
            if verbose {
                if let Some(line) = transcript_line(&record) {
                    eprintln!("{line}");
                }
            }
        })
        .await?;
    println!("{} {}", format!("{name}:").bold().green(), reply);
    Ok(())
}

/// `plexus logs <name> [-f] [-n lines]`
pub async fn logs(name: String, follow: bool, lines: usize) -> Result<(), ExitError> {
    let path = paths::log_path(&paths::runtime_dir(), &name);
    let content = std::fs::read_to_string(&path)
        .map_err(|_| ExitError::operator(format!("no log file for agent {name}")))?;

    let tail: Vec<&str> = content.lines().collect();
    let skip = tail.len().saturating_sub(lines);
    for line in &tail[skip..] {
        println!("{line}");
    }

    if follow {
        let mut pos = content.len() as u64;
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let Ok(meta) = std::fs::metadata(&path) else { continue };
            if meta.len() <= pos {
                continue;
            }
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(pos))?;
            let mut fresh = String::new();
            file.read_to_string(&mut fresh)?;
            pos += fresh.len() as u64;
            print!("{fresh}");
        }
    }
    Ok(())
}

/// Hidden `plexus agent-runner --spec <json>`: becomes the agent process.
pub async fn agent_runner(spec_json: String) -> Result<(), ExitError> {
    let spec: plexus_core::AgentSpec = serde_json::from_str(&spec_json)
        .map_err(|e| ExitError::operator(format!("invalid --spec payload: {e}")))?;

    plexus_agent::runner::run_agent(spec)
        .await
        .map_err(|e| ExitError::new(EXIT_AGENT, e.to_string()))
}
