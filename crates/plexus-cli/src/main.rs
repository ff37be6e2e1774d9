//! # plexus
//!
//! Operator command line for the Plexus multi-agent runtime.
//!
//! The same binary doubles as the agent process: the supervisor spawns
//! `plexus agent-runner --spec <json>` (hidden subcommand) for each
//! descriptor, so a single installed executable carries the whole system.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

mod commands;
mod exit_error;
mod output;

use exit_error::ExitError;
use plexus_core::MetricsFormat;

/// Manage a mesh of model-backed agent processes.
#[derive(Parser)]
#[command(name = "plexus", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start agents from descriptor files
    Start {
        /// YAML descriptor files, one agent each
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Connect every started agent to every other, bidirectionally
        #[arg(short, long)]
        connect_all: bool,
    },

    /// Gracefully stop agents (all when no names are given)
    Stop {
        /// Agent names
        names: Vec<String>,
    },

    /// Stop then start agents
    Restart {
        /// Agent names (all when empty)
        names: Vec<String>,
    },

    /// Show the registry as a table
    Status,

    /// Establish a directed peer link
    Connect {
        from: String,
        to: String,
        /// Also create the reverse link
        #[arg(short, long)]
        bidirectional: bool,
    },

    /// Remove a directed peer link
    Disconnect { from: String, to: String },

    /// Query an agent's health
    Health { name: String },

    /// Query an agent's metrics
    Metrics {
        name: String,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Json)]
        format: FormatArg,
    },

    /// Send a message to an agent and print its reply
    Chat {
        name: String,
        /// Message text; omit with --interactive
        message: Option<String>,
        /// Stream a transcript of events (tool calls, peer hops)
        #[arg(short, long)]
        verbose: bool,
        /// Keep reading messages from stdin
        #[arg(short, long)]
        interactive: bool,
    },

    /// Print an agent's log file
    Logs {
        name: String,
        /// Keep following new output
        #[arg(short, long)]
        follow: bool,
        /// Number of trailing lines to show first
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Internal: run an agent process (spawned by the supervisor)
    #[command(hide = true)]
    AgentRunner {
        /// JSON-encoded agent descriptor
        #[arg(long)]
        spec: String,
    },
}

/// CLI-facing metrics format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Prometheus,
}

impl From<FormatArg> for MetricsFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => Self::Json,
            FormatArg::Prometheus => Self::Prometheus,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The agent runner sets up its own file logging; everything else logs
    // to stderr at warn unless RUST_LOG says otherwise.
    if !matches!(cli.command, Commands::AgentRunner { .. }) {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.code);
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    match cli.command {
        Commands::Start { files, connect_all } => commands::start(files, connect_all).await,
        Commands::Stop { names } => commands::stop(names).await,
        Commands::Restart { names } => commands::restart(names).await,
        Commands::Status => commands::status().await,
        Commands::Connect { from, to, bidirectional } => {
            commands::connect(from, to, bidirectional).await
        }
        Commands::Disconnect { from, to } => commands::disconnect(from, to).await,
        Commands::Health { name } => commands::health(name).await,
        Commands::Metrics { name, format } => commands::metrics(name, format.into()).await,
        Commands::Chat { name, message, verbose, interactive } => {
            commands::chat(name, message, verbose, interactive).await
        }
        Commands::Logs { name, follow, lines } => commands::logs(name, follow, lines).await,
        Commands::AgentRunner { spec } => commands::agent_runner(spec).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_with_flags() {
        let cli = Cli::try_parse_from(["plexus", "start", "alice.yaml", "bob.yaml", "-c"]).unwrap();
        match cli.command {
            Commands::Start { files, connect_all } => {
                assert_eq!(files.len(), 2);
                assert!(connect_all);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_start_requires_a_file() {
        assert!(Cli::try_parse_from(["plexus", "start"]).is_err());
    }

    #[test]
    fn test_parse_connect_bidirectional() {
        let cli = Cli::try_parse_from(["plexus", "connect", "alice", "bob", "-b"]).unwrap();
        match cli.command {
            Commands::Connect { from, to, bidirectional } => {
                assert_eq!(from, "alice");
                assert_eq!(to, "bob");
                assert!(bidirectional);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_metrics_format() {
        let cli =
            Cli::try_parse_from(["plexus", "metrics", "alice", "--format", "prometheus"]).unwrap();
        match cli.command {
            Commands::Metrics { format, .. } => assert_eq!(format, FormatArg::Prometheus),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_hidden_agent_runner() {
        let cli =
            Cli::try_parse_from(["plexus", "agent-runner", "--spec", "{\"name\":\"a\"}"]).unwrap();
        assert!(matches!(cli.command, Commands::AgentRunner { .. }));
    }

    #[test]
    fn test_parse_chat_flags() {
        let cli = Cli::try_parse_from(["plexus", "chat", "alice", "-v", "-i"]).unwrap();
        match cli.command {
            Commands::Chat { message, verbose, interactive, .. } => {
                assert!(message.is_none());
                assert!(verbose);
                assert!(interactive);
            }
            _ => panic!("wrong command"),
        }
    }
}
