//! Terminal rendering: status table and event transcripts.

use colored::Colorize;

use plexus_core::{AgentStatus, EventKind, EventRecord};
use plexus_supervisor::StatusEntry;

/// Render the registry as the `status` table.
#[must_use]
pub fn status_table(entries: &[StatusEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:<10} {:<8} {:<10} {:<6}\n",
        "NAME", "STATUS", "PID", "UPTIME", "PORT"
    ));
    for entry in entries {
        let pid = entry.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
        let uptime = entry
            .uptime_s
            .map_or_else(|| "-".to_string(), format_uptime);
        out.push_str(&format!(
            "{:<16} {:<10} {:<8} {:<10} {:<6}\n",
            entry.name,
            colored_status(entry.status),
            pid,
            uptime,
            entry.port,
        ));
        if let Some(error) = &entry.last_error {
            out.push_str(&format!("  {}\n", error.dimmed()));
        }
    }
    out
}

fn colored_status(status: AgentStatus) -> String {
    let text = status.to_string();
    match status {
        AgentStatus::Running => text.green().to_string(),
        AgentStatus::Starting | AgentStatus::Stopping => text.yellow().to_string(),
        AgentStatus::Unhealthy | AgentStatus::Failed => text.red().to_string(),
        AgentStatus::Stopped => text.dimmed().to_string(),
    }
}

fn format_uptime(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Render one event for the verbose chat transcript, or `None` for kinds
/// that are noise at the terminal.
#[must_use]
pub fn transcript_line(record: &EventRecord) -> Option<String> {
    let peer = record.peer.as_deref().unwrap_or("?");
    let line = match record.kind {
        EventKind::TurnStarted => format!("{} turn started", record.agent.bold()),
        EventKind::ToolCallStarted => {
            let tool = record.payload["tool"].as_str().unwrap_or("?");
            format!("  {} {}", "→".yellow(), tool.yellow())
        }
        EventKind::ToolCallFinished => format!("  {} tool finished", "←".yellow()),
        EventKind::PeerMessageSent => {
            let message = record.payload["message"].as_str().unwrap_or("");
            format!("  {} {} {}", "»".cyan(), peer.cyan().bold(), message)
        }
        EventKind::PeerMessageReceived => {
            let from = record.payload["from"].as_str().unwrap_or(peer);
            format!("  {} from {}", "«".cyan(), from.cyan().bold())
        }
        EventKind::ModelRequest => format!("  {} model call", "…".dimmed()),
        EventKind::Error => {
            let detail = record.payload["detail"].as_str().unwrap_or("error");
            format!("  {} {}", "✗".red(), detail.red())
        }
        EventKind::TurnCapped => format!("  {} iteration cap reached", "!".red()),
        EventKind::TurnFinished => format!("{} turn finished", record.agent.bold()),
        _ => return None,
    };
    Some(line)
}
