//! Conversation state, keyed by correlation id.
//!
//! Each external caller identity gets its own conversation; histories are
//! never shared and never persisted. A per-conversation async mutex
//! serializes turns within one conversation while distinct conversations
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use plexus_llm::{ChatMessage, Role};

/// Observability phase of one conversation's reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No turn in flight
    #[default]
    Idle,
    /// Inside a model call
    Running,
    /// Inside a peer or tool call
    WaitingOnTool,
}

/// One turn of a conversation.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Peer the turn came from, for peer-originated input
    pub peer: Option<String>,
}

/// Shared handle to one conversation.
pub struct Conversation {
    /// Serializes turns within this conversation.
    pub gate: tokio::sync::Mutex<()>,
    turns: Mutex<Vec<Turn>>,
    phase: Mutex<Phase>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            turns: Mutex::new(Vec::new()),
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Append a turn to the log.
    pub fn push(&self, role: Role, content: impl Into<String>, peer: Option<&str>) {
        self.turns.lock().push(Turn {
            role,
            content: content.into(),
            peer: peer.map(str::to_owned),
        });
    }

    /// Render the log as provider messages, in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns
            .lock()
            .iter()
            .map(|t| ChatMessage { role: t.role, content: t.content.clone() })
            .collect()
    }

    /// Number of turns recorded.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns.lock().len()
    }

    /// Update the observability phase.
    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    /// Current observability phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }
}

/// Registry of live conversations for one agent.
#[derive(Default)]
pub struct Conversations {
    inner: Mutex<HashMap<String, Arc<Conversation>>>,
}

impl Conversations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the conversation for a correlation id.
    #[must_use]
    pub fn get_or_create(&self, correlation_id: &str) -> Arc<Conversation> {
        self.inner
            .lock()
            .entry(correlation_id.to_string())
            .or_insert_with(|| Arc::new(Conversation::new()))
            .clone()
    }

    /// Number of conversations currently not idle.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|c| c.phase() != Phase::Idle)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_order_matches_append_order() {
        let conv = Conversation::new();
        conv.push(Role::User, "first", None);
        conv.push(Role::Assistant, "second", None);
        conv.push(Role::Tool, "third", Some("bob"));

        let messages = conv.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert_eq!(messages[2].content, "third");
    }

    #[test]
    fn test_correlation_ids_isolate_histories() {
        let conversations = Conversations::new();
        let a = conversations.get_or_create("conv-a");
        let b = conversations.get_or_create("conv-b");

        a.push(Role::User, "for a", None);
        assert_eq!(a.turn_count(), 1);
        assert_eq!(b.turn_count(), 0);

        // Same id returns the same conversation.
        let a_again = conversations.get_or_create("conv-a");
        assert_eq!(a_again.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_gate_serializes_one_conversation() {
        let conversations = Conversations::new();
        let conv = conversations.get_or_create("c");

        let first = conv.gate.lock().await;
        assert!(conv.gate.try_lock().is_err());
        drop(first);
        assert!(conv.gate.try_lock().is_ok());
    }

    #[test]
    fn test_active_count_tracks_phase() {
        let conversations = Conversations::new();
        let conv = conversations.get_or_create("c");
        assert_eq!(conversations.active_count(), 0);

        conv.set_phase(Phase::Running);
        assert_eq!(conversations.active_count(), 1);

        conv.set_phase(Phase::Idle);
        assert_eq!(conversations.active_count(), 0);
    }
}
