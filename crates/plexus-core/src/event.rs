//! In-process event bus backing `subscribe_events`.
//!
//! Every significant agent action emits an [`EventRecord`] with a
//! monotonic sequence number. Records are retained in a bounded ring so a
//! late subscriber can replay recent history, and fanned out to bounded
//! per-subscriber queues. A subscriber that stops draining its queue is
//! dropped rather than ever blocking the emitter.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Default ring capacity (replayable backlog).
pub const DEFAULT_RING_CAPACITY: usize = 1000;

/// Default per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Kinds of events emitted by an agent or the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TurnStarted,
    TurnFinished,
    TurnCapped,
    ToolCallStarted,
    ToolCallFinished,
    PeerMessageReceived,
    PeerMessageSent,
    ModelRequest,
    ModelResponse,
    Error,
    Connected,
    Disconnected,
    ShutdownRequested,
}

/// A single structured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number, unique within one agent
    pub seq: u64,
    /// Wall-clock emission time
    pub timestamp: DateTime<Utc>,
    /// Emitting agent name
    pub agent: String,
    /// Event kind
    pub kind: EventKind,
    /// Conversation correlation id, if the event belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Peer name, for peer-directed events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Kind-specific payload
    #[serde(default)]
    pub payload: Value,
}

struct Subscriber {
    tx: mpsc::Sender<EventRecord>,
}

struct Inner {
    ring: VecDeque<EventRecord>,
    next_seq: u64,
    subscribers: Vec<Subscriber>,
}

/// Publish/subscribe bus for one agent process.
pub struct EventBus {
    agent: String,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl EventBus {
    /// Create a bus with the default ring capacity.
    #[must_use]
    pub fn new(agent: impl Into<String>) -> Self {
        Self::with_capacity(agent, DEFAULT_RING_CAPACITY)
    }

    /// Create a bus with an explicit ring capacity.
    #[must_use]
    pub fn with_capacity(agent: impl Into<String>, capacity: usize) -> Self {
        Self {
            agent: agent.into(),
            capacity,
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                next_seq: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Emit an event, returning its sequence number.
    ///
    /// Never blocks: subscribers with full or closed queues are removed.
    pub fn emit(
        &self,
        kind: EventKind,
        correlation_id: Option<&str>,
        peer: Option<&str>,
        payload: Value,
    ) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let record = EventRecord {
            seq,
            timestamp: Utc::now(),
            agent: self.agent.clone(),
            kind,
            correlation_id: correlation_id.map(str::to_owned),
            peer: peer.map(str::to_owned),
            payload,
        };

        if inner.ring.len() == self.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(record.clone());

        inner
            .subscribers
            .retain(|sub| sub.tx.try_send(record.clone()).is_ok());

        seq
    }

    /// Subscribe to the stream.
    ///
    /// With `since_seq`, all retained events with `seq >= since_seq` are
    /// replayed first; if the requested start has aged out of the ring the
    /// replay begins at the oldest retained record (no gap is introduced on
    /// the subscriber side). Without `since_seq` only live events are
    /// delivered.
    pub fn subscribe(&self, since_seq: Option<u64>) -> EventSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock();

        let backlog = match since_seq {
            Some(seq) => inner
                .ring
                .iter()
                .filter(|r| r.seq >= seq)
                .cloned()
                .collect(),
            None => VecDeque::new(),
        };

        inner.subscribers.push(Subscriber { tx });
        EventSubscription { backlog, rx }
    }

    /// Sequence number the next emitted event will carry.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Number of currently attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Receiving half of a subscription: replayed backlog, then live events.
pub struct EventSubscription {
    backlog: VecDeque<EventRecord>,
    rx: mpsc::Receiver<EventRecord>,
}

impl EventSubscription {
    /// Next event, or `None` once the bus dropped this subscriber and the
    /// backlog is drained.
    pub async fn next(&mut self) -> Option<EventRecord> {
        if let Some(record) = self.backlog.pop_front() {
            return Some(record);
        }
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::next`].
    pub fn try_next(&mut self) -> Option<EventRecord> {
        if let Some(record) = self.backlog.pop_front() {
            return Some(record);
        }
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sequence_is_monotonic_and_contiguous() {
        let bus = EventBus::new("alice");
        let mut sub = bus.subscribe(Some(1));

        for _ in 0..5 {
            bus.emit(EventKind::TurnStarted, Some("c1"), None, json!({}));
        }

        let mut prev = 0;
        for _ in 0..5 {
            let record = sub.next().await.unwrap();
            assert_eq!(record.seq, prev + 1);
            prev = record.seq;
        }
    }

    #[tokio::test]
    async fn test_replay_from_since_seq() {
        let bus = EventBus::new("alice");
        for _ in 0..10 {
            bus.emit(EventKind::ModelRequest, None, None, json!({}));
        }

        let mut sub = bus.subscribe(Some(7));
        assert_eq!(sub.next().await.unwrap().seq, 7);
        assert_eq!(sub.next().await.unwrap().seq, 8);
    }

    #[tokio::test]
    async fn test_replay_clamps_to_oldest_retained() {
        let bus = EventBus::with_capacity("alice", 4);
        for _ in 0..10 {
            bus.emit(EventKind::ModelRequest, None, None, json!({}));
        }

        // Ring retains seqs 7..=10; asking for 1 starts at 7.
        let mut sub = bus.subscribe(Some(1));
        assert_eq!(sub.next().await.unwrap().seq, 7);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_not_blocked() {
        let bus = EventBus::new("alice");
        let _stalled = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 1);

        // Overflow the stalled subscriber's queue; emit must not block.
        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY + 1) {
            bus.emit(EventKind::ModelResponse, None, None, json!({}));
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_live_events_after_backlog() {
        let bus = EventBus::new("alice");
        bus.emit(EventKind::Connected, None, Some("bob"), json!({}));

        let mut sub = bus.subscribe(Some(1));
        bus.emit(EventKind::Disconnected, None, Some("bob"), json!({}));

        assert_eq!(sub.next().await.unwrap().kind, EventKind::Connected);
        assert_eq!(sub.next().await.unwrap().kind, EventKind::Disconnected);
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let bus = EventBus::new("alice");
        bus.emit(
            EventKind::ToolCallStarted,
            Some("c1"),
            Some("bob"),
            json!({"tool": "communicate_with_bob"}),
        );
        let mut sub = bus.subscribe(Some(1));
        let record = sub.try_next().unwrap();

        let line = serde_json::to_string(&record).unwrap();
        let parsed: EventRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.kind, EventKind::ToolCallStarted);
        assert_eq!(parsed.peer.as_deref(), Some("bob"));
    }
}
