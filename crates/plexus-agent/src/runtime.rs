//! The agent runtime: reasoning loop, tool dispatch, peer surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use plexus_core::{AgentSpec, EventBus, EventKind, Metrics};
use plexus_llm::{tagged, ChatMessage, ChatProvider, Completion, Role, ToolInvocation, ToolSpec};
use plexus_peer::{PeerClient, PeerHandler, PeerStatus};

use crate::conversation::{Conversation, Conversations, Phase};
use crate::error::AgentError;
use crate::routing::{ConnectOutcome, RoutingTable};

/// Iteration cap of the reasoning loop for one incoming message.
const MAX_ITERATIONS: usize = 8;
/// Model retry budget per loop iteration.
const MODEL_RETRIES: u32 = 3;
/// Base backoff between model retries, doubled each attempt.
const RETRY_BASE: Duration = Duration::from_millis(250);

/// Where an incoming message came from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// An external human interface
    User,
    /// A peer agent, by name
    Peer(String),
}

impl Origin {
    fn peer(&self) -> Option<&str> {
        match self {
            Self::User => None,
            Self::Peer(name) => Some(name),
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Peer(_) => "peer",
        }
    }
}

/// One agent process's runtime state.
///
/// Owns the conversation log, the routing table, the event bus and the
/// metrics registry. Cheap to share: handlers hold it in an `Arc`.
pub struct AgentRuntime {
    spec: AgentSpec,
    provider: Arc<dyn ChatProvider>,
    routing: RoutingTable,
    conversations: Conversations,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    peers: PeerClient,
    started: Instant,
    ready: AtomicBool,
    cancel: CancellationToken,
}

impl AgentRuntime {
    /// Build the runtime for a descriptor with a concrete provider.
    #[must_use]
    pub fn new(spec: AgentSpec, provider: Arc<dyn ChatProvider>) -> Self {
        let events = Arc::new(EventBus::new(spec.name.clone()));
        let metrics = Arc::new(Metrics::new());
        register_standard_metrics(&metrics);

        Self {
            routing: RoutingTable::new(spec.name.clone()),
            conversations: Conversations::new(),
            events,
            metrics,
            peers: PeerClient::new(),
            started: Instant::now(),
            ready: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            spec,
            provider,
        }
    }

    /// Descriptor this runtime was built from.
    #[must_use]
    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// Event bus for this agent.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Metrics registry for this agent.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Routing table for this agent.
    #[must_use]
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Seconds since the process started.
    #[must_use]
    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Mark the runtime ready (peer transport listening).
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
        self.metrics.set_gauge("agent_up", 1.0, &[]);
    }

    /// Whether readiness has been reached.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Begin shutdown: in-flight reasoning-loop turns are abandoned at
    /// their next suspension point and return an error to their callers;
    /// new turns are refused immediately.
    pub fn begin_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`Self::begin_shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until no conversation has a turn in flight. Callers bound
    /// this with a deadline.
    pub async fn drain(&self) {
        while self.conversations.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Refresh derived gauges; called before metrics snapshots.
    pub fn refresh_gauges(&self) {
        self.metrics
            .set_gauge("agent_uptime_seconds", self.started.elapsed().as_secs_f64(), &[]);
        self.metrics
            .set_gauge("peer_table_size", self.routing.len() as f64, &[]);
        self.metrics.set_gauge(
            "outstanding_requests",
            self.conversations.active_count() as f64,
            &[],
        );
    }

    /// Add (or move) a routing-table entry and emit the matching event.
    ///
    /// # Errors
    ///
    /// [`AgentError::SelfConnect`] when the agent is asked to connect to
    /// itself.
    pub fn connect_peer(&self, peer: &str, endpoint: &str) -> Result<ConnectOutcome, AgentError> {
        let outcome = self.routing.connect(peer, endpoint)?;
        if outcome != ConnectOutcome::Unchanged {
            self.events.emit(
                EventKind::Connected,
                None,
                Some(peer),
                json!({"endpoint": endpoint, "replaced": outcome == ConnectOutcome::Replaced}),
            );
        }
        info!(peer, endpoint, "peer connected");
        Ok(outcome)
    }

    /// Remove a routing-table entry; absent peers are a quiet no-op.
    pub fn disconnect_peer(&self, peer: &str) {
        if self.routing.disconnect(peer) {
            self.events.emit(EventKind::Disconnected, None, Some(peer), Value::Null);
            info!(peer, "peer disconnected");
        }
    }

    /// Run the reasoning loop for one incoming message and return the
    /// final reply text.
    ///
    /// Turns within one correlation id are strictly serialized; separate
    /// correlation ids proceed concurrently. Shutdown cancels the turn at
    /// its next suspension point, abandoning any in-flight model or peer
    /// call.
    ///
    /// # Errors
    ///
    /// [`AgentError::Model`] when the provider keeps failing past the
    /// retry budget (the conversation returns to idle and accepts new
    /// input afterwards); [`AgentError::ShuttingDown`] when shutdown
    /// interrupts or precedes the turn.
    #[instrument(skip(self, message), fields(agent = %self.spec.name, correlation_id))]
    pub async fn handle_message(
        &self,
        origin: Origin,
        message: &str,
        correlation_id: &str,
    ) -> Result<String, AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::ShuttingDown);
        }

        let conversation = self.conversations.get_or_create(correlation_id);
        let _gate = conversation.gate.lock().await;

        match &origin {
            Origin::User => conversation.push(Role::User, message, None),
            Origin::Peer(from) => conversation.push(
                Role::User,
                format!("Message from {from}: {message}"),
                Some(from),
            ),
        }
        self.events.emit(
            EventKind::TurnStarted,
            Some(correlation_id),
            origin.peer(),
            json!({"origin": origin.label()}),
        );

        // Dropping the drive future abandons whatever call it is inside.
        let result = tokio::select! {
            result = self.drive(&conversation, &origin, correlation_id) => result,
            () = self.cancel.cancelled() => {
                self.events.emit(
                    EventKind::Error,
                    Some(correlation_id),
                    None,
                    json!({"kind": "shutdown", "detail": "turn abandoned: agent is shutting down"}),
                );
                Err(AgentError::ShuttingDown)
            }
        };
        conversation.set_phase(Phase::Idle);
        result
    }

    /// One pass of the reasoning loop, up to the iteration cap.
    async fn drive(
        &self,
        conversation: &Conversation,
        origin: &Origin,
        correlation_id: &str,
    ) -> Result<String, AgentError> {
        let mut last_content = String::new();
        for iteration in 1..=MAX_ITERATIONS {
            let snapshot = self.routing.snapshot();
            let tools = self.tool_specs(&snapshot);
            let mut messages = vec![ChatMessage::system(self.system_preamble(&snapshot, &tools))];
            messages.extend(conversation.messages());

            conversation.set_phase(Phase::Running);
            self.events.emit(
                EventKind::ModelRequest,
                Some(correlation_id),
                None,
                json!({"iteration": iteration, "messages": messages.len(), "tools": tools.len()}),
            );

            let completion = self.complete_with_retry(&messages, &tools, correlation_id).await?;

            self.events.emit(
                EventKind::ModelResponse,
                Some(correlation_id),
                None,
                json!({"iteration": iteration, "tool_calls": completion.tool_calls.len()}),
            );

            if completion.tool_calls.is_empty() {
                conversation.push(Role::Assistant, &completion.content, None);
                self.events.emit(
                    EventKind::TurnFinished,
                    Some(correlation_id),
                    origin.peer(),
                    json!({"iterations": iteration}),
                );
                return Ok(completion.content);
            }

            last_content = completion.content.clone();
            conversation.push(Role::Assistant, &completion.content, None);

            for call in &completion.tool_calls {
                self.events.emit(
                    EventKind::ToolCallStarted,
                    Some(correlation_id),
                    peer_of(call),
                    json!({"tool": call.name, "arguments": call.arguments}),
                );
                conversation.set_phase(Phase::WaitingOnTool);
                let result = self.dispatch_tool(call, &snapshot, correlation_id).await;
                conversation.push(Role::Tool, &result, None);
                self.events.emit(
                    EventKind::ToolCallFinished,
                    Some(correlation_id),
                    peer_of(call),
                    json!({"tool": call.name, "result": result}),
                );
            }
        }

        self.events.emit(
            EventKind::TurnCapped,
            Some(correlation_id),
            origin.peer(),
            json!({"iterations": MAX_ITERATIONS}),
        );
        warn!("reasoning loop hit iteration cap");
        Ok(last_content)
    }

    async fn complete_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        correlation_id: &str,
    ) -> Result<Completion, plexus_llm::ProviderError> {
        let mut backoff = RETRY_BASE;
        let mut attempt = 1;
        loop {
            let start = Instant::now();
            self.metrics.inc_counter("model_calls_total", &[]);
            match self.provider.complete(messages, tools).await {
                Ok(completion) => {
                    self.metrics
                        .observe("model_latency_seconds", start.elapsed().as_secs_f64(), &[]);
                    return Ok(completion);
                }
                Err(e) => {
                    self.metrics.inc_counter("model_errors_total", &[]);
                    if attempt >= MODEL_RETRIES || !e.is_retryable() {
                        self.events.emit(
                            EventKind::Error,
                            Some(correlation_id),
                            None,
                            json!({"kind": "model_failure", "detail": e.to_string(), "attempts": attempt}),
                        );
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "model call failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Outbound capability set for one routing-table snapshot: one
    /// `communicate_with_<peer>` tool per entry plus the descriptor's
    /// external tools. Recomputed every iteration, so table mutations are
    /// visible on the next turn.
    fn tool_specs(&self, snapshot: &std::collections::BTreeMap<String, String>) -> Vec<ToolSpec> {
        let mut tools: Vec<ToolSpec> = snapshot
            .keys()
            .map(|peer| {
                ToolSpec::message_tool(
                    format!("communicate_with_{peer}"),
                    format!("Send a message to agent {peer} and wait for its reply"),
                )
            })
            .collect();

        for tool in &self.spec.external_tools {
            tools.push(ToolSpec {
                name: tool.name.clone(),
                description: tool
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Call the external {} tool", tool.name)),
                parameters: json!({"type": "object"}),
            });
        }
        tools
    }

    fn system_preamble(
        &self,
        snapshot: &std::collections::BTreeMap<String, String>,
        tools: &[ToolSpec],
    ) -> String {
        let catalogue = if snapshot.is_empty() {
            "  (none yet)".to_string()
        } else {
            snapshot
                .keys()
                .map(|peer| format!("  - {peer}: use the communicate_with_{peer} tool"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut preamble = format!(
            "You are agent {name}, one node in a multi-agent system.\n\n\
             Your role: {role}\n\n\
             Peers you can reach:\n{catalogue}\n\n\
             To contact a peer, call its tool with the message to deliver.\n\
             Once a peer has answered, give the original caller a direct final\n\
             answer instead of calling more tools.",
            name = self.spec.name,
            role = self.spec.role,
        );

        if !self.provider.supports_native_tools() && !tools.is_empty() {
            preamble.push_str("\n\n");
            preamble.push_str(&tagged::tool_primer(tools));
        }
        preamble
    }

    async fn dispatch_tool(
        &self,
        call: &ToolInvocation,
        snapshot: &std::collections::BTreeMap<String, String>,
        correlation_id: &str,
    ) -> String {
        if let Some(peer) = call.name.strip_prefix("communicate_with_") {
            let Some(message) = call.arguments.get("message").and_then(Value::as_str) else {
                self.metrics.inc_counter("tool_parse_failures_total", &[]);
                return json!({"error": "missing required parameter: message"}).to_string();
            };
            let Some(endpoint) = snapshot.get(peer) else {
                return json!({"error": "unknown_peer", "peer": peer}).to_string();
            };

            self.events.emit(
                EventKind::PeerMessageSent,
                Some(correlation_id),
                Some(peer),
                json!({"message": message}),
            );
            self.metrics.inc_counter("messages_sent_total", &[("peer", peer)]);

            let start = Instant::now();
            match self
                .peers
                .receive_message(endpoint, &self.spec.name, message, correlation_id)
                .await
            {
                Ok(reply) => {
                    self.metrics.observe(
                        "peer_latency_seconds",
                        start.elapsed().as_secs_f64(),
                        &[("peer", peer)],
                    );
                    json!({"peer": peer, "response": reply}).to_string()
                }
                Err(e) => {
                    warn!(peer, error = %e, "peer call failed");
                    json!({"error": e.to_string(), "peer": peer}).to_string()
                }
            }
        } else if let Some(tool) = self.spec.external_tools.iter().find(|t| t.name == call.name) {
            match self
                .peers
                .call_tool(&tool.endpoint, &call.name, call.arguments.clone())
                .await
            {
                Ok(value) => value.to_string(),
                Err(e) => json!({"error": e.to_string(), "tool": call.name}).to_string(),
            }
        } else {
            json!({"error": format!("unknown tool: {}", call.name)}).to_string()
        }
    }

    fn ensure_correlation(correlation_id: &str) -> String {
        if correlation_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            correlation_id.to_string()
        }
    }
}

fn peer_of(call: &ToolInvocation) -> Option<&str> {
    call.name.strip_prefix("communicate_with_")
}

fn register_standard_metrics(metrics: &Metrics) {
    metrics.register("agent_up", "gauge", "Whether the agent is up (1) or down (0)");
    metrics.register("agent_uptime_seconds", "gauge", "Seconds since process start");
    metrics.register("peer_table_size", "gauge", "Entries in the routing table");
    metrics.register("outstanding_requests", "gauge", "Conversations with a turn in flight");
    metrics.register("messages_sent_total", "counter", "Messages sent to peers");
    metrics.register("messages_received_total", "counter", "Messages received from peers");
    metrics.register("model_calls_total", "counter", "Model provider calls");
    metrics.register("model_errors_total", "counter", "Model provider failures");
    metrics.register("tool_parse_failures_total", "counter", "Malformed tool invocations");
    metrics.register("model_latency_seconds", "histogram", "Model call latency");
    metrics.register("peer_latency_seconds", "histogram", "Peer call latency");
}

#[async_trait]
impl PeerHandler for AgentRuntime {
    async fn receive_message(
        &self,
        from: &str,
        message: &str,
        correlation_id: &str,
    ) -> Result<String, String> {
        let correlation_id = Self::ensure_correlation(correlation_id);
        self.events.emit(
            EventKind::PeerMessageReceived,
            Some(&correlation_id),
            Some(from),
            json!({"from": from, "message": message}),
        );
        self.metrics.inc_counter("messages_received_total", &[("peer", from)]);

        self.handle_message(Origin::Peer(from.to_string()), message, &correlation_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn chat_with_user(&self, message: &str, correlation_id: &str) -> Result<String, String> {
        let correlation_id = Self::ensure_correlation(correlation_id);
        self.handle_message(Origin::User, message, &correlation_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn status(&self) -> PeerStatus {
        PeerStatus {
            name: self.spec.name.clone(),
            peers: self.routing.peer_names(),
            uptime_s: self.uptime_s(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for exercising the loop without a network.

    use super::*;
    use parking_lot::Mutex;

    /// Provider that returns a fixed sequence of completions and records
    /// every request it sees.
    pub struct ScriptedProvider {
        native: bool,
        script: Mutex<std::collections::VecDeque<Result<Completion, plexus_llm::ProviderError>>>,
        pub requests: Mutex<Vec<(Vec<ChatMessage>, Vec<ToolSpec>)>>,
    }

    impl ScriptedProvider {
        pub fn new(
            native: bool,
            script: Vec<Result<Completion, plexus_llm::ProviderError>>,
        ) -> Self {
            Self {
                native,
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn text(content: &str) -> Result<Completion, plexus_llm::ProviderError> {
            Ok(Completion { content: content.into(), tool_calls: vec![] })
        }

        pub fn tool_call(tool: &str, message: &str) -> Result<Completion, plexus_llm::ProviderError> {
            Ok(Completion {
                content: String::new(),
                tool_calls: vec![ToolInvocation {
                    name: tool.into(),
                    arguments: json!({"message": message}),
                    id: None,
                }],
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        fn supports_native_tools(&self) -> bool {
            self.native
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolSpec],
        ) -> Result<Completion, plexus_llm::ProviderError> {
            self.requests.lock().push((messages.to_vec(), tools.to_vec()));
            self.script.lock().pop_front().unwrap_or_else(|| {
                Ok(Completion { content: "script exhausted".into(), tool_calls: vec![] })
            })
        }
    }

    /// Runtime with a scripted provider on an arbitrary spec.
    pub fn scripted_runtime(native: bool, script: Vec<Result<Completion, plexus_llm::ProviderError>>) -> (Arc<AgentRuntime>, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(native, script));
        let spec = AgentSpec::new("alice", 18001, "anthropic", "scripted-1", "a helpful assistant")
            .expect("valid spec");
        (Arc::new(AgentRuntime::new(spec, provider.clone())), provider)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{scripted_runtime, ScriptedProvider};
    use super::*;
    use plexus_peer::{serve, try_bind};

    struct CannedPeer;

    #[async_trait]
    impl PeerHandler for CannedPeer {
        async fn receive_message(
            &self,
            from: &str,
            _message: &str,
            _correlation_id: &str,
        ) -> Result<String, String> {
            assert_eq!(from, "alice");
            Ok("The capital of France is Paris.".to_string())
        }

        async fn chat_with_user(&self, _m: &str, _c: &str) -> Result<String, String> {
            Ok(String::new())
        }

        async fn status(&self) -> PeerStatus {
            PeerStatus { name: "bob".into(), peers: vec![], uptime_s: 0 }
        }
    }

    async fn spawn_bob() -> String {
        let listener = try_bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(CannedPeer)));
        format!("http://{addr}/mcp")
    }

    #[tokio::test]
    async fn test_plain_reply_without_tools() {
        let (runtime, provider) = scripted_runtime(true, vec![ScriptedProvider::text("hello!")]);

        let reply = runtime.handle_message(Origin::User, "hi", "c1").await.unwrap();
        assert_eq!(reply, "hello!");

        // System preamble present, then the user turn.
        let requests = provider.requests.lock();
        let (messages, tools) = &requests[0];
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hi");
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn test_two_agent_tool_hop() {
        let endpoint = spawn_bob().await;
        let (runtime, _provider) = scripted_runtime(
            true,
            vec![
                ScriptedProvider::tool_call("communicate_with_bob", "what is the capital of France?"),
                ScriptedProvider::text("Bob says the capital of France is Paris."),
            ],
        );
        runtime.connect_peer("bob", &endpoint).unwrap();

        let mut sub = runtime.events().subscribe(Some(1));
        let reply = runtime
            .handle_message(Origin::User, "Ask bob about France", "c1")
            .await
            .unwrap();
        assert!(reply.contains("Paris"));

        // Event order: turn_started .. tool_call_started(bob) ..
        // peer_message_sent .. tool_call_finished .. turn_finished.
        let mut kinds = Vec::new();
        while let Some(record) = sub.try_next() {
            kinds.push((record.kind, record.peer));
        }
        let started = kinds
            .iter()
            .position(|(k, p)| *k == EventKind::ToolCallStarted && p.as_deref() == Some("bob"))
            .expect("tool_call_started emitted");
        let finished = kinds
            .iter()
            .position(|(k, _)| *k == EventKind::ToolCallFinished)
            .expect("tool_call_finished emitted");
        assert!(started < finished);
        assert!(kinds.iter().any(|(k, _)| *k == EventKind::PeerMessageSent));
        assert!(kinds.iter().any(|(k, _)| *k == EventKind::TurnFinished));

        assert_eq!(
            runtime.metrics().counter_value("messages_sent_total", &[("peer", "bob")]),
            1.0
        );
    }

    #[tokio::test]
    async fn test_unknown_peer_becomes_tool_error_and_loop_recovers() {
        let (runtime, _provider) = scripted_runtime(
            true,
            vec![
                ScriptedProvider::tool_call("communicate_with_ghost", "anyone there?"),
                ScriptedProvider::text("I could not reach ghost."),
            ],
        );

        let reply = runtime.handle_message(Origin::User, "ping ghost", "c1").await.unwrap();
        assert_eq!(reply, "I could not reach ghost.");
    }

    #[tokio::test]
    async fn test_iteration_cap_emits_turn_capped() {
        let script = (0..10)
            .map(|_| ScriptedProvider::tool_call("communicate_with_ghost", "again"))
            .collect();
        let (runtime, provider) = scripted_runtime(true, script);

        let mut sub = runtime.events().subscribe(Some(1));
        let _reply = runtime.handle_message(Origin::User, "loop", "c1").await.unwrap();

        // Exactly the cap's worth of model calls.
        assert_eq!(provider.requests.lock().len(), 8);

        let mut capped = false;
        while let Some(record) = sub.try_next() {
            capped |= record.kind == EventKind::TurnCapped;
        }
        assert!(capped);
    }

    #[tokio::test]
    async fn test_model_failure_retries_then_surfaces() {
        let (runtime, provider) = scripted_runtime(
            true,
            vec![
                Err(plexus_llm::ProviderError::Connection("refused".into())),
                Err(plexus_llm::ProviderError::Connection("refused".into())),
                Err(plexus_llm::ProviderError::Connection("refused".into())),
            ],
        );

        let err = runtime.handle_message(Origin::User, "hi", "c1").await.unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
        assert_eq!(provider.requests.lock().len(), 3);
        assert_eq!(runtime.metrics().counter_value("model_errors_total", &[]), 3.0);

        // The conversation is idle again and accepts new input.
        let reply = runtime.handle_message(Origin::User, "hi again", "c1").await.unwrap();
        assert_eq!(reply, "script exhausted");
    }

    #[tokio::test]
    async fn test_non_native_provider_gets_primer() {
        let endpoint = spawn_bob().await;
        let (runtime, provider) = scripted_runtime(false, vec![ScriptedProvider::text("fine")]);
        runtime.connect_peer("bob", &endpoint).unwrap();

        let _ = runtime.handle_message(Origin::User, "hello", "c1").await.unwrap();

        let requests = provider.requests.lock();
        let (messages, _) = &requests[0];
        assert!(messages[0].content.contains("<tool_use>"));
        assert!(messages[0].content.contains("communicate_with_bob"));
    }

    /// Provider that hangs until the runtime abandons the call.
    struct StallingProvider;

    #[async_trait]
    impl ChatProvider for StallingProvider {
        fn provider(&self) -> &str {
            "stalling"
        }

        fn model(&self) -> &str {
            "stalling-1"
        }

        fn supports_native_tools(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<Completion, plexus_llm::ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Completion::default())
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_turn() {
        let spec = AgentSpec::new("alice", 18001, "anthropic", "stalling-1", "helper").unwrap();
        let runtime = Arc::new(AgentRuntime::new(spec, Arc::new(StallingProvider)));

        let turn = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.handle_message(Origin::User, "hi", "c1").await })
        };
        // Let the turn reach the stalled model call.
        tokio::time::sleep(Duration::from_millis(50)).await;

        runtime.begin_shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), turn)
            .await
            .expect("turn abandoned within the deadline")
            .unwrap();
        assert!(matches!(result, Err(AgentError::ShuttingDown)));

        // New input is refused outright and the runtime drains promptly.
        let err = runtime.handle_message(Origin::User, "again", "c2").await.unwrap_err();
        assert!(matches!(err, AgentError::ShuttingDown));
        tokio::time::timeout(Duration::from_secs(1), runtime.drain())
            .await
            .expect("no turns left in flight");
    }

    #[tokio::test]
    async fn test_shutdown_error_reaches_peer_callers() {
        let spec = AgentSpec::new("alice", 18002, "anthropic", "stalling-1", "helper").unwrap();
        let runtime = Arc::new(AgentRuntime::new(spec, Arc::new(StallingProvider)));
        runtime.begin_shutdown();

        let err = runtime.receive_message("bob", "hello", "c1").await.unwrap_err();
        assert!(err.contains("shutting down"));
    }

    #[tokio::test]
    async fn test_peer_surface_receives_and_replies() {
        let (runtime, _provider) =
            scripted_runtime(true, vec![ScriptedProvider::text("hello back")]);

        let mut sub = runtime.events().subscribe(Some(1));
        let reply = runtime.receive_message("bob", "hello alice", "c9").await.unwrap();
        assert_eq!(reply, "hello back");

        let record = sub.next().await.unwrap();
        assert_eq!(record.kind, EventKind::PeerMessageReceived);
        assert_eq!(record.payload["from"], "bob");
        assert_eq!(record.correlation_id.as_deref(), Some("c9"));
    }

    #[tokio::test]
    async fn test_status_reports_routing_table() {
        let (runtime, _provider) = scripted_runtime(true, vec![]);
        runtime.connect_peer("bob", "http://127.0.0.1:9/mcp").unwrap();

        let status = runtime.status().await;
        assert_eq!(status.name, "alice");
        assert_eq!(status.peers, vec!["bob".to_string()]);
    }
}
