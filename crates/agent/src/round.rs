//! The bounded multi-round agent loop.
//!
//! One `AgentLoop::run` call owns one client request: it opens a streaming
//! completion per round, forwards text fragments as `delta` events, feeds
//! tool-call fragments to the accumulator, dispatches accumulated calls
//! sequentially in index order, appends the results to the transcript, and
//! re-enters — up to [`MAX_ROUNDS`] rounds.
//!
//! Per round the controller moves through AwaitingCompletion →
//! StreamingText / AccumulatingToolCalls → DispatchingTools →
//! AppendingResults and either loops or terminates. Termination always goes
//! through the emitter, whose Drop guard makes `done` unconditional.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use apotheca_core::message::{Conversation, Message, MessageToolCall};
use apotheca_core::stream::{CompletionRequest, Provider, StreamEvent, Termination};
use apotheca_core::tool::{ToolCall, ToolContext, ToolRegistry, ToolResult};

use crate::accumulator::{AccumulatedCall, FragmentAccumulator};
use crate::emitter::{ClientEvent, EventEmitter, ToolStatus};
use crate::policy::{build_system_prompt, Locale};

/// Hard bound on completion rounds per request. Reaching it is a terminal
/// error for the client, never an infinite loop.
pub const MAX_ROUNDS: u32 = 8;

/// Why the request-level loop ended (for logging and tests; the client sees
/// only the event protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTermination {
    /// The model produced a final answer with no further tool use.
    TextComplete,
    /// The round bound was hit while the model still wanted tools.
    RoundLimitReached,
    /// The provider failed; the failure was forwarded as an `error` event.
    UpstreamError,
    /// The client went away mid-stream; upstream consumption stopped.
    ClientDisconnected,
}

/// The per-request orchestrator.
///
/// Holds only process-wide collaborators behind `Arc`s — every `run` call is
/// independent, so one `AgentLoop` serves any number of concurrent requests.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_rounds: u32,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            max_rounds: MAX_ROUNDS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Lower the round bound (tests); never raises it above [`MAX_ROUNDS`].
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.min(MAX_ROUNDS);
        self
    }

    /// Run one request to completion, emitting client events on `tx`.
    ///
    /// The caller supplies the full prior transcript; nothing is retained
    /// here afterwards. `ctx` carries the out-of-band authenticated user.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        locale: Option<Locale>,
        ctx: ToolContext,
        tx: mpsc::Sender<ClientEvent>,
    ) -> LoopTermination {
        let mut emitter = EventEmitter::new(tx);
        let termination = self.drive(messages, locale, &ctx, &mut emitter).await;
        emitter.done().await;
        info!(?termination, "Request finished");
        termination
    }

    async fn drive(
        &self,
        messages: Vec<Message>,
        locale: Option<Locale>,
        ctx: &ToolContext,
        emitter: &mut EventEmitter,
    ) -> LoopTermination {
        let mut conversation = Conversation::new();
        conversation.push(Message::system(build_system_prompt(locale)));
        for message in messages {
            conversation.push(message);
        }

        let tool_definitions = self.tools.definitions();

        for round_number in 0..self.max_rounds {
            debug!(round_number, messages = conversation.len(), "Opening completion round");

            let request = CompletionRequest {
                model: self.model.clone(),
                messages: conversation.messages.clone(),
                tools: tool_definitions.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let mut stream = self.provider.open(request).await;
            let mut accumulator = FragmentAccumulator::new();
            let mut round_text = String::new();
            let mut termination = None;

            while let Some(event) = stream.recv().await {
                match event {
                    StreamEvent::TextFragment { text } => {
                        round_text.push_str(&text);
                        if !emitter.delta(text).await {
                            // Client hung up: stop consuming and release the
                            // upstream stream. In-flight state is discarded.
                            return LoopTermination::ClientDisconnected;
                        }
                    }
                    StreamEvent::ToolCallFragment(fragment) => {
                        accumulator.absorb(&fragment);
                    }
                    StreamEvent::RoundTerminated { reason } => {
                        termination = Some(reason);
                        break;
                    }
                    StreamEvent::UpstreamError { detail } => {
                        warn!(round_number, detail = %detail, "Upstream failure");
                        emitter.error(format!("Agent error: {detail}")).await;
                        return LoopTermination::UpstreamError;
                    }
                }
            }
            drop(stream);

            // No tool use requested (or none actually materialized): the
            // accumulated text is the final answer.
            let calls = accumulator.finish();
            if termination != Some(Termination::ToolCallsRequested) || calls.is_empty() {
                return LoopTermination::TextComplete;
            }

            debug!(round_number, tool_calls = calls.len(), "Dispatching tool calls");

            // The assistant message carrying the calls precedes its results,
            // as the chat tool protocol requires.
            conversation.push(Message::assistant_tool_calls(
                round_text,
                calls
                    .iter()
                    .map(|call| MessageToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: if call.raw_arguments.is_empty() {
                            "{}".into()
                        } else {
                            call.raw_arguments.clone()
                        },
                    })
                    .collect(),
            ));

            // Strictly sequential, in accumulation-index order: later calls
            // may depend on earlier ones (resolve-then-reserve).
            for call in &calls {
                if !emitter.tool_status(&call.name, ToolStatus::Running).await {
                    return LoopTermination::ClientDisconnected;
                }

                let result = self.dispatch(call, ctx).await;

                if !emitter.tool_status(&call.name, ToolStatus::Done).await {
                    return LoopTermination::ClientDisconnected;
                }
                conversation.push(Message::tool_result(
                    &result.tool_call_id,
                    result.payload_string(),
                ));
            }
        }

        warn!(max_rounds = self.max_rounds, "Round limit reached, forcing termination");
        emitter
            .error(format!(
                "Tool-call round limit ({}) reached without a final answer.",
                self.max_rounds
            ))
            .await;
        LoopTermination::RoundLimitReached
    }

    /// Resolve one accumulated call into a result. Arguments that never
    /// parsed dispatch as `invalid_arguments` without touching an executor.
    async fn dispatch(&self, call: &AccumulatedCall, ctx: &ToolContext) -> ToolResult {
        match &call.arguments {
            Some(arguments) => {
                let resolved = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: arguments.clone(),
                };
                self.tools.dispatch(&resolved, ctx).await
            }
            None => {
                warn!(tool = %call.name, raw = %call.raw_arguments, "Tool arguments never became valid JSON");
                ToolResult::error(
                    &call.id,
                    serde_json::json!({ "error": "invalid_arguments", "tool": call.name }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use apotheca_core::error::ToolError;
    use apotheca_core::message::Role;
    use apotheca_core::stream::{EventStream, ToolCallFragment};
    use apotheca_core::tool::Tool;

    fn text(t: &str) -> StreamEvent {
        StreamEvent::TextFragment { text: t.into() }
    }

    fn frag(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> StreamEvent {
        StreamEvent::ToolCallFragment(ToolCallFragment {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        })
    }

    fn terminated(reason: Termination) -> StreamEvent {
        StreamEvent::RoundTerminated { reason }
    }

    /// Plays back one scripted event sequence per round and records every
    /// request it receives.
    struct ScriptedProvider {
        rounds: Mutex<Vec<Vec<StreamEvent>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                rounds: Mutex::new(rounds),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, request: CompletionRequest) -> EventStream {
            self.requests.lock().unwrap().push(request);
            let script = {
                let mut rounds = self.rounds.lock().unwrap();
                if rounds.is_empty() {
                    vec![terminated(Termination::TextComplete)]
                } else {
                    rounds.remove(0)
                }
            };

            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            rx
        }
    }

    /// Counts invocations and returns a fixed payload.
    struct CountingTool {
        name: &'static str,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "found": true }))
        }
    }

    fn registry_with_counter(name: &'static str) -> (Arc<ToolRegistry>, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingTool {
            name,
            invocations: invocations.clone(),
        }));
        (Arc::new(registry), invocations)
    }

    async fn run_and_collect(
        provider: Arc<ScriptedProvider>,
        tools: Arc<ToolRegistry>,
    ) -> (Vec<ClientEvent>, LoopTermination) {
        let agent = AgentLoop::new(provider, "test-model", tools);
        let (tx, mut rx) = mpsc::channel(256);
        let termination = agent
            .run(
                vec![Message::user("hello")],
                None,
                ToolContext::anonymous(),
                tx,
            )
            .await;

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        (events, termination)
    }

    fn assert_done_last_and_once(events: &[ClientEvent]) {
        assert_eq!(events.last(), Some(&ClientEvent::Done), "done must be last: {events:?}");
        assert_eq!(
            events.iter().filter(|e| **e == ClientEvent::Done).count(),
            1,
            "done must be emitted exactly once: {events:?}"
        );
    }

    #[tokio::test]
    async fn text_only_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            text("Para"),
            text("cetamol is OTC."),
            terminated(Termination::TextComplete),
        ]]));
        let (tools, _) = registry_with_counter("unused");

        let (events, termination) = run_and_collect(provider, tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        assert_eq!(
            events,
            vec![
                ClientEvent::Delta { text: "Para".into() },
                ClientEvent::Delta { text: "cetamol is OTC.".into() },
                ClientEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                frag(0, Some("call_1"), Some("lookup"), Some(r#"{"query":"#)),
                frag(0, None, None, Some(r#""ibuprofen"}"#)),
                terminated(Termination::ToolCallsRequested),
            ],
            vec![text("Found it."), terminated(Termination::TextComplete)],
        ]));
        let (tools, invocations) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider.clone(), tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(
            events,
            vec![
                ClientEvent::ToolStatus { tool: "lookup".into(), status: ToolStatus::Running },
                ClientEvent::ToolStatus { tool: "lookup".into(), status: ToolStatus::Done },
                ClientEvent::Delta { text: "Found it.".into() },
                ClientEvent::Done,
            ]
        );

        // Round-trip: the second request must carry the assistant tool-call
        // message and the tool result, verbatim, referencing call_1.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        let assistant = second
            .iter()
            .find(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            .expect("assistant tool-call message present");
        assert_eq!(assistant.tool_calls[0].id, "call_1");
        assert_eq!(assistant.tool_calls[0].arguments, r#"{"query":"ibuprofen"}"#);

        let tool_msg = second
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result message present");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.content, r#"{"found":true}"#);
    }

    #[tokio::test]
    async fn sequential_dispatch_in_index_order() {
        // Two calls delivered with index 1 fragments arriving first.
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                frag(1, Some("call_b"), Some("lookup"), Some("{}")),
                frag(0, Some("call_a"), Some("lookup"), Some("{}")),
                terminated(Termination::ToolCallsRequested),
            ],
            vec![terminated(Termination::TextComplete)],
        ]));
        let (tools, invocations) = registry_with_counter("lookup");

        let (events, _) = run_and_collect(provider.clone(), tools).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_done_last_and_once(&events);

        let second = &provider.requests()[1].messages;
        let tool_ids: Vec<_> = second
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn round_limit_forces_error_and_done() {
        // Every round requests another tool call, forever.
        let endless: Vec<Vec<StreamEvent>> = (0..20)
            .map(|_| {
                vec![
                    frag(0, Some("call_again"), Some("lookup"), Some("{}")),
                    terminated(Termination::ToolCallsRequested),
                ]
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(endless));
        let (tools, invocations) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider.clone(), tools).await;
        assert_eq!(termination, LoopTermination::RoundLimitReached);
        assert_eq!(provider.requests().len(), MAX_ROUNDS as usize);
        assert_eq!(invocations.load(Ordering::SeqCst), MAX_ROUNDS as usize);

        assert_done_last_and_once(&events);
        let error = &events[events.len() - 2];
        match error {
            ClientEvent::Error { message } => assert!(message.contains("round limit"), "{message}"),
            other => panic!("expected error before done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparsable_arguments_skip_executor_and_continue() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                frag(0, Some("call_1"), Some("lookup"), Some(r#"{"medication_id": "#)),
                terminated(Termination::ToolCallsRequested),
            ],
            vec![text("Sorry, try again."), terminated(Termination::TextComplete)],
        ]));
        let (tools, invocations) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider.clone(), tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        // The executor is never invoked for invalid arguments
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_done_last_and_once(&events);

        // The loop continued: round 2 happened and saw the structured error
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("invalid_arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_yields_structured_error_and_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                frag(0, Some("call_1"), Some("summon_dragon"), Some("{}")),
                terminated(Termination::ToolCallsRequested),
            ],
            vec![terminated(Termination::TextComplete)],
        ]));
        let (tools, _) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider.clone(), tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        assert_done_last_and_once(&events);

        let tool_msg = provider.requests()[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .cloned()
            .unwrap();
        assert!(tool_msg.content.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn upstream_failure_mid_stream() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            text("The stock "),
            text("levels are"),
            StreamEvent::UpstreamError { detail: "connection reset".into() },
        ]]));
        let (tools, _) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider, tools).await;
        assert_eq!(termination, LoopTermination::UpstreamError);
        assert_eq!(
            events,
            vec![
                ClientEvent::Delta { text: "The stock ".into() },
                ClientEvent::Delta { text: "levels are".into() },
                ClientEvent::Error { message: "Agent error: connection reset".into() },
                ClientEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn tool_calls_requested_but_none_accumulated_terminates_normally() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            text("Done already."),
            terminated(Termination::ToolCallsRequested),
        ]]));
        let (tools, invocations) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider, tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_done_last_and_once(&events);
    }

    #[tokio::test]
    async fn stream_closing_without_terminator_still_reaches_done() {
        // Adapter contract violation: channel closes with no terminal event.
        let provider = Arc::new(ScriptedProvider::new(vec![vec![text("partial")]]));
        let (tools, _) = registry_with_counter("lookup");

        let (events, termination) = run_and_collect(provider, tools).await;
        assert_eq!(termination, LoopTermination::TextComplete);
        assert_done_last_and_once(&events);
    }

    #[tokio::test]
    async fn client_disconnect_stops_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            text("a"),
            text("b"),
            terminated(Termination::TextComplete),
        ]]));
        let (tools, _) = registry_with_counter("lookup");
        let agent = AgentLoop::new(provider, "test-model", tools);

        let (tx, rx) = mpsc::channel(1);
        drop(rx); // client is already gone
        let termination = agent
            .run(vec![Message::user("hi")], None, ToolContext::anonymous(), tx)
            .await;
        assert_eq!(termination, LoopTermination::ClientDisconnected);
    }

    #[tokio::test]
    async fn system_prompt_leads_every_request() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![terminated(
            Termination::TextComplete,
        )]]));
        let (tools, _) = registry_with_counter("lookup");
        let agent = AgentLoop::new(provider.clone(), "test-model", tools);

        let (tx, mut rx) = mpsc::channel(16);
        agent
            .run(
                vec![Message::user("מה שעות הפתיחה?")],
                Some(Locale::He),
                ToolContext::anonymous(),
                tx,
            )
            .await;
        while rx.recv().await.is_some() {}

        let first = &provider.requests()[0].messages[0];
        assert_eq!(first.role, Role::System);
        assert!(first.content.contains("Reply in Hebrew."));
    }
}
