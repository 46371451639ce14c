//! Round controller.
//!
//! One call to [`Orchestrator::run_turn`] handles one user message: it asks
//! the model for a response, dispatches any tools the model requests, feeds
//! the results back, and repeats until the model answers without tools or the
//! round budget runs out.
//!
//! ```text
//! AwaitingUserInput -> StreamingResponse -> ExecutingTools -> StreamingResponse -> ...
//!                                        \-> TurnComplete -> AwaitingUserInput
//! ```

use crate::backend::{CompletionBackend, CompletionRequest};
use crate::config::{EmptyAssistantContent, OrchestratorConfig};
use crate::error::{LlmError, TurnError};
use crate::stream::{AggregatedResponse, ResponseStream};
use futures::StreamExt;
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tickertalk_conversation::{
    Message, SessionContext, SessionError, SessionState, ToolCall, ToolRegistry, TurnState,
};
use tickertalk_core::{ConversationSessionId, TurnId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Receives progress while a turn runs.
///
/// Every method has a no-op default, so an observer only implements what it
/// renders.
pub trait TurnObserver: Send {
    /// The turn moved to `state`.
    fn on_state(&mut self, _state: TurnState) {}

    /// A fragment of assistant text arrived.
    fn on_text(&mut self, _fragment: &str) {}

    /// A tool call is about to run.
    fn on_tool_call(&mut self, _call: &ToolCall) {}

    /// A tool call finished with `content`, which is what the model will see.
    fn on_tool_result(&mut self, _call: &ToolCall, _content: &str) {}

    /// Completion request number `round` of this turn is being sent.
    fn on_round(&mut self, _round: u32) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// Summary of a finished turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Identifies the turn in logs.
    pub turn_id: TurnId,
    /// Completion requests issued.
    pub rounds: u32,
    /// Messages appended to the history, the user message included.
    pub appended: usize,
    /// True if the turn stopped because the round budget ran out while the
    /// model still wanted tools.
    pub budget_exhausted: bool,
    /// Text of the last assistant response. May be empty.
    pub final_text: String,
}

/// Drives turns against a completion backend and a tool registry.
pub struct Orchestrator<B> {
    backend: B,
    tools: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl<B> std::fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: CompletionBackend> Orchestrator<B> {
    /// Creates an orchestrator.
    ///
    /// Every tool call is bounded by the configured tool timeout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(
        backend: B,
        tools: ToolRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self, Report<LlmError>> {
        config.validate()?;
        Ok(Self {
            backend,
            tools: Arc::new(tools.with_timeout(config.tool_timeout())),
            config,
        })
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the tool registry.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Starts a session using the configured model.
    #[must_use]
    pub fn new_session(&self) -> SessionContext {
        SessionContext::new(self.config.model.as_str())
    }

    /// Runs one user turn to completion.
    ///
    /// Tool failures do not fail the turn; they are written into the history
    /// as error results for the model to read. On failure the session goes
    /// back to waiting for input and keeps every message appended so far.
    ///
    /// # Errors
    ///
    /// - `SessionEnded` if the session has ended
    /// - `TurnInProgress` if the session is not waiting for input
    /// - `Completion` if the completion endpoint fails or times out
    /// - `Cancelled` if `cancel` fires
    #[instrument(
        skip(self, session, user_text, observer, cancel),
        fields(session_id = %session.id, turn_id = tracing::field::Empty)
    )]
    pub async fn run_turn<O: TurnObserver>(
        &self,
        session: &mut SessionContext,
        user_text: &str,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> tickertalk_core::Result<TurnOutcome, TurnError> {
        let session_id = session.id;
        if session.state() == SessionState::Ended {
            return Err(TurnError::SessionEnded { session_id }.into());
        }
        if session.turn_state() != TurnState::AwaitingUserInput {
            return Err(TurnError::TurnInProgress { session_id }.into());
        }

        let turn_id = TurnId::new();
        tracing::Span::current().record("turn_id", tracing::field::display(turn_id));

        let mark = session.history().len();
        match self.drive(session, turn_id, user_text, observer, cancel).await {
            Ok(mut outcome) => {
                outcome.appended = session.history().len() - mark;
                info!(
                    rounds = outcome.rounds,
                    appended = outcome.appended,
                    budget_exhausted = outcome.budget_exhausted,
                    "turn complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                session.reset_turn();
                observer.on_state(TurnState::AwaitingUserInput);
                Err(err)
            }
        }
    }

    async fn drive<O: TurnObserver>(
        &self,
        session: &mut SessionContext,
        turn_id: TurnId,
        user_text: &str,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Report<TurnError>> {
        append(session, Message::user(user_text))?;

        let mut rounds = 0;
        loop {
            enter(session, TurnState::StreamingResponse, observer)?;
            rounds += 1;
            observer.on_round(rounds);
            debug!(round = rounds, model = session.model(), "requesting completion");

            let response = self.complete(session, rounds, observer, cancel).await?;
            let calls = response.tool_calls.clone();
            let final_text = response.text.clone();
            if let Some(message) = self.assistant_message(response) {
                append(session, message)?;
            }

            if calls.is_empty() {
                finish(session, observer)?;
                return Ok(TurnOutcome {
                    turn_id,
                    rounds,
                    appended: 0,
                    budget_exhausted: false,
                    final_text,
                });
            }

            if rounds >= self.config.max_rounds {
                warn!(
                    round = rounds,
                    outstanding = calls.len(),
                    "round budget exhausted with tool calls outstanding"
                );
                let content = error_content(&format!(
                    "tool call budget exhausted after {rounds} rounds; the call was not run"
                ));
                for call in &calls {
                    append(session, Message::tool_result(&call.id, &call.name, &content))?;
                }
                finish(session, observer)?;
                return Ok(TurnOutcome {
                    turn_id,
                    rounds,
                    appended: 0,
                    budget_exhausted: true,
                    final_text,
                });
            }

            enter(session, TurnState::ExecutingTools, observer)?;
            self.execute(session, &calls, observer, cancel).await?;
        }
    }

    /// Sends one completion request and drains its stream.
    async fn complete<O: TurnObserver>(
        &self,
        session: &SessionContext,
        round: u32,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<AggregatedResponse, Report<TurnError>> {
        let session_id = session.id;
        let failed = |err: Report<LlmError>| err.context(TurnError::Completion { session_id, round });

        let request = CompletionRequest::new(session.model(), session.request_messages())
            .with_tools(self.tools.descriptors().cloned().collect())
            .with_temperature(self.config.temperature);

        let backend = &self.backend;
        let request = &request;
        let open_timeout = self.config.request_timeout();
        let open = self.config.retry.run("open_stream", move || async move {
            match tokio::time::timeout(open_timeout, backend.stream(request)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    after_ms: millis(open_timeout),
                }
                .into()),
            }
        });
        // Retries and their backoff sleeps are abandoned on cancellation too.
        let deltas = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(TurnError::Cancelled { session_id }.into());
            }
            opened = open => opened.map_err(failed)?,
        };

        let idle_timeout = self.config.stream_idle_timeout();
        let mut stream = ResponseStream::new(deltas);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(TurnError::Cancelled { session_id }.into());
                }
                next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            };
            match next {
                Ok(Some(Ok(fragment))) => observer.on_text(&fragment),
                Ok(Some(Err(err))) => return Err(failed(err)),
                Ok(None) => break,
                Err(_) => {
                    return Err(failed(Report::from(LlmError::Timeout {
                        after_ms: millis(idle_timeout),
                    })));
                }
            }
        }
        Ok(stream.finish())
    }

    /// Dispatches a round's tool calls one at a time, in arrival order.
    async fn execute<O: TurnObserver>(
        &self,
        session: &mut SessionContext,
        calls: &[ToolCall],
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<(), Report<TurnError>> {
        for (position, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                // Answer the remaining calls so the history stays usable.
                let content = error_content("turn cancelled before this call ran");
                for skipped in &calls[position..] {
                    append(session, Message::tool_result(&skipped.id, &skipped.name, &content))?;
                }
                return Err(TurnError::Cancelled {
                    session_id: session.id,
                }
                .into());
            }

            observer.on_tool_call(call);
            let content = match self.tools.dispatch_call(call).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(
                        tool = %call.name,
                        tool_call_id = %call.id,
                        error = %err,
                        "tool call failed"
                    );
                    error_content(&err.current_context().to_string())
                }
            };
            debug!(tool = %call.name, tool_call_id = %call.id, "tool call finished");
            observer.on_tool_result(call, &content);
            append(session, Message::tool_result(&call.id, &call.name, content))?;
        }
        Ok(())
    }

    /// Builds the assistant message for a response, per the empty-content policy.
    fn assistant_message(&self, response: AggregatedResponse) -> Option<Message> {
        let AggregatedResponse { text, tool_calls } = response;
        match self.config.empty_assistant_content {
            EmptyAssistantContent::Omit if text.is_empty() && tool_calls.is_empty() => None,
            EmptyAssistantContent::Omit if text.is_empty() => {
                Some(Message::assistant_tool_calls(tool_calls))
            }
            _ => {
                let mut message = Message::assistant(text);
                message.tool_calls = tool_calls;
                Some(message)
            }
        }
    }
}

fn append(session: &mut SessionContext, message: Message) -> Result<usize, Report<TurnError>> {
    let session_id = session.id;
    session
        .append(message)
        .map_err(|err| err.context(TurnError::History { session_id }))
}

fn enter<O: TurnObserver>(
    session: &mut SessionContext,
    next: TurnState,
    observer: &mut O,
) -> Result<(), Report<TurnError>> {
    let session_id = session.id;
    session
        .transition(next)
        .map_err(|err| {
            let context = turn_error_for(session_id, err.current_context());
            err.context(context)
        })?;
    observer.on_state(next);
    Ok(())
}

fn finish<O: TurnObserver>(
    session: &mut SessionContext,
    observer: &mut O,
) -> Result<(), Report<TurnError>> {
    enter(session, TurnState::TurnComplete, observer)?;
    enter(session, TurnState::AwaitingUserInput, observer)
}

fn turn_error_for(session_id: ConversationSessionId, err: &SessionError) -> TurnError {
    match err {
        SessionError::Ended { .. } => TurnError::SessionEnded { session_id },
        SessionError::InvalidStateTransition { .. } => TurnError::TurnInProgress { session_id },
    }
}

fn error_content(description: &str) -> String {
    serde_json::json!({ "error": description }).to_string()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeltaStream;
    use crate::retry::RetryPolicy;
    use crate::stream::{StreamDelta, ToolCallFragment};
    use async_trait::async_trait;
    use futures::stream;
    use serde::Deserialize;
    use serde_json::Value as JsonValue;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tickertalk_conversation::{
        JsonMap, MessageRole, ParameterSchema, ToolDescriptor, ToolError, ToolHandler, TypedTool,
    };
    use tickertalk_market::{
        EodPrice, EodQuery, GetEodHistoricalData, MarketDataProvider, ProviderError, SymbolRecord,
        register_market_tools,
    };

    enum Reply {
        Deltas(Vec<Result<StreamDelta, Report<LlmError>>>),
        Refuse(LlmError),
        Hang,
    }

    /// Backend that plays back scripted replies and records every request.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, Report<LlmError>> {
            self.requests.lock().expect("lock").push(request.clone());
            let reply = self.replies.lock().expect("lock").pop_front();
            match reply {
                Some(Reply::Deltas(deltas)) => Ok(stream::iter(deltas).boxed()),
                Some(Reply::Refuse(err)) => Err(err.into()),
                Some(Reply::Hang) => Ok(stream::pending().boxed()),
                None => Ok(stream::iter(vec![Ok(StreamDelta::text("No more replies."))]).boxed()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn text(reply: &str) -> Reply {
        Reply::Deltas(vec![Ok(StreamDelta::text(reply))])
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> Reply {
        Reply::Deltas(vec![
            Ok(ToolCallFragment::start(0, id, name).into()),
            Ok(ToolCallFragment::arguments(0, arguments).into()),
        ])
    }

    #[derive(Deserialize)]
    struct PriceArgs {
        symbol: String,
    }

    struct Prices;

    #[async_trait]
    impl TypedTool for Prices {
        type Args = PriceArgs;
        type Output = JsonValue;

        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("get_price", "Latest close for a symbol")
                .with_required_parameter("symbol", ParameterSchema::string())
        }

        async fn invoke(&self, args: PriceArgs) -> Result<JsonValue, Report<ToolError>> {
            Ok(serde_json::json!({ "symbol": args.symbol, "close": 67_012.5 }))
        }
    }

    /// Provider with one month of Bitcoin and no listed exchanges.
    struct Market;

    #[async_trait]
    impl MarketDataProvider for Market {
        async fn eod_prices(&self, query: &EodQuery) -> Result<Vec<EodPrice>, Report<ProviderError>> {
            Ok(vec![EodPrice {
                date: query.to,
                open: 42_280.0,
                high: 48_970.0,
                low: 38_550.0,
                close: 42_580.0,
                adjusted_close: 42_580.0,
                volume: 24_000_000,
            }])
        }

        async fn exchange_symbols(&self, exchange: &str) -> Result<Vec<SymbolRecord>, Report<ProviderError>> {
            Err(ProviderError::UnknownExchange {
                exchange: exchange.to_string(),
            }
            .into())
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        async fn call(&self, _args: JsonMap) -> Result<JsonValue, Report<ToolError>> {
            Err(ToolError::ExecutionFailed {
                name: "broken".to_string(),
                reason: "upstream returned 500".to_string(),
            }
            .into())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Prices).expect("register prices");
        register_market_tools(&mut registry, Arc::new(Market)).expect("register market tools");
        registry
            .register_handler(ToolDescriptor::new("broken", "Always fails"), Arc::new(Broken))
            .expect("register broken");
        registry
    }

    fn orchestrator(replies: Vec<Reply>) -> Orchestrator<ScriptedBackend> {
        orchestrator_with(replies, OrchestratorConfig::default())
    }

    fn orchestrator_with(replies: Vec<Reply>, config: OrchestratorConfig) -> Orchestrator<ScriptedBackend> {
        Orchestrator::new(ScriptedBackend::new(replies), registry(), config).expect("valid config")
    }

    async fn run(
        orchestrator: &Orchestrator<ScriptedBackend>,
        session: &mut SessionContext,
        user_text: &str,
    ) -> Result<TurnOutcome, Report<TurnError>> {
        orchestrator
            .run_turn(session, user_text, &mut NoopObserver, &CancellationToken::new())
            .await
    }

    #[derive(Default)]
    struct Recorder {
        states: Vec<TurnState>,
        text: String,
        calls: Vec<String>,
        results: Vec<String>,
        rounds: Vec<u32>,
    }

    impl TurnObserver for Recorder {
        fn on_state(&mut self, state: TurnState) {
            self.states.push(state);
        }

        fn on_text(&mut self, fragment: &str) {
            self.text.push_str(fragment);
        }

        fn on_tool_call(&mut self, call: &ToolCall) {
            self.calls.push(call.name.clone());
        }

        fn on_tool_result(&mut self, _call: &ToolCall, content: &str) {
            self.results.push(content.to_string());
        }

        fn on_round(&mut self, round: u32) {
            self.rounds.push(round);
        }
    }

    #[tokio::test]
    async fn bitcoin_turn_appends_four_messages_over_two_requests() {
        let orchestrator = orchestrator(vec![
            tool_call(
                "call_btc",
                GetEodHistoricalData::NAME,
                r#"{"symbol":"BTC-USD.CC","from_date":"2024-01-01","to_date":"2024-01-31"}"#,
            ),
            Reply::Deltas(vec![
                Ok(StreamDelta::text("Bitcoin closed January ")),
                Ok(StreamDelta::text("at $42,580.")),
            ]),
        ]);
        let mut session = orchestrator.new_session();
        let mut recorder = Recorder::default();

        let outcome = orchestrator
            .run_turn(
                &mut session,
                "What's Bitcoin worth between 2024-01-01 and 2024-01-31?",
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .expect("turn");

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.appended, 4);
        assert!(!outcome.budget_exhausted);
        assert_eq!(outcome.final_text, "Bitcoin closed January at $42,580.");

        let roles: Vec<_> = session.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::Assistant
            ]
        );
        let tool_message = &session.history().messages()[2];
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_btc"));
        let result: JsonValue =
            serde_json::from_str(tool_message.content.as_deref().expect("content")).expect("json");
        assert_eq!(result[0]["date"], "2024-01-31");
        assert_eq!(result[0]["close"], 42_580.0);

        let requests = orchestrator.backend().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[0].tools.len(), 4);
        assert!(
            requests[0]
                .tools
                .iter()
                .any(|tool| tool.name == GetEodHistoricalData::NAME)
        );
        assert_eq!(requests[0].temperature, 0.0);

        assert_eq!(recorder.text, "Bitcoin closed January at $42,580.");
        assert_eq!(recorder.calls, [GetEodHistoricalData::NAME]);
        assert_eq!(recorder.rounds, [1, 2]);
        assert_eq!(
            recorder.states,
            [
                TurnState::StreamingResponse,
                TurnState::ExecutingTools,
                TurnState::StreamingResponse,
                TurnState::TurnComplete,
                TurnState::AwaitingUserInput,
            ]
        );
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);
        assert_eq!(session.history().visible_messages().count(), 2);
    }

    #[tokio::test]
    async fn round_budget_caps_completion_requests() {
        let replies = (0..6)
            .map(|i| tool_call(&format!("call_{i}"), "get_price", r#"{"symbol":"AAPL.US"}"#))
            .collect();
        let orchestrator = orchestrator(replies);
        let mut session = orchestrator.new_session();

        let outcome = run(&orchestrator, &mut session, "Keep checking AAPL").await.expect("turn");

        assert_eq!(outcome.rounds, 5);
        assert!(outcome.budget_exhausted);
        assert_eq!(orchestrator.backend().requests().len(), 5);

        // user + 5 assistant + 5 tool results
        assert_eq!(outcome.appended, 11);
        let last = session.history().last().expect("last");
        assert_eq!(last.role, MessageRole::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_4"));
        assert!(last.content.as_deref().is_some_and(|c| c.contains("budget exhausted")));
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn round_counter_resets_each_turn() {
        let config = OrchestratorConfig {
            max_rounds: 2,
            ..OrchestratorConfig::default()
        };
        let orchestrator = orchestrator_with(
            vec![
                tool_call("call_a", "get_price", r#"{"symbol":"A"}"#),
                text("A is up."),
                tool_call("call_b", "get_price", r#"{"symbol":"B"}"#),
                text("B is down."),
            ],
            config,
        );
        let mut session = orchestrator.new_session();

        let first = run(&orchestrator, &mut session, "A?").await.expect("first");
        let second = run(&orchestrator, &mut session, "B?").await.expect("second");

        assert_eq!(first.rounds, 2);
        assert_eq!(second.rounds, 2);
        assert!(!second.budget_exhausted);
        assert_eq!(second.final_text, "B is down.");
        assert_eq!(session.history().len(), 8);
    }

    #[tokio::test]
    async fn failed_tool_does_not_stop_the_round() {
        let orchestrator = orchestrator(vec![
            Reply::Deltas(vec![
                Ok(ToolCallFragment::start(0, "call_1", "broken").into()),
                Ok(ToolCallFragment::start(1, "call_2", "get_price").into()),
                Ok(ToolCallFragment::arguments(1, r#"{"symbol":"MSFT.US"}"#).into()),
            ]),
            text("One lookup failed."),
        ]);
        let mut session = orchestrator.new_session();

        let outcome = run(&orchestrator, &mut session, "Check both").await.expect("turn");

        assert_eq!(outcome.appended, 5);
        let messages = session.history().messages();
        let failed: JsonValue =
            serde_json::from_str(messages[2].content.as_deref().expect("content")).expect("json");
        assert!(
            failed["error"]
                .as_str()
                .is_some_and(|e| e.contains("upstream returned 500"))
        );
        assert!(messages[3].content.as_deref().is_some_and(|c| c.contains("MSFT.US")));
    }

    #[tokio::test]
    async fn unknown_tool_result_is_a_diagnostic() {
        let orchestrator = orchestrator(vec![
            tool_call("call_1", "get_weather", "{}"),
            text("I cannot check the weather."),
        ]);
        let mut session = orchestrator.new_session();

        run(&orchestrator, &mut session, "Weather?").await.expect("turn");

        assert_eq!(
            session.history().messages()[2].content.as_deref(),
            Some("Tool 'get_weather' not found.")
        );
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_results() {
        let orchestrator = orchestrator(vec![
            tool_call("call_1", "get_price", r#"{"symbol": "#),
            text("Sorry."),
        ]);
        let mut session = orchestrator.new_session();

        run(&orchestrator, &mut session, "Price?").await.expect("turn");

        let content = session.history().messages()[2].content.clone().expect("content");
        let parsed: JsonValue = serde_json::from_str(&content).expect("json");
        assert!(parsed["error"].as_str().is_some_and(|e| e.contains("get_price")));
    }

    #[tokio::test]
    async fn completion_failure_keeps_history_and_resets_state() {
        let config = OrchestratorConfig {
            retry: RetryPolicy::none(),
            ..OrchestratorConfig::default()
        };
        let orchestrator = orchestrator_with(
            vec![
                tool_call("call_1", "get_price", r#"{"symbol":"AAPL.US"}"#),
                Reply::Refuse(LlmError::RequestFailed {
                    reason: "502 bad gateway".to_string(),
                }),
            ],
            config,
        );
        let mut session = orchestrator.new_session();

        let err = run(&orchestrator, &mut session, "AAPL?").await.expect_err("fails");

        assert_eq!(
            err.current_context(),
            &TurnError::Completion {
                session_id: session.id,
                round: 2,
            }
        );
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);

        let outcome = run(&orchestrator, &mut session, "Try again").await.expect("usable");
        assert_eq!(outcome.final_text, "No more replies.");
    }

    #[tokio::test]
    async fn mid_stream_failure_is_not_retried() {
        let orchestrator = orchestrator(vec![Reply::Deltas(vec![
            Ok(StreamDelta::text("Partial")),
            Err(LlmError::StreamFailed {
                reason: "connection reset".to_string(),
            }
            .into()),
        ])]);
        let mut session = orchestrator.new_session();

        let err = run(&orchestrator, &mut session, "Hi").await.expect_err("fails");

        assert!(matches!(err.current_context(), TurnError::Completion { round: 1, .. }));
        assert_eq!(orchestrator.backend().requests().len(), 1);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_request_is_retried() {
        let orchestrator = orchestrator(vec![
            Reply::Refuse(LlmError::RateLimited {
                retry_after_secs: Some(1),
            }),
            text("Hello."),
        ]);
        let mut session = orchestrator.new_session();

        let outcome = run(&orchestrator, &mut session, "Hi").await.expect("turn");

        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.final_text, "Hello.");
        assert_eq!(orchestrator.backend().requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let config = OrchestratorConfig {
            stream_idle_timeout_secs: 5,
            ..OrchestratorConfig::default()
        };
        let orchestrator = orchestrator_with(vec![Reply::Hang], config);
        let mut session = orchestrator.new_session();

        let err = run(&orchestrator, &mut session, "Hi").await.expect_err("times out");

        assert!(matches!(err.current_context(), TurnError::Completion { .. }));
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_turn_stops_streaming() {
        let orchestrator = orchestrator(vec![Reply::Hang]);
        let mut session = orchestrator.new_session();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };
        let err = orchestrator
            .run_turn(&mut session, "Hi", &mut NoopObserver, &cancel)
            .await
            .expect_err("cancelled");
        canceller.await.expect("canceller");

        assert_eq!(orchestrator.backend().requests().len(), 1);

        assert!(matches!(err.current_context(), TurnError::Cancelled { .. }));
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_retry_backoff_is_reported() {
        let refusals = (0..3)
            .map(|_| {
                Reply::Refuse(LlmError::RateLimited {
                    retry_after_secs: Some(8),
                })
            })
            .collect();
        let orchestrator = orchestrator(refusals);
        let mut session = orchestrator.new_session();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };
        let err = orchestrator
            .run_turn(&mut session, "Hi", &mut NoopObserver, &cancel)
            .await
            .expect_err("cancelled");
        canceller.await.expect("canceller");

        assert!(matches!(err.current_context(), TurnError::Cancelled { .. }));
        assert_eq!(orchestrator.backend().requests().len(), 1);
        assert_eq!(session.turn_state(), TurnState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn pre_cancelled_turn_never_opens_a_stream() {
        let orchestrator = orchestrator(vec![Reply::Refuse(LlmError::RateLimited {
            retry_after_secs: Some(8),
        })]);
        let mut session = orchestrator.new_session();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run_turn(&mut session, "Hi", &mut NoopObserver, &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(err.current_context(), TurnError::Cancelled { .. }));
        assert!(orchestrator.backend().requests().is_empty());
    }

    #[tokio::test]
    async fn cancellation_between_tool_calls_answers_the_rest() {
        struct CancelOnFirstCall(CancellationToken);

        impl TurnObserver for CancelOnFirstCall {
            fn on_tool_result(&mut self, _call: &ToolCall, _content: &str) {
                self.0.cancel();
            }
        }

        let orchestrator = orchestrator(vec![Reply::Deltas(vec![
            Ok(ToolCallFragment::start(0, "call_1", "get_price").into()),
            Ok(ToolCallFragment::arguments(0, r#"{"symbol":"A"}"#).into()),
            Ok(ToolCallFragment::start(1, "call_2", "get_price").into()),
            Ok(ToolCallFragment::arguments(1, r#"{"symbol":"B"}"#).into()),
        ])]);
        let mut session = orchestrator.new_session();
        let cancel = CancellationToken::new();
        let mut observer = CancelOnFirstCall(cancel.clone());

        let err = orchestrator
            .run_turn(&mut session, "A and B?", &mut observer, &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(err.current_context(), TurnError::Cancelled { .. }));
        let messages = session.history().messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[3].content.as_deref().is_some_and(|c| c.contains("cancelled")));
    }

    #[tokio::test]
    async fn omit_policy_drops_empty_content() {
        let config = OrchestratorConfig {
            empty_assistant_content: EmptyAssistantContent::Omit,
            ..OrchestratorConfig::default()
        };
        let orchestrator = orchestrator_with(
            vec![
                tool_call("call_1", "get_price", r#"{"symbol":"A"}"#),
                Reply::Deltas(vec![]),
            ],
            config,
        );
        let mut session = orchestrator.new_session();

        let outcome = run(&orchestrator, &mut session, "A?").await.expect("turn");

        assert_eq!(outcome.appended, 3);
        assert_eq!(session.history().messages()[1].content, None);
        assert!(session.history().messages()[1].has_tool_calls());
    }

    #[tokio::test]
    async fn keep_policy_stores_empty_content() {
        let orchestrator = orchestrator(vec![
            tool_call("call_1", "get_price", r#"{"symbol":"A"}"#),
            Reply::Deltas(vec![]),
        ]);
        let mut session = orchestrator.new_session();

        let outcome = run(&orchestrator, &mut session, "A?").await.expect("turn");

        assert_eq!(outcome.appended, 4);
        assert_eq!(session.history().messages()[1].content.as_deref(), Some(""));
        assert_eq!(session.history().visible_messages().count(), 1);
    }

    #[tokio::test]
    async fn ended_session_is_rejected() {
        let orchestrator = orchestrator(vec![text("unused")]);
        let mut session = orchestrator.new_session();
        session.end();

        let err = run(&orchestrator, &mut session, "Hi").await.expect_err("ended");

        assert_eq!(
            err.current_context(),
            &TurnError::SessionEnded {
                session_id: session.id
            }
        );
        assert!(orchestrator.backend().requests().is_empty());
    }

    #[tokio::test]
    async fn busy_session_is_rejected() {
        let orchestrator = orchestrator(vec![text("unused")]);
        let mut session = orchestrator.new_session();
        session
            .transition(TurnState::StreamingResponse)
            .expect("transition");

        let err = run(&orchestrator, &mut session, "Hi").await.expect_err("busy");

        assert!(matches!(err.current_context(), TurnError::TurnInProgress { .. }));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn system_prompt_leads_each_request() {
        let orchestrator = orchestrator(vec![text("Hi.")]);
        let mut session = orchestrator
            .new_session()
            .with_system_prompt("Always use tools for prices.");

        run(&orchestrator, &mut session, "Hello").await.expect("turn");

        let requests = orchestrator.backend().requests();
        assert_eq!(requests[0].messages[0].role, MessageRole::System);
        assert_eq!(requests[0].model, "llama3-70b-8192");
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = OrchestratorConfig {
            max_rounds: 0,
            ..OrchestratorConfig::default()
        };
        let err = Orchestrator::new(ScriptedBackend::default(), ToolRegistry::new(), config)
            .expect_err("invalid");
        assert!(matches!(err.current_context(), LlmError::InvalidConfig { .. }));
    }
}
