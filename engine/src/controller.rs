//! The Turn Controller: the single-threaded state machine that
//! drives one turn from a user submit through an arbitrary number of
//! tool-use rounds to a terminal response.
//!
//! `Streaming` and `Continuing` share one Rust variant (`Active`) since
//! they poll through the identical driver path; the distinction only matters for the persisted
//! `AgentRunStatus`, tracked via the `is_continuation` flag and flipped
//! the moment the continuation round produces its first byte.
//! `Terminating` is not a state at all here - it is the synchronous
//! cascade a `Streaming`/`Continuing` round runs through on its way back
//! to `Idle` or into a follow-up-triggered new run, all within one tick.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use smithers_core::{CompactionSettings, ModelLimits, ModelRegistry};
use smithers_providers::{ApiConfig, Continuation, DriverError, PollOutcome, StreamingState};
use smithers_store::DurableStore;
use smithers_tools::ToolRegistry;
use smithers_types::{
    AgentEvent, AgentRunStatus, Message, MessageId, ModelName, OutputLimits, Role, StreamFinishReason, ToolCall, ToolResult,
    SKIPPED_DUE_TO_STEERING,
};

use crate::compaction;
use crate::event_emitter::EventEmitter;
use crate::queues::{DrainMode, MessageQueue};
use crate::tool_worker::ToolWorker;

/// Window in which a submit and an immediate cancel race resolve to no
/// HTTP request at all.
const SUBMIT_LATCH: Duration = Duration::from_millis(50);

/// Data a continuation round needs, gathered from a just-finished tool
/// batch. Translated into the wire-facing [`Continuation`] at the point
/// `start_round` builds the request.
struct PendingContinuation {
    assistant_text: String,
    assistant_tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolResult>,
    steering_texts: Vec<String>,
    /// Id of the assistant placeholder for the round being continued.
    /// History at or after this id is re-supplied via this struct's own
    /// fields instead, so `assemble_prompt` must exclude it.
    boundary_msg_id: MessageId,
}

enum ControllerState {
    Idle,
    /// Covers both `Streaming` and `Continuing`.
    Active {
        streaming: StreamingState,
        placeholder_id: MessageId,
        is_continuation: bool,
    },
    ToolExecuting {
        placeholder_id: MessageId,
        assistant_text: String,
        assistant_tool_calls: Vec<ToolCall>,
        pending_tools: Vec<ToolCall>,
        current_tool_idx: usize,
        tool_results: Vec<ToolResult>,
    },
}

/// Drives one conversation's turns over a durable store `S`. Not `Clone`;
/// exactly one instance owns the store and the child tasks it spawns.
pub struct TurnController<S: DurableStore> {
    store: S,
    registry: Arc<dyn ToolRegistry>,
    tool_worker: ToolWorker,
    events: EventEmitter,
    steering: MessageQueue,
    follow_up: MessageQueue,

    model: ModelName,
    env_lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
    model_registry: ModelRegistry,
    compaction_settings: CompactionSettings,
    system_prompt: Option<String>,
    output_limits: OutputLimits,

    state: ControllerState,
    run_id: smithers_types::RunId,
    next_run_id: smithers_types::RunId,
    turn_no: u32,
    /// The most recently resolved provider config, reused by the
    /// compaction engine's own summarization round.
    api_config: Option<ApiConfig>,
    active_compaction: Option<smithers_types::Compaction>,
    compaction_task: Option<JoinHandle<smithers_types::Compaction>>,
    pending_submit: Option<(Instant, String)>,
    cancel_requested: bool,
}

impl<S: DurableStore> TurnController<S> {
    #[must_use]
    pub fn new(
        store: S,
        registry: Arc<dyn ToolRegistry>,
        model: ModelName,
        env_lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
        compaction_settings: CompactionSettings,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            store,
            tool_worker: ToolWorker::new(Arc::clone(&registry)),
            registry,
            events: EventEmitter::default(),
            steering: MessageQueue::new(DrainMode::All),
            follow_up: MessageQueue::new(DrainMode::OneAtATime),
            model,
            env_lookup,
            model_registry: ModelRegistry::new(),
            compaction_settings,
            system_prompt,
            output_limits: OutputLimits::default(),
            state: ControllerState::Idle,
            run_id: smithers_types::RunId::new(0),
            next_run_id: smithers_types::RunId::new(0),
            turn_no: 0,
            api_config: None,
            active_compaction: None,
            compaction_task: None,
            pending_submit: None,
            cancel_requested: false,
        }
    }

    /// Fails any run a prior crash left non-terminal and seeds the
    /// in-process run-id counter past the highest one observed. Call once before the first `tick`.
    pub fn recover_on_startup(&mut self) -> Result<(), smithers_store::StoreError> {
        let stuck = self.store.recover_non_terminal_runs()?;
        let mut next = self.next_run_id;
        for run in stuck {
            if let Err(err) = self.store.fail_run(run.run_id) {
                tracing::error!(%err, "failed to fail a run orphaned by a prior crash");
            }
            let candidate = run.run_id.next();
            if candidate.value() > next.value() {
                next = candidate;
            }
        }
        self.next_run_id = next;
        Ok(())
    }

    /// Drains events queued for the renderer since the last call.
    pub fn drain_events(&mut self) -> Vec<AgentEvent> {
        self.events.drain()
    }

    /// Submit routes to the 50 ms latch when idle with nothing already
    /// latched; otherwise it is indistinguishable from steering a live
    /// turn.
    pub fn submit(&mut self, text: String) {
        if matches!(self.state, ControllerState::Idle) && self.pending_submit.is_none() {
            self.pending_submit = Some((Instant::now(), text));
        } else {
            self.steer(text);
        }
    }

    pub fn steer(&mut self, text: String) {
        self.steering.push(text);
    }

    pub fn follow_up(&mut self, text: String) {
        self.follow_up.push(text);
    }

    /// Cooperative: the flag is read at the top of the next `tick`, not
    /// acted on immediately.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Advance the state machine by one non-blocking step. Never awaits.
    pub fn tick(&mut self, now: Instant) {
        if std::mem::take(&mut self.cancel_requested) {
            self.perform_cancel();
            self.poll_compaction_task();
            return;
        }

        match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Idle => self.maybe_begin_latched_submit(now),
            ControllerState::Active {
                streaming,
                placeholder_id,
                is_continuation,
            } => self.poll_active(streaming, placeholder_id, is_continuation),
            ControllerState::ToolExecuting {
                placeholder_id,
                assistant_text,
                assistant_tool_calls,
                pending_tools,
                current_tool_idx,
                tool_results,
            } => self.poll_tool_executing(placeholder_id, assistant_text, assistant_tool_calls, pending_tools, current_tool_idx, tool_results),
        }

        self.poll_compaction_task();
    }

    fn maybe_begin_latched_submit(&mut self, now: Instant) {
        let Some((submitted_at, _)) = &self.pending_submit else { return };
        if now.duration_since(*submitted_at) < SUBMIT_LATCH {
            return;
        }
        let (_, text) = self.pending_submit.take().expect("checked Some above");
        self.begin_turn(text);
    }

    fn open_new_run(&mut self, text: String) {
        let message = Message::new(MessageId::new(0), Role::User, text, SystemTime::now());
        if let Err(err) = self.store.append_message(message) {
            tracing::error!(%err, "failed to persist user message");
        }
        self.run_id = self.next_run_id;
        self.next_run_id = self.next_run_id.next();
        if let Err(err) = self.store.create_agent_run(self.run_id) {
            tracing::error!(%err, "failed to persist agent run");
        }
    }

    fn begin_turn(&mut self, text: String) {
        self.open_new_run(text);
        self.turn_no = 0;
        self.events.emit(AgentEvent::AgentStart);
        self.attempt_start_round(None);
    }

    /// A follow-up opens a new `AgentRun` but does not bracket it with a
    /// fresh `AgentStart`/`AgentEnd` pair - per the transition table the
    /// controller "stays active" across the hand-off.
    fn begin_follow_up_turn(&mut self, text: String) {
        self.open_new_run(text);
        self.attempt_start_round(None);
    }

    fn attempt_start_round(&mut self, continuation: Option<PendingContinuation>) {
        match ApiConfig::resolve(self.model.clone(), |key| (self.env_lookup)(key)) {
            Ok(api_config) => self.start_round(api_config, continuation),
            Err(err) => self.fail_run_before_streaming(err.to_string()),
        }
    }

    /// A missing API key produces a user-visible system message and a
    /// failed `AgentRun` before `Streaming` is ever entered.
    fn fail_run_before_streaming(&mut self, reason: String) {
        let message = Message::new(MessageId::new(0), Role::System, format!("Error: {reason}"), SystemTime::now());
        if let Err(err) = self.store.append_message(message) {
            tracing::error!(%err, "failed to persist system error message");
        }
        if let Err(err) = self.store.fail_run(self.run_id) {
            tracing::error!(%err, "failed to persist failed run");
        }
        self.events.emit(AgentEvent::AgentError { message: reason });
        self.events.emit(AgentEvent::AgentEnd);
        self.state = ControllerState::Idle;
    }

    fn start_round(&mut self, api_config: ApiConfig, continuation: Option<PendingContinuation>) {
        self.turn_no += 1;

        // Assembled before the new placeholder is persisted and, on a
        // continuation, excludes everything from the round being continued
        // onward - that span is re-supplied via `continuation` instead, so
        // including it here would duplicate it (and an unfinalized
        // placeholder would surface as a trailing empty content block).
        let exclude_from = continuation.as_ref().map(|pending| pending.boundary_msg_id);
        let prompt_messages = self.assemble_prompt(exclude_from);

        let placeholder = Message::new(MessageId::new(0), Role::Assistant, String::new(), SystemTime::now());
        let placeholder_id = match self.store.append_message(placeholder) {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "failed to persist placeholder assistant message");
                MessageId::new(0)
            }
        };
        self.events.emit(AgentEvent::TurnStart { turn_no: self.turn_no });
        self.events.emit(AgentEvent::MessageStart { message_id: placeholder_id });

        let tool_defs = self.registry.definitions();
        let is_continuation = continuation.is_some();
        let wire_continuation = continuation.as_ref().map(|pending| Continuation {
            assistant_text: &pending.assistant_text,
            assistant_tool_calls: &pending.assistant_tool_calls,
            tool_results: &pending.tool_results,
            steering_texts: &pending.steering_texts,
        });

        let started = smithers_providers::start_round(
            &api_config,
            &prompt_messages,
            self.output_limits,
            self.system_prompt.as_deref(),
            Some(&tool_defs),
            wire_continuation.as_ref(),
        );

        match started {
            Ok(streaming) => {
                let status = if is_continuation { AgentRunStatus::Continuing } else { AgentRunStatus::Streaming };
                if let Err(err) = self.store.set_run_status(self.run_id, status) {
                    tracing::error!(%err, "failed to persist run status");
                }
                self.api_config = Some(api_config);
                self.state = ControllerState::Active {
                    streaming,
                    placeholder_id,
                    is_continuation,
                };
            }
            Err(DriverError::StartFailed(message)) => self.fail_turn(placeholder_id, message),
        }
    }

    /// For each outbound request: compaction-filtered/compaction-prefixed
    /// history, system and ephemeral rows dropped. `exclude_from`, when
    /// set, additionally drops every message at or after that id - used on
    /// a continuation round to keep the round being continued (and
    /// whatever steering arrived during its tool batch) out of history,
    /// since that span is re-supplied via the wire continuation instead.
    fn assemble_prompt(&self, exclude_from: Option<MessageId>) -> Vec<Message> {
        let fetched = match &self.active_compaction {
            Some(compaction) => {
                let from = MessageId::new(compaction.first_kept_msg_id.value().saturating_sub(1));
                self.store.fetch_messages_from(from)
            }
            None => self.store.fetch_messages(),
        };
        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(err) => {
                tracing::error!(%err, "failed to fetch messages for prompt assembly");
                Vec::new()
            }
        };
        messages.retain(|message| !message.ephemeral && message.role != Role::System);
        if let Some(boundary) = exclude_from {
            messages.retain(|message| message.id < boundary);
        }

        if let Some(compaction) = &self.active_compaction {
            let synthetic = Message::new(MessageId::new(0), Role::User, compaction.summary.clone(), SystemTime::now());
            messages.insert(0, synthetic);
        }
        messages
    }

    fn poll_active(&mut self, mut streaming: StreamingState, placeholder_id: MessageId, mut is_continuation: bool) {
        let text_before_len = streaming.text().len();
        let outcome = streaming.poll();

        if streaming.text().len() > text_before_len {
            if is_continuation {
                if let Err(err) = self.store.set_run_status(self.run_id, AgentRunStatus::Streaming) {
                    tracing::warn!(%err, "failed to persist implicit continuing-to-streaming transition");
                }
                is_continuation = false;
            }
            let cumulative = streaming.text().to_string();
            let delta = cumulative[text_before_len..].to_string();
            if let Err(err) = self.store.update_message_content(placeholder_id, &cumulative) {
                tracing::warn!(%err, "failed to persist streamed content");
            }
            self.events.emit(AgentEvent::MessageUpdate {
                message_id: placeholder_id,
                delta_text: delta,
                cumulative_text: cumulative,
            });
        }

        match outcome {
            PollOutcome::Pending => {
                self.state = ControllerState::Active {
                    streaming,
                    placeholder_id,
                    is_continuation,
                };
            }
            PollOutcome::Err(message) => {
                streaming.cleanup();
                self.fail_turn(placeholder_id, message);
            }
            PollOutcome::Done => {
                let stop_reason = streaming.stop_reason();
                let tool_calls = streaming.tool_calls().to_vec();
                let mut final_text = streaming.text().to_string();
                streaming.cleanup();

                match stop_reason {
                    Some(StreamFinishReason::ToolUse) => self.begin_tool_execution(placeholder_id, final_text, tool_calls),
                    Some(StreamFinishReason::Error) => self.fail_turn(placeholder_id, "provider reported an error".to_string()),
                    // Stop and Length both end the turn in place; a
                    // length-truncated reply is still a final answer for
                    // this controller's purposes.
                    Some(StreamFinishReason::Stop | StreamFinishReason::Length) | None => {
                        if final_text.is_empty() && tool_calls.is_empty() {
                            // Empty text with no tool_use is replaced with a
                            // fixed placeholder rather than an empty message.
                            final_text = "no response".to_string();
                        }
                        self.finish_turn(placeholder_id, final_text);
                    }
                }
            }
        }
    }

    fn fail_turn(&mut self, placeholder_id: MessageId, reason: String) {
        if let Err(err) = self.store.update_message_content(placeholder_id, &format!("Error: {reason}")) {
            tracing::warn!(%err, "failed to persist error content");
        }
        if let Err(err) = self.store.fail_run(self.run_id) {
            tracing::error!(%err, "failed to persist failed run");
        }
        self.events.emit(AgentEvent::AgentError { message: reason });
        self.events.emit(AgentEvent::AgentEnd);
        self.state = ControllerState::Idle;
    }

    fn begin_tool_execution(&mut self, placeholder_id: MessageId, final_text: String, tool_calls: Vec<ToolCall>) {
        if let Err(err) = self.store.update_message_content(placeholder_id, &final_text) {
            tracing::warn!(%err, "failed to persist final assistant text");
        }
        self.events.emit(AgentEvent::MessageEnd {
            message_id: placeholder_id,
            final_text: final_text.clone(),
        });
        self.events.emit(AgentEvent::TurnEnd { has_tool_calls: true });

        if let Err(err) = self.store.set_assistant_content(self.run_id, assistant_content_blocks(&final_text, &tool_calls)) {
            tracing::warn!(%err, "failed to persist assistant content");
        }
        if let Err(err) = self.store.set_run_status(self.run_id, AgentRunStatus::Tools) {
            tracing::warn!(%err, "failed to persist run status");
        }
        let pending_tools_json = serde_json::to_value(&tool_calls).unwrap_or(Value::Null);
        if let Err(err) = self.store.set_pending_tools(self.run_id, pending_tools_json) {
            tracing::warn!(%err, "failed to persist pending tools");
        }

        self.state = ControllerState::ToolExecuting {
            placeholder_id,
            assistant_text: final_text,
            assistant_tool_calls: tool_calls.clone(),
            pending_tools: tool_calls,
            current_tool_idx: 0,
            tool_results: Vec::new(),
        };
        self.dispatch_next_tool();
    }

    fn dispatch_next_tool(&mut self) {
        let call = match &self.state {
            ControllerState::ToolExecuting {
                pending_tools, current_tool_idx, ..
            } => pending_tools.get(*current_tool_idx).cloned(),
            _ => None,
        };
        let Some(call) = call else { return };

        self.events.emit(AgentEvent::ToolStart {
            call_id: call.id.clone(),
            name: call.name.clone(),
            input_json: call.input_json.clone(),
        });
        if let Err(err) = self.tool_worker.start(call) {
            tracing::error!(%err, "failed to start the tool worker");
        }
    }

    fn poll_tool_executing(
        &mut self,
        placeholder_id: MessageId,
        assistant_text: String,
        assistant_tool_calls: Vec<ToolCall>,
        pending_tools: Vec<ToolCall>,
        mut current_tool_idx: usize,
        mut tool_results: Vec<ToolResult>,
    ) {
        let Some(result) = self.tool_worker.poll() else {
            self.state = ControllerState::ToolExecuting {
                placeholder_id,
                assistant_text,
                assistant_tool_calls,
                pending_tools,
                current_tool_idx,
                tool_results,
            };
            return;
        };

        let call = pending_tools[current_tool_idx].clone();
        self.events.emit(AgentEvent::ToolEnd {
            call_id: call.id.clone(),
            name: call.name.clone(),
            result: result.clone(),
            is_error: !result.success,
        });
        tool_results.push(result);
        current_tool_idx += 1;
        self.persist_tool_results(current_tool_idx, &tool_results);

        // Steering skips the remaining tools in this batch rather than
        // waiting them out.
        if !self.steering.is_empty() && current_tool_idx < pending_tools.len() {
            for skipped in &pending_tools[current_tool_idx..] {
                let skipped_result = ToolResult::failed(skipped.id.clone(), SKIPPED_DUE_TO_STEERING);
                self.events.emit(AgentEvent::ToolEnd {
                    call_id: skipped.id.clone(),
                    name: skipped.name.clone(),
                    result: skipped_result.clone(),
                    is_error: true,
                });
                tool_results.push(skipped_result);
            }
            current_tool_idx = pending_tools.len();
            self.persist_tool_results(current_tool_idx, &tool_results);
        }

        if current_tool_idx < pending_tools.len() {
            self.state = ControllerState::ToolExecuting {
                placeholder_id,
                assistant_text,
                assistant_tool_calls,
                pending_tools,
                current_tool_idx,
                tool_results,
            };
            self.dispatch_next_tool();
            return;
        }

        self.begin_continuation(placeholder_id, assistant_text, assistant_tool_calls, tool_results);
    }

    fn persist_tool_results(&mut self, current_tool_idx: usize, tool_results: &[ToolResult]) {
        let results_json = serde_json::to_value(tool_results).unwrap_or(Value::Null);
        if let Err(err) = self.store.set_tool_results(self.run_id, current_tool_idx, results_json) {
            tracing::warn!(%err, "failed to persist tool results");
        }
    }

    fn begin_continuation(
        &mut self,
        placeholder_id: MessageId,
        assistant_text: String,
        assistant_tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolResult>,
    ) {
        let steering_texts = self.steering.drain();
        for text in &steering_texts {
            let message = Message::new(MessageId::new(0), Role::User, text.clone(), SystemTime::now());
            if let Err(err) = self.store.append_message(message) {
                tracing::warn!(%err, "failed to persist steering message");
            }
        }

        let api_config = self.api_config.clone().expect("a round has already started on this run");
        self.state = ControllerState::Idle;
        self.start_round(
            api_config,
            Some(PendingContinuation {
                assistant_text,
                assistant_tool_calls,
                tool_results,
                steering_texts,
                boundary_msg_id: placeholder_id,
            }),
        );
    }

    fn finish_turn(&mut self, placeholder_id: MessageId, final_text: String) {
        if let Err(err) = self.store.update_message_content(placeholder_id, &final_text) {
            tracing::warn!(%err, "failed to persist final assistant text");
        }
        self.events.emit(AgentEvent::MessageEnd {
            message_id: placeholder_id,
            final_text: final_text.clone(),
        });
        self.events.emit(AgentEvent::TurnEnd { has_tool_calls: false });

        if let Err(err) = self.store.complete_run(self.run_id) {
            tracing::warn!(%err, "failed to persist completed run");
        }

        self.maybe_start_compaction();

        if !self.follow_up.is_empty() {
            let text = self.follow_up.drain().into_iter().next().unwrap_or_default();
            self.state = ControllerState::Idle;
            self.begin_follow_up_turn(text);
            return;
        }

        self.events.emit(AgentEvent::AgentEnd);
        self.state = ControllerState::Idle;
    }

    fn perform_cancel(&mut self) {
        let was_active = !matches!(self.state, ControllerState::Idle);
        match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Idle => {
                // Races an unexpired latch: drop the pending submit with
                // no HTTP request ever issued.
                self.pending_submit = None;
            }
            ControllerState::Active { mut streaming, .. } => streaming.cleanup(),
            ControllerState::ToolExecuting { .. } => self.tool_worker.abandon(),
        }
        self.steering.clear();
        self.follow_up.clear();

        if was_active {
            let message = Message::new(MessageId::new(0), Role::System, "Interrupted.", SystemTime::now());
            if let Err(err) = self.store.append_message(message) {
                tracing::error!(%err, "failed to persist interrupted message");
            }
            if let Err(err) = self.store.fail_run(self.run_id) {
                tracing::error!(%err, "failed to persist failed run on cancel");
            }
            self.events.emit(AgentEvent::AgentError {
                message: "Interrupted.".to_string(),
            });
            self.events.emit(AgentEvent::AgentEnd);
        }
    }

    fn maybe_start_compaction(&mut self) {
        if self.compaction_task.is_some() {
            return;
        }
        let limits: ModelLimits = self.model_registry.get(&self.model);
        match compaction::prepare(&self.store, &limits, &self.compaction_settings) {
            Ok(Some(request)) => {
                let Some(api_config) = self.api_config.clone() else {
                    return;
                };
                self.compaction_task = Some(tokio::spawn(async move { compaction::summarize(&api_config, request).await }));
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "failed to prepare a compaction attempt"),
        }
    }

    /// Polled every tick regardless of controller state, since the call
    /// runs on its own background task rather than inside `tick`.
    fn poll_compaction_task(&mut self) {
        let is_finished = matches!(&self.compaction_task, Some(handle) if handle.is_finished());
        if !is_finished {
            return;
        }
        let handle = self.compaction_task.take().expect("checked Some above");
        match handle.now_or_never() {
            Some(Ok(compaction)) => {
                if let Err(err) = self.store.create_compaction(compaction.clone()) {
                    tracing::error!(%err, "failed to persist compaction row");
                }
                self.active_compaction = Some(compaction);
            }
            Some(Err(err)) => tracing::error!(%err, "compaction task panicked"),
            None => {}
        }
    }
}

fn assistant_content_blocks(text: &str, tool_calls: &[ToolCall]) -> Value {
    let mut blocks = Vec::new();
    if !text.is_empty() {
        blocks.push(json!({ "type": "text", "text": text }));
    }
    for call in tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input_json,
        }));
    }
    Value::Array(blocks)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use smithers_store::InMemoryStore;
    use smithers_tools::{MapToolRegistry, ToolExecutor};
    use smithers_types::{AgentRunStatus, Compaction, ModelName, Provider};

    use super::*;

    struct Echo;

    impl ToolExecutor for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes its input back"
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        fn execute(&self, call_id: &str, input: Value) -> ToolResult {
            ToolResult::ok(call_id, input.to_string())
        }
    }

    fn registry() -> Arc<dyn ToolRegistry> {
        let mut registry = MapToolRegistry::new();
        registry.register(Box::new(Echo));
        Arc::new(registry)
    }

    fn controller() -> TurnController<InMemoryStore> {
        TurnController::new(
            InMemoryStore::new(),
            registry(),
            ModelName::default_model(),
            Arc::new(|_: &str| Some("test-key".to_string())),
            CompactionSettings::default(),
            None,
        )
    }

    /// Lets a just-finished tool batch continue into a new round without
    /// driving `ApiConfig::resolve` through env lookups again.
    fn dummy_api_config() -> ApiConfig {
        ApiConfig::resolve(ModelName::new(Provider::Claude, "claude-sonnet-4-20250514"), |_| Some("test-key".to_string()))
            .expect("resolve with a stub key always succeeds")
    }

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            input_json: json!({ "id": id }),
        }
    }

    async fn wait_for_tools_to_settle(controller: &mut TurnController<InMemoryStore>, rounds: usize) {
        for _ in 0..rounds {
            controller.tick(Instant::now());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn assemble_prompt_drops_system_and_ephemeral_rows() {
        let mut controller = controller();
        controller
            .store
            .append_message(Message::new(MessageId::new(0), Role::User, "hello", SystemTime::now()))
            .expect("append");
        controller
            .store
            .append_message(Message::new(MessageId::new(0), Role::System, "hidden", SystemTime::now()))
            .expect("append");
        let mut ephemeral = Message::new(MessageId::new(0), Role::Assistant, "scratch", SystemTime::now());
        ephemeral.ephemeral = true;
        controller.store.append_message(ephemeral).expect("append");

        let assembled = controller.assemble_prompt(None);
        assert_eq!(assembled.len(), 1);
        assert_eq!(assembled[0].content, "hello");
    }

    #[test]
    fn assemble_prompt_excludes_the_round_being_continued() {
        let mut controller = controller();
        let user_id = controller
            .store
            .append_message(Message::new(MessageId::new(0), Role::User, "first", SystemTime::now()))
            .expect("append");
        let placeholder_id = controller
            .store
            .append_message(Message::new(MessageId::new(0), Role::Assistant, "let me check", SystemTime::now()))
            .expect("append");
        controller
            .store
            .append_message(Message::new(MessageId::new(0), Role::User, "steered mid-batch".to_string(), SystemTime::now()))
            .expect("append");

        let assembled = controller.assemble_prompt(Some(placeholder_id));
        assert_eq!(assembled.len(), 1);
        assert_eq!(assembled[0].id, user_id);
    }

    #[test]
    fn assemble_prompt_prefixes_the_active_compaction_summary() {
        let mut controller = controller();
        for i in 0..3 {
            controller
                .store
                .append_message(Message::new(MessageId::new(0), Role::User, format!("msg {i}"), SystemTime::now()))
                .expect("append");
        }
        controller.active_compaction = Some(Compaction {
            summary: "earlier work summarized".to_string(),
            first_kept_msg_id: MessageId::new(3),
            tokens_before: 5000,
            file_ops: None,
        });

        let assembled = controller.assemble_prompt(None);
        assert_eq!(assembled[0].role, Role::User);
        assert_eq!(assembled[0].content, "earlier work summarized");
        assert!(assembled.len() >= 2);
    }

    #[test]
    fn cancel_while_idle_drops_a_latched_submit_without_starting_a_run() {
        let mut controller = controller();
        controller.submit("hello".to_string());
        assert!(controller.pending_submit.is_some());

        controller.cancel();
        controller.tick(Instant::now());

        assert!(controller.pending_submit.is_none());
        assert!(matches!(controller.state, ControllerState::Idle));
        let events = controller.drain_events();
        assert!(events.is_empty(), "a cancel racing an unexpired latch produces no AgentRun activity");
    }

    #[tokio::test]
    async fn a_single_tool_batch_pairs_every_start_with_an_end() {
        let mut controller = controller();
        controller.run_id = smithers_types::RunId::new(1);
        controller.api_config = Some(dummy_api_config());

        controller.begin_tool_execution(MessageId::new(1), "let me check".to_string(), vec![tool_call("a")]);
        wait_for_tools_to_settle(&mut controller, 20).await;

        let events = controller.drain_events();
        let starts = events.iter().filter(|e| matches!(e, AgentEvent::ToolStart { .. })).count();
        let ends = events.iter().filter(|e| matches!(e, AgentEvent::ToolEnd { .. })).count();
        assert_eq!(starts, 1);
        assert_eq!(ends, 1);
        assert!(matches!(events.iter().find(|e| matches!(e, AgentEvent::ToolEnd { .. })), Some(AgentEvent::ToolEnd { is_error: false, .. })));

        let run = controller
            .store
            .fetch_run(smithers_types::RunId::new(1))
            .expect("fetch")
            .expect("run exists");
        assert!(matches!(run.status, AgentRunStatus::Streaming | AgentRunStatus::Continuing));
    }

    #[tokio::test]
    async fn steering_skips_the_remaining_tools_in_the_batch() {
        let mut controller = controller();
        controller.run_id = smithers_types::RunId::new(1);
        controller.api_config = Some(dummy_api_config());

        controller.begin_tool_execution(
            MessageId::new(1),
            "running three tools".to_string(),
            vec![tool_call("a"), tool_call("b"), tool_call("c")],
        );

        // Let the first tool finish, then steer before the rest complete.
        loop {
            controller.tick(Instant::now());
            if !controller.steering.is_empty() {
                break;
            }
            let events = controller.drain_events();
            if events.iter().any(|e| matches!(e, AgentEvent::ToolEnd { .. })) {
                controller.steer("wait, do something else".to_string());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        wait_for_tools_to_settle(&mut controller, 20).await;
        let events = controller.drain_events();
        let skipped = events.iter().filter(|e| matches!(e, AgentEvent::ToolEnd { result, .. } if result.content == SKIPPED_DUE_TO_STEERING));
        assert!(skipped.count() >= 1, "tools queued after the steering message must be marked skipped, not executed");
    }

    #[tokio::test]
    async fn cancel_during_tool_execution_abandons_the_worker_and_marks_the_run_interrupted() {
        let mut controller = controller();
        controller.run_id = smithers_types::RunId::new(1);
        controller.api_config = Some(dummy_api_config());
        controller.begin_tool_execution(MessageId::new(1), "checking".to_string(), vec![tool_call("a")]);

        controller.cancel();
        controller.tick(Instant::now());

        assert!(matches!(controller.state, ControllerState::Idle));
        let events = controller.drain_events();
        assert!(events.iter().any(|e| matches!(e, AgentEvent::AgentError { .. })));
        assert!(matches!(events.last(), Some(AgentEvent::AgentEnd)));

        let run = controller
            .store
            .fetch_run(smithers_types::RunId::new(1))
            .expect("fetch")
            .expect("run exists");
        assert!(matches!(run.status, AgentRunStatus::Failed));

        let messages = controller.store.fetch_messages().expect("fetch");
        assert!(messages.iter().any(|m| m.role == Role::System && m.content == "Interrupted."));
    }
}
