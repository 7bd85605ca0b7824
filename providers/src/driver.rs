//! The uniform `start / poll / text / tool_calls / cleanup` driver surface
//! shared by every vendor.
//!
//! Each driver spawns a `tokio` task that drives the `reqwest` streaming
//! body and forwards parsed [`StreamEvent`]s over an unbounded channel.
//! `poll` drains that channel with `try_recv`, which is non-blocking in
//! exactly the sense the state machine requires - a tick never awaits
//! inside `poll`.

use thiserror::Error;
use tokio::sync::mpsc;

use smithers_types::{Provider, StreamEvent, StreamFinishReason, ToolCall};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to start provider stream: {0}")]
    StartFailed(String),
}

/// Outcome of one non-blocking `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done,
    Err(String),
}

/// Transient, per-round streaming state.
///
/// Exclusively owned by the Turn Controller; `cleanup` aborts the
/// background task and is idempotent.
pub struct StreamingState {
    provider: Provider,
    receiver: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    task: Option<tokio::task::JoinHandle<()>>,
    text: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<StreamFinishReason>,
    terminal: bool,
}

impl StreamingState {
    #[must_use]
    pub fn new(
        provider: Provider,
        receiver: mpsc::UnboundedReceiver<StreamEvent>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            provider,
            receiver: Some(receiver),
            task: Some(task),
            text: String::new(),
            tool_calls: Vec::new(),
            stop_reason: None,
            terminal: false,
        }
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StreamFinishReason> {
        self.stop_reason
    }

    /// Non-blocking: drains whatever has arrived on the channel without
    /// awaiting.
    pub fn poll(&mut self) -> PollOutcome {
        if self.terminal {
            return PollOutcome::Done;
        }

        let Some(receiver) = self.receiver.as_mut() else {
            return PollOutcome::Done;
        };

        loop {
            match receiver.try_recv() {
                Ok(StreamEvent::TextDelta(delta)) => {
                    self.text.push_str(&delta);
                }
                Ok(StreamEvent::ThinkingDelta(_)) => {
                    // Thinking content is accumulated by the driver task but
                    // not surfaced as assistant text.
                }
                Ok(StreamEvent::ToolCallFinalized(call)) => {
                    self.tool_calls.push(call);
                }
                Ok(StreamEvent::Done(reason)) => {
                    self.stop_reason = Some(reason);
                    self.terminal = true;
                    return PollOutcome::Done;
                }
                Ok(StreamEvent::ProtocolError(message)) => {
                    // Protocol errors are absorbed: log and
                    // keep polling rather than aborting the turn.
                    tracing::warn!(%message, "dropping malformed stream fragment");
                }
                Err(mpsc::error::TryRecvError::Empty) => return PollOutcome::Pending,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.terminal = true;
                    return if self.stop_reason.is_some() {
                        PollOutcome::Done
                    } else {
                        PollOutcome::Err("provider stream ended without a terminator".to_string())
                    };
                }
            }
        }
    }

    /// Cumulative assistant text; never shrinks.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finalized, ordered, append-only tool calls.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Abort the background task and drop buffers. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.receiver = None;
    }
}

impl Drop for StreamingState {
    fn drop(&mut self) {
        self.cleanup();
    }
}
