//! Events surfaced by a provider driver while a round is in flight.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// One incremental event read off the wire by a `ProviderDriver`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// Provider "thinking"/reasoning content; accumulated but not surfaced
    /// to the renderer as assistant text.
    ThinkingDelta(String),
    ToolCallFinalized(ToolCall),
    Done(StreamFinishReason),
    /// A protocol error mid-stream: the turn is not aborted,
    /// the fragment is logged and skipped by the caller.
    ProtocolError(String),
}

/// The vendor-neutral stop reason every driver maps its terminator to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFinishReason {
    Stop,
    ToolUse,
    Length,
    Error,
}
