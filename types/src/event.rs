//! Structured lifecycle events consumed by the renderer.

use serde_json::Value;

use crate::ids::MessageId;
use crate::tool::ToolResult;

/// The exhaustive event-variant set emitted by the Turn Controller.
///
/// Drivers never emit events directly - only the controller does, after applying a driver's output to
/// its own state.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    TurnStart { turn_no: u32 },
    MessageStart { message_id: MessageId },
    MessageUpdate {
        message_id: MessageId,
        delta_text: String,
        cumulative_text: String,
    },
    MessageEnd { message_id: MessageId, final_text: String },
    ToolStart { call_id: String, name: String, input_json: Value },
    ToolEnd { call_id: String, name: String, result: ToolResult, is_error: bool },
    TurnEnd { has_tool_calls: bool },
    AgentEnd,
    AgentError { message: String },
}
