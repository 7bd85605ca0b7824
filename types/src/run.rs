//! The durable `AgentRun` recovery row.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunId;

/// Non-terminal/terminal status of an `AgentRun`.
///
/// Transitions only along `Streaming -> Tools -> Continuing ->
/// {Streaming | Complete | Failed}`. `Streaming` is reused
/// for the first round and for every `Continuing -> Streaming` re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Streaming,
    Tools,
    Continuing,
    Complete,
    Failed,
}

impl AgentRunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentRunStatus::Complete | AgentRunStatus::Failed)
    }
}

/// One row per turn, used for crash recovery and state-machine inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub run_id: RunId,
    pub status: AgentRunStatus,
    /// The array of `{text | tool_use}` blocks most recently sent to the
    /// provider, as JSON, so a restart can reconstruct the continuation.
    pub assistant_content_json: Option<Value>,
    /// Ordered pending tool calls for this run, as JSON.
    pub pending_tools_json: Option<Value>,
    pub current_tool_idx: usize,
    /// Ordered tool results accumulated so far, as JSON.
    pub tool_results_json: Option<Value>,
}

impl AgentRun {
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: AgentRunStatus::Streaming,
            assistant_content_json: None,
            pending_tools_json: None,
            current_tool_idx: 0,
            tool_results_json: None,
        }
    }
}
