//! The Durable Store interface.
//!
//! Every operation is synchronous: SQLite access is local and fast enough
//! to call directly from the cooperative tick loop without a
//! `spawn_blocking` hop (contrast the Tool Worker, C4, which does use one
//! for arbitrary user-supplied tool logic).

use smithers_types::{AgentRun, AgentRunStatus, Compaction, Message, MessageId, RunId};

use crate::error::StoreResult;

pub trait DurableStore: Send {
    /// Append a message and return its freshly assigned, monotonically
    /// increasing id.
    fn append_message(&mut self, message: Message) -> StoreResult<MessageId>;

    /// Overwrite a message's content in place - used while an assistant
    /// message is still streaming so interim text is durable without
    /// allocating a new id per delta.
    fn update_message_content(&mut self, id: MessageId, content: &str) -> StoreResult<()>;

    /// All messages in id order.
    fn fetch_messages(&self) -> StoreResult<Vec<Message>>;

    /// Messages with id strictly greater than `from`, in id order.
    fn fetch_messages_from(&self, from: MessageId) -> StoreResult<Vec<Message>>;

    fn create_agent_run(&mut self, run_id: RunId) -> StoreResult<()>;
    fn set_run_status(&mut self, run_id: RunId, status: AgentRunStatus) -> StoreResult<()>;
    fn set_assistant_content(&mut self, run_id: RunId, content_json: serde_json::Value) -> StoreResult<()>;
    fn set_pending_tools(&mut self, run_id: RunId, tools_json: serde_json::Value) -> StoreResult<()>;
    fn set_tool_results(&mut self, run_id: RunId, current_tool_idx: usize, results_json: serde_json::Value) -> StoreResult<()>;
    fn complete_run(&mut self, run_id: RunId) -> StoreResult<()>;
    fn fail_run(&mut self, run_id: RunId) -> StoreResult<()>;

    fn fetch_run(&self, run_id: RunId) -> StoreResult<Option<AgentRun>>;

    /// All rows whose status is not `is_terminal()`, used for the startup
    /// crash-recovery sweep.
    fn recover_non_terminal_runs(&self) -> StoreResult<Vec<AgentRun>>;

    /// The most recently created compaction, if any.
    fn latest_compaction(&self) -> StoreResult<Option<Compaction>>;

    fn create_compaction(&mut self, compaction: Compaction) -> StoreResult<()>;
}
