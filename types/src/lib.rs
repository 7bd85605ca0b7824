//! Core domain types for the Smithers agent turn engine.
//!
//! No IO, no async - this crate is pure data and the invariants that make
//! it safe to pass across the engine/provider/store boundaries.

mod compaction;
mod event;
mod ids;
mod limits;
mod message;
mod model;
mod proofs;
mod run;
mod stream;
mod tool;

pub use compaction::{Compaction, FileOpsRecord};
pub use event::AgentEvent;
pub use ids::{CompactionId, MessageId, RunId};
pub use limits::OutputLimits;
pub use message::{Message, Role};
pub use model::{ModelName, Provider};
pub use proofs::{EmptyStringError, NonEmptyString};
pub use run::{AgentRun, AgentRunStatus};
pub use stream::{StreamEvent, StreamFinishReason};
pub use tool::{SKIPPED_DUE_TO_STEERING, ToolCall, ToolDefinition, ToolResult};
