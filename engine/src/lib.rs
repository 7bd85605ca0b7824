//! The Agent Turn Engine: the cooperative, tick-driven state machine that
//! owns one conversation's streaming rounds, tool execution, durable
//! recovery log, and context compaction.

pub mod compaction;
pub mod controller;
pub mod error;
pub mod event_emitter;
pub mod queues;
pub mod tool_worker;

pub use controller::TurnController;
pub use error::CompactionError;
pub use event_emitter::EventEmitter;
pub use queues::{DrainMode, MessageQueue};
pub use tool_worker::ToolWorker;
