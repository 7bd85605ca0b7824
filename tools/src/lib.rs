//! Tool dispatch contract: a synchronous [`registry::ToolExecutor`]
//! trait, a name-keyed [`registry::ToolRegistry`], and a handful of
//! illustrative built-in tools. The Tool Worker in `smithers-engine` wraps
//! every call in `spawn_blocking`, so executors here are free to block.

pub mod builtins;
pub mod error;
pub mod registry;
pub mod truncate;

pub use builtins::{EditFileTool, ReadFileTool, RunCommandTool, WriteFileTool};
pub use error::ToolError;
pub use registry::{MapToolRegistry, ToolExecutor, ToolRegistry};
