//! Tool-dispatch error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("a tool is already running")]
    AlreadyRunning,
    #[error("unknown tool")]
    UnknownTool,
    #[error("bad input: {0}")]
    BadArgs(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}
