//! The tool-dispatch contract: a named, JSON-in/JSON-out executor
//! looked up by name, injectable for test substitution.

use std::collections::HashMap;

use serde_json::Value;
use smithers_types::{ToolDefinition, ToolResult};

/// One tool's blocking execution. Invoked from inside a
/// `tokio::task::spawn_blocking`, so implementations may use ordinary
/// blocking I/O.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn execute(&self, call_id: &str, input: Value) -> ToolResult;
}

/// Looks up executors by name; unknown names are the caller's
/// responsibility to handle.
pub trait ToolRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<&dyn ToolExecutor>;
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// A `HashMap`-backed registry sufficient for the built-in tools and for
/// test substitution.
#[derive(Default)]
pub struct MapToolRegistry {
    executors: HashMap<&'static str, Box<dyn ToolExecutor>>,
}

impl MapToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) {
        self.executors.insert(executor.name(), executor);
    }
}

impl ToolRegistry for MapToolRegistry {
    fn lookup(&self, name: &str) -> Option<&dyn ToolExecutor> {
        self.executors.get(name).map(std::convert::AsRef::as_ref)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.executors
            .values()
            .map(|executor| ToolDefinition {
                name: executor.name().to_string(),
                description: executor.description().to_string(),
                input_schema: executor.input_schema(),
            })
            .collect()
    }
}
