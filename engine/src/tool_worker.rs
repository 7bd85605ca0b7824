//! The Tool Worker: one-at-a-time background execution of a named
//! tool, the only place the engine leaves the single-threaded discipline.
//!
//! `start` spawns a dedicated `spawn_blocking` task; `poll` checks a
//! mutex-guarded single result slot without awaiting the task itself, so a
//! tick can always call `poll` without risk of blocking.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use smithers_types::{ToolCall, ToolResult};
use smithers_tools::{ToolError, ToolRegistry};

/// Owns at most one in-flight tool execution.
pub struct ToolWorker {
    registry: Arc<dyn ToolRegistry>,
    handle: Option<JoinHandle<()>>,
    slot: Arc<Mutex<Option<ToolResult>>>,
}

impl ToolWorker {
    #[must_use]
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            registry,
            handle: None,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// True if a worker is live or a result is pending pickup.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() || self.slot.lock().expect("tool worker slot poisoned").is_some()
    }

    /// Spawn execution of `call` on a dedicated blocking task.
    pub fn start(&mut self, call: ToolCall) -> Result<(), ToolError> {
        if self.is_running() {
            return Err(ToolError::AlreadyRunning);
        }

        let registry = Arc::clone(&self.registry);
        let slot = Arc::clone(&self.slot);
        self.handle = Some(tokio::task::spawn_blocking(move || {
            let result = execute(registry.as_ref(), &call);
            *slot.lock().expect("tool worker slot poisoned") = Some(result);
        }));
        Ok(())
    }

    /// Returns a finalized result exactly once; `None` while running.
    pub fn poll(&mut self) -> Option<ToolResult> {
        if let Some(handle) = &self.handle
            && handle.is_finished()
        {
            self.handle = None;
        }
        self.slot.lock().expect("tool worker slot poisoned").take()
    }

    /// Drop any live handle without waiting for it to finish, discarding a
    /// pending result (used on cancellation).
    pub fn abandon(&mut self) {
        self.handle = None;
        *self.slot.lock().expect("tool worker slot poisoned") = None;
    }
}

fn execute(registry: &dyn ToolRegistry, call: &ToolCall) -> ToolResult {
    match registry.lookup(&call.name) {
        Some(executor) => executor.execute(&call.id, call.input_json.clone()),
        None => ToolResult::failed(call.id.clone(), "unknown tool"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use smithers_tools::MapToolRegistry;

    use super::*;

    struct SlowEcho;

    impl smithers_tools::ToolExecutor for SlowEcho {
        fn name(&self) -> &'static str {
            "slow_echo"
        }
        fn description(&self) -> &'static str {
            "echoes after a short sleep"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({})
        }
        fn execute(&self, call_id: &str, input: serde_json::Value) -> ToolResult {
            std::thread::sleep(Duration::from_millis(20));
            ToolResult::ok(call_id, input.to_string())
        }
    }

    fn registry() -> Arc<dyn ToolRegistry> {
        let mut registry = MapToolRegistry::new();
        registry.register(Box::new(SlowEcho));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result_not_a_panic() {
        let mut worker = ToolWorker::new(registry());
        worker
            .start(ToolCall {
                id: "1".to_string(),
                name: "does_not_exist".to_string(),
                input_json: json!({}),
            })
            .expect("start");

        let result = loop {
            if let Some(result) = worker.poll() {
                break result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(!result.success);
        assert_eq!(result.content, "unknown tool");
    }

    #[tokio::test]
    async fn rejects_a_second_start_while_one_is_running() {
        let mut worker = ToolWorker::new(registry());
        worker
            .start(ToolCall {
                id: "1".to_string(),
                name: "slow_echo".to_string(),
                input_json: json!({"x": 1}),
            })
            .expect("start");

        let err = worker
            .start(ToolCall {
                id: "2".to_string(),
                name: "slow_echo".to_string(),
                input_json: json!({}),
            })
            .unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRunning));

        while worker.poll().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn poll_returns_the_result_exactly_once() {
        let mut worker = ToolWorker::new(registry());
        worker
            .start(ToolCall {
                id: "1".to_string(),
                name: "slow_echo".to_string(),
                input_json: json!({}),
            })
            .expect("start");

        let first = loop {
            if let Some(result) = worker.poll() {
                break result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(first.success);
        assert!(worker.poll().is_none());
        assert!(!worker.is_running());
    }
}
