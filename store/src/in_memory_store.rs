//! Pure in-memory `DurableStore`, for engine-crate unit tests that want no
//! filesystem or SQLite dependency at all.

use std::collections::HashMap;

use smithers_types::{AgentRun, AgentRunStatus, Compaction, Message, MessageId, RunId};

use crate::error::{StoreError, StoreResult};
use crate::traits::DurableStore;

#[derive(Default)]
pub struct InMemoryStore {
    messages: Vec<Message>,
    next_message_id: u64,
    runs: HashMap<u64, AgentRun>,
    compactions: Vec<Compaction>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for InMemoryStore {
    fn append_message(&mut self, mut message: Message) -> StoreResult<MessageId> {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        message.id = id;
        self.messages.push(message);
        Ok(id)
    }

    fn update_message_content(&mut self, id: MessageId, content: &str) -> StoreResult<()> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::CorruptRow(format!("update_message_content: no row for id {id}")))?;
        message.content = content.to_string();
        Ok(())
    }

    fn fetch_messages(&self) -> StoreResult<Vec<Message>> {
        Ok(self.messages.clone())
    }

    fn fetch_messages_from(&self, from: MessageId) -> StoreResult<Vec<Message>> {
        Ok(self.messages.iter().filter(|m| m.id > from).cloned().collect())
    }

    fn create_agent_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.runs.insert(run_id.value(), AgentRun::new(run_id));
        Ok(())
    }

    fn set_run_status(&mut self, run_id: RunId, status: AgentRunStatus) -> StoreResult<()> {
        self.run_mut(run_id)?.status = status;
        Ok(())
    }

    fn set_assistant_content(&mut self, run_id: RunId, content_json: serde_json::Value) -> StoreResult<()> {
        self.run_mut(run_id)?.assistant_content_json = Some(content_json);
        Ok(())
    }

    fn set_pending_tools(&mut self, run_id: RunId, tools_json: serde_json::Value) -> StoreResult<()> {
        self.run_mut(run_id)?.pending_tools_json = Some(tools_json);
        Ok(())
    }

    fn set_tool_results(&mut self, run_id: RunId, current_tool_idx: usize, results_json: serde_json::Value) -> StoreResult<()> {
        let run = self.run_mut(run_id)?;
        run.current_tool_idx = current_tool_idx;
        run.tool_results_json = Some(results_json);
        Ok(())
    }

    fn complete_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.set_run_status(run_id, AgentRunStatus::Complete)
    }

    fn fail_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.set_run_status(run_id, AgentRunStatus::Failed)
    }

    fn fetch_run(&self, run_id: RunId) -> StoreResult<Option<AgentRun>> {
        Ok(self.runs.get(&run_id.value()).cloned())
    }

    fn recover_non_terminal_runs(&self) -> StoreResult<Vec<AgentRun>> {
        let mut runs: Vec<AgentRun> = self.runs.values().filter(|run| !run.status.is_terminal()).cloned().collect();
        runs.sort_by_key(|run| run.run_id.value());
        Ok(runs)
    }

    fn latest_compaction(&self) -> StoreResult<Option<Compaction>> {
        Ok(self.compactions.last().cloned())
    }

    fn create_compaction(&mut self, compaction: Compaction) -> StoreResult<()> {
        self.compactions.push(compaction);
        Ok(())
    }
}

impl InMemoryStore {
    fn run_mut(&mut self, run_id: RunId) -> StoreResult<&mut AgentRun> {
        self.runs
            .get_mut(&run_id.value())
            .ok_or(StoreError::RunNotFound(run_id.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let mut store = InMemoryStore::new();
        let id = store
            .append_message(Message::new(
                MessageId::new(0),
                smithers_types::Role::User,
                "hi",
                std::time::SystemTime::now(),
            ))
            .expect("append");
        let messages = store.fetch_messages().expect("fetch");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
    }

    #[test]
    fn run_lifecycle_tracks_status() {
        let mut store = InMemoryStore::new();
        let run_id = RunId::new(1);
        store.create_agent_run(run_id).expect("create");
        store.set_run_status(run_id, AgentRunStatus::Tools).expect("set status");
        store.complete_run(run_id).expect("complete");

        let run = store.fetch_run(run_id).expect("fetch").expect("present");
        assert_eq!(run.status, AgentRunStatus::Complete);
        assert!(store.recover_non_terminal_runs().expect("recover").is_empty());
    }
}
