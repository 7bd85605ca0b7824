//! SQLite-backed `DurableStore`.
//!
//! Schema evolves by additive `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`
//! only - no destructive migrations, matching the append-only spirit of
//! the store itself.

use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use smithers_types::{AgentRun, AgentRunStatus, Compaction, FileOpsRecord, Message, MessageId, Role, RunId};

use crate::error::{StoreError, StoreResult};
use crate::sqlite_util::{iso8601_to_system_time, open_secure_db, system_time_to_iso8601};

const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_name TEXT,
        tool_input TEXT,
        ephemeral INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agent_runs (
        run_id INTEGER PRIMARY KEY,
        status TEXT NOT NULL,
        assistant_content_json TEXT,
        pending_tools_json TEXT,
        current_tool_idx INTEGER NOT NULL DEFAULT 0,
        tool_results_json TEXT
    );

    CREATE TABLE IF NOT EXISTS compactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        summary TEXT NOT NULL,
        first_kept_msg_id INTEGER NOT NULL,
        tokens_before INTEGER NOT NULL,
        file_ops_json TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agent_runs_status ON agent_runs(status);
    ",
];

pub struct SqliteStore {
    conn: rusqlite::Connection,
    next_message_id: u64,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let conn = open_secure_db(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> StoreResult<Self> {
        for (step, migration) in MIGRATIONS.iter().enumerate() {
            conn.execute_batch(migration)?;
            tracing::debug!(step, "applied store migration");
        }
        let next_message_id: i64 = conn.query_row("SELECT COALESCE(MAX(id), -1) + 1 FROM messages", [], |row| row.get(0))?;
        Ok(Self {
            conn,
            next_message_id: next_message_id as u64,
        })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let id: i64 = row.get("id")?;
        let role: String = row.get("role")?;
        let content: String = row.get("content")?;
        let tool_name: Option<String> = row.get("tool_name")?;
        let tool_input: Option<String> = row.get("tool_input")?;
        let ephemeral: i64 = row.get("ephemeral")?;
        let created_at: String = row.get("created_at")?;

        let role = match role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        };
        let created_at = iso8601_to_system_time(&created_at).unwrap_or(std::time::UNIX_EPOCH);

        let mut message = Message::new(MessageId::new(id as u64), role, content, created_at);
        if let (Some(name), Some(input)) = (tool_name, tool_input) {
            let input_json: Value = serde_json::from_str(&input).unwrap_or(Value::Null);
            message = message.with_tool_hint(name, input_json);
        }
        if ephemeral != 0 {
            message = message.ephemeral();
        }
        Ok(message)
    }
}

impl crate::traits::DurableStore for SqliteStore {
    fn append_message(&mut self, message: Message) -> StoreResult<MessageId> {
        let id = MessageId::new(self.next_message_id);
        let tool_input = message.tool_input.as_ref().map(std::string::ToString::to_string);
        self.conn.execute(
            "INSERT INTO messages (id, role, content, tool_name, tool_input, ephemeral, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.value() as i64,
                message.role.as_str(),
                message.content,
                message.tool_name,
                tool_input,
                i64::from(message.ephemeral),
                system_time_to_iso8601(message.created_at),
            ],
        )?;
        self.next_message_id += 1;
        Ok(id)
    }

    fn update_message_content(&mut self, id: MessageId, content: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE messages SET content = ?1 WHERE id = ?2",
            params![content, id.value() as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::CorruptRow(format!("update_message_content: no row for id {id}")));
        }
        Ok(())
    }

    fn fetch_messages(&self) -> StoreResult<Vec<Message>> {
        let mut stmt = self.conn.prepare("SELECT * FROM messages ORDER BY id ASC")?;
        let rows = stmt.query_map([], Self::row_to_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn fetch_messages_from(&self, from: MessageId) -> StoreResult<Vec<Message>> {
        let mut stmt = self.conn.prepare("SELECT * FROM messages WHERE id > ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![from.value() as i64], Self::row_to_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn create_agent_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO agent_runs (run_id, status, current_tool_idx) VALUES (?1, ?2, 0)",
            params![run_id.value() as i64, status_str(AgentRunStatus::Streaming)],
        )?;
        Ok(())
    }

    fn set_run_status(&mut self, run_id: RunId, status: AgentRunStatus) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE agent_runs SET status = ?1 WHERE run_id = ?2",
            params![status_str(status), run_id.value() as i64],
        )?;
        Ok(())
    }

    fn set_assistant_content(&mut self, run_id: RunId, content_json: Value) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE agent_runs SET assistant_content_json = ?1 WHERE run_id = ?2",
            params![content_json.to_string(), run_id.value() as i64],
        )?;
        Ok(())
    }

    fn set_pending_tools(&mut self, run_id: RunId, tools_json: Value) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE agent_runs SET pending_tools_json = ?1 WHERE run_id = ?2",
            params![tools_json.to_string(), run_id.value() as i64],
        )?;
        Ok(())
    }

    fn set_tool_results(&mut self, run_id: RunId, current_tool_idx: usize, results_json: Value) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE agent_runs SET current_tool_idx = ?1, tool_results_json = ?2 WHERE run_id = ?3",
            params![current_tool_idx as i64, results_json.to_string(), run_id.value() as i64],
        )?;
        Ok(())
    }

    fn complete_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.set_run_status(run_id, AgentRunStatus::Complete)
    }

    fn fail_run(&mut self, run_id: RunId) -> StoreResult<()> {
        self.set_run_status(run_id, AgentRunStatus::Failed)
    }

    fn fetch_run(&self, run_id: RunId) -> StoreResult<Option<AgentRun>> {
        self.conn
            .query_row("SELECT * FROM agent_runs WHERE run_id = ?1", params![run_id.value() as i64], row_to_run)
            .optional()
            .map_err(StoreError::from)
    }

    fn recover_non_terminal_runs(&self) -> StoreResult<Vec<AgentRun>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM agent_runs WHERE status NOT IN ('complete', 'failed') ORDER BY run_id ASC")?;
        let rows = stmt.query_map([], row_to_run)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn latest_compaction(&self) -> StoreResult<Option<Compaction>> {
        self.conn
            .query_row(
                "SELECT summary, first_kept_msg_id, tokens_before, file_ops_json
                 FROM compactions ORDER BY id DESC LIMIT 1",
                [],
                row_to_compaction,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn create_compaction(&mut self, compaction: Compaction) -> StoreResult<()> {
        let file_ops_json = compaction.file_ops.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO compactions (summary, first_kept_msg_id, tokens_before, file_ops_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                compaction.summary,
                compaction.first_kept_msg_id.value() as i64,
                compaction.tokens_before,
                file_ops_json,
                system_time_to_iso8601(std::time::SystemTime::now()),
            ],
        )?;
        Ok(())
    }
}

fn status_str(status: AgentRunStatus) -> &'static str {
    match status {
        AgentRunStatus::Streaming => "streaming",
        AgentRunStatus::Tools => "tools",
        AgentRunStatus::Continuing => "continuing",
        AgentRunStatus::Complete => "complete",
        AgentRunStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> AgentRunStatus {
    match s {
        "tools" => AgentRunStatus::Tools,
        "continuing" => AgentRunStatus::Continuing,
        "complete" => AgentRunStatus::Complete,
        "failed" => AgentRunStatus::Failed,
        _ => AgentRunStatus::Streaming,
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRun> {
    let run_id: i64 = row.get("run_id")?;
    let status: String = row.get("status")?;
    let assistant_content_json: Option<String> = row.get("assistant_content_json")?;
    let pending_tools_json: Option<String> = row.get("pending_tools_json")?;
    let current_tool_idx: i64 = row.get("current_tool_idx")?;
    let tool_results_json: Option<String> = row.get("tool_results_json")?;

    Ok(AgentRun {
        run_id: RunId::new(run_id as u64),
        status: parse_status(&status),
        assistant_content_json: assistant_content_json.and_then(|s| serde_json::from_str(&s).ok()),
        pending_tools_json: pending_tools_json.and_then(|s| serde_json::from_str(&s).ok()),
        current_tool_idx: current_tool_idx as usize,
        tool_results_json: tool_results_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_compaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Compaction> {
    let summary: String = row.get("summary")?;
    let first_kept_msg_id: i64 = row.get("first_kept_msg_id")?;
    let tokens_before: i64 = row.get("tokens_before")?;
    let file_ops_json: Option<String> = row.get("file_ops_json")?;

    Ok(Compaction {
        summary,
        first_kept_msg_id: MessageId::new(first_kept_msg_id as u64),
        tokens_before: tokens_before as u32,
        file_ops: file_ops_json.and_then(|s| serde_json::from_str::<FileOpsRecord>(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DurableStore;

    #[test]
    fn appended_message_ids_are_strictly_increasing() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let a = store
            .append_message(Message::new(MessageId::new(0), Role::User, "hi", std::time::SystemTime::now()))
            .expect("append");
        let b = store
            .append_message(Message::new(MessageId::new(0), Role::Assistant, "hello", std::time::SystemTime::now()))
            .expect("append");
        assert!(b.value() > a.value());
    }

    #[test]
    fn fetch_messages_from_excludes_up_to_bound() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let first = store
            .append_message(Message::new(MessageId::new(0), Role::User, "one", std::time::SystemTime::now()))
            .expect("append");
        store
            .append_message(Message::new(MessageId::new(0), Role::Assistant, "two", std::time::SystemTime::now()))
            .expect("append");

        let rest = store.fetch_messages_from(first).expect("fetch");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "two");
    }

    #[test]
    fn recover_non_terminal_runs_excludes_complete_and_failed() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store.create_agent_run(RunId::new(1)).expect("create");
        store.create_agent_run(RunId::new(2)).expect("create");
        store.create_agent_run(RunId::new(3)).expect("create");
        store.complete_run(RunId::new(1)).expect("complete");
        store.fail_run(RunId::new(2)).expect("fail");
        store.set_run_status(RunId::new(3), AgentRunStatus::Tools).expect("set status");

        let pending = store.recover_non_terminal_runs().expect("recover");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_id, RunId::new(3));
        assert_eq!(pending[0].status, AgentRunStatus::Tools);
    }

    #[test]
    fn latest_compaction_returns_most_recent() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store
            .create_compaction(Compaction {
                summary: "first".to_string(),
                first_kept_msg_id: MessageId::new(5),
                tokens_before: 1000,
                file_ops: None,
            })
            .expect("create compaction");
        store
            .create_compaction(Compaction {
                summary: "second".to_string(),
                first_kept_msg_id: MessageId::new(12),
                tokens_before: 2000,
                file_ops: Some(FileOpsRecord {
                    read_only: vec!["a.rs".to_string()],
                    modified: vec![],
                }),
            })
            .expect("create compaction");

        let latest = store.latest_compaction().expect("fetch").expect("some");
        assert_eq!(latest.summary, "second");
        assert_eq!(latest.first_kept_msg_id, MessageId::new(12));
    }
}
