//! A minimal built-in tool set, illustrative of the contract in
//! [`crate::registry`]. Real deployments register their own tools; these
//! cover the file-ops extraction rules the Compaction Engine depends on.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::{json, Value};
use smithers_types::ToolResult;

use crate::registry::ToolExecutor;
use crate::truncate::{truncate_head, truncate_tail};

const MAX_OUTPUT_BYTES: usize = 16_384;

fn arg_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field `{key}`"))
}

/// Reads a UTF-8 text file, head-truncated (the start is usually what
/// matters for a file read).
pub struct ReadFileTool;

impl ToolExecutor for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a UTF-8 text file from disk."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })
    }

    fn execute(&self, call_id: &str, input: Value) -> ToolResult {
        let path = match arg_str(&input, "path") {
            Ok(path) => PathBuf::from(path),
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        match fs::read_to_string(&path) {
            Ok(content) => ToolResult::ok(call_id.to_string(), truncate_head(&content, MAX_OUTPUT_BYTES)),
            Err(error) => ToolResult::failed(call_id.to_string(), format!("read_file failed: {error}")),
        }
    }
}

/// Overwrites a file with the given content, creating parent directories
/// as needed.
pub struct WriteFileTool;

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write (overwrite) a UTF-8 text file on disk."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
            },
            "required": ["path", "content"],
        })
    }

    fn execute(&self, call_id: &str, input: Value) -> ToolResult {
        let path = match arg_str(&input, "path") {
            Ok(path) => PathBuf::from(path),
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        let content = match arg_str(&input, "content") {
            Ok(content) => content,
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        if let Some(parent) = path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return ToolResult::failed(call_id.to_string(), format!("write_file failed: {error}"));
            }
        }
        match fs::write(&path, content) {
            Ok(()) => ToolResult::ok(call_id.to_string(), format!("wrote {} bytes to {}", content.len(), path.display())),
            Err(error) => ToolResult::failed(call_id.to_string(), format!("write_file failed: {error}")),
        }
    }
}

/// Replaces the first occurrence of `find` with `replace` in a file.
pub struct EditFileTool;

impl ToolExecutor for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace the first occurrence of a substring in a file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "find": { "type": "string" },
                "replace": { "type": "string" },
            },
            "required": ["path", "find", "replace"],
        })
    }

    fn execute(&self, call_id: &str, input: Value) -> ToolResult {
        let path = match arg_str(&input, "path") {
            Ok(path) => PathBuf::from(path),
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        let find = match arg_str(&input, "find") {
            Ok(find) => find,
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        let replace = match arg_str(&input, "replace") {
            Ok(replace) => replace,
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        let original = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => return ToolResult::failed(call_id.to_string(), format!("edit_file failed: {error}")),
        };
        let Some(at) = original.find(find) else {
            return ToolResult::failed(call_id.to_string(), "find string not present in file".to_string());
        };
        let mut updated = String::with_capacity(original.len());
        updated.push_str(&original[..at]);
        updated.push_str(replace);
        updated.push_str(&original[at + find.len()..]);
        match fs::write(&path, &updated) {
            Ok(()) => ToolResult::ok(call_id.to_string(), format!("edited {}", path.display())),
            Err(error) => ToolResult::failed(call_id.to_string(), format!("edit_file failed: {error}")),
        }
    }
}

/// Runs a shell command to completion and returns its combined output,
/// tail-truncated (the interesting part of a log is usually the end).
pub struct RunCommandTool;

impl ToolExecutor for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command and capture its combined stdout/stderr."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
        })
    }

    fn execute(&self, call_id: &str, input: Value) -> ToolResult {
        let command = match arg_str(&input, "command") {
            Ok(command) => command,
            Err(message) => return ToolResult::failed(call_id.to_string(), message),
        };
        let output = Command::new("sh").arg("-c").arg(command).output();
        match output {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let truncated = truncate_tail(&combined, MAX_OUTPUT_BYTES);
                if output.status.success() {
                    ToolResult::ok(call_id.to_string(), truncated)
                } else {
                    ToolResult::failed(call_id.to_string(), format!("exit status {}: {truncated}", output.status))
                }
            }
            Err(error) => ToolResult::failed(call_id.to_string(), format!("run_command failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_file_reports_missing_path_as_failure() {
        let result = ReadFileTool.execute("call-1", json!({ "path": "/nonexistent/path/for/test" }));
        assert!(!result.success);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let write = WriteFileTool.execute(
            "call-1",
            json!({ "path": path.to_string_lossy(), "content": "hello" }),
        );
        assert!(write.success);
        let read = ReadFileTool.execute("call-2", json!({ "path": path.to_string_lossy() }));
        assert!(read.success);
        assert_eq!(read.content, "hello");
    }

    #[test]
    fn edit_file_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "foo bar foo").unwrap();
        let edit = EditFileTool.execute(
            "call-1",
            json!({ "path": path.to_string_lossy(), "find": "foo", "replace": "baz" }),
        );
        assert!(edit.success);
        assert_eq!(fs::read_to_string(&path).unwrap(), "baz bar foo");
    }

    #[test]
    fn edit_file_fails_when_find_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "content").unwrap();
        let edit = EditFileTool.execute(
            "call-1",
            json!({ "path": path.to_string_lossy(), "find": "missing", "replace": "x" }),
        );
        assert!(!edit.success);
    }

    #[test]
    fn run_command_captures_stdout() {
        let result = RunCommandTool.execute("call-1", json!({ "command": "echo smithers" }));
        assert!(result.success);
        assert!(result.content.contains("smithers"));
    }

    #[test]
    fn run_command_reports_nonzero_exit_as_failure() {
        let result = RunCommandTool.execute("call-1", json!({ "command": "exit 1" }));
        assert!(!result.success);
    }

    #[test]
    fn missing_argument_is_a_bad_args_failure_not_a_panic() {
        let result = ReadFileTool.execute("call-1", json!({}));
        assert!(!result.success);
    }
}
