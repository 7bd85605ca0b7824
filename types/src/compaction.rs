//! The durable `Compaction` record.

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// File-operation annotation scanned out of the compacted range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOpsRecord {
    /// Paths read but never written or edited in the compacted range.
    pub read_only: Vec<String>,
    /// Paths written via `write_file` or `edit_file` in the compacted range.
    pub modified: Vec<String>,
}

impl FileOpsRecord {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_only.is_empty() && self.modified.is_empty()
    }

    /// Render as the `<read-files>`/`<modified-files>` blocks appended to
    /// the stored summary.
    #[must_use]
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        if !self.read_only.is_empty() {
            out.push_str("<read-files>\n");
            for path in &self.read_only {
                out.push_str(path);
                out.push('\n');
            }
            out.push_str("</read-files>\n");
        }
        if !self.modified.is_empty() {
            out.push_str("<modified-files>\n");
            for path in &self.modified {
                out.push_str(path);
                out.push('\n');
            }
            out.push_str("</modified-files>\n");
        }
        out
    }
}

/// One compaction: a summary replacing a prefix of history, transparent to
/// the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compaction {
    pub summary: String,
    /// Strict lower bound of retained history; messages with a smaller id
    /// are dropped from every subsequent prompt assembly.
    pub first_kept_msg_id: MessageId,
    pub tokens_before: u32,
    pub file_ops: Option<FileOpsRecord>,
}
