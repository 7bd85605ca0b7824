//! The durable `Message` domain type.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single durable conversation row.
///
/// Constructors take the id and timestamp explicitly; the durable store
/// owns id assignment and the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    /// Excluded from every provider request.
    pub ephemeral: bool,
    pub created_at: SystemTime,
}

impl Message {
    #[must_use]
    pub fn new(id: MessageId, role: Role, content: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            tool_name: None,
            tool_input: None,
            ephemeral: false,
            created_at,
        }
    }

    #[must_use]
    pub fn with_tool_hint(mut self, tool_name: impl Into<String>, tool_input: Value) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_input = Some(tool_input);
        self
    }

    #[must_use]
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Approximate size of this message for token estimation:
    /// content bytes plus any tool name/input bytes.
    #[must_use]
    pub fn estimation_byte_len(&self) -> usize {
        let mut len = self.content.len();
        if let Some(name) = &self.tool_name {
            len += name.len();
        }
        if let Some(input) = &self.tool_input {
            len += input.to_string().len();
        }
        len
    }
}
