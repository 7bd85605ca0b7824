//! Tool call / tool result transient types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A model-emitted request to execute a named tool.
///
/// Carries an opaque `id` echoed back to the provider in the paired
/// `ToolResult`. Finalization semantics (when a call is complete) are
/// driver-specific and documented on `ProviderDriver::tool_calls`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input_json: Value,
}

/// The paired response for a `ToolCall`, delivered back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    pub success: bool,
    /// Tool-specific structured metadata, e.g. a unified diff.
    pub details_json: Option<Value>,
}

impl ToolResult {
    #[must_use]
    pub fn ok(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            success: true,
            details_json: None,
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            success: false,
            details_json: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details_json = Some(details);
        self
    }
}

/// The fixed message recorded for a tool dropped because of steering.
pub const SKIPPED_DUE_TO_STEERING: &str = "Skipped due to queued user message.";

/// A JSON-Schema-shaped tool definition, as presented to the model.
///
/// Vendor-specific translation (functionDeclarations / tools-of-type-function
/// / native tools) happens in `smithers-providers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
