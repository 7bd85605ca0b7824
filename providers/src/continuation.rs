//! Canonical, vendor-neutral shape of a continuation round's extra
//! content.
//!
//! Each driver's `build_request_body` translates this into its own
//! assistant-message-with-tool-calls and tool-result shapes; the Turn
//! Controller never constructs vendor JSON directly.

use smithers_types::{ToolCall, ToolResult};

/// The tool-use round being continued: the assistant content that
/// triggered it, the results gathered for it, and any steering text
/// queued while tools were executing.
pub struct Continuation<'a> {
    pub assistant_text: &'a str,
    pub assistant_tool_calls: &'a [ToolCall],
    pub tool_results: &'a [ToolResult],
    pub steering_texts: &'a [String],
}
