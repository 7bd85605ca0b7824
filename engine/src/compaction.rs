//! The Compaction Engine: token estimation, cut-point selection,
//! summarization prompt assembly, file-operations extraction.

use serde_json::Value;
use smithers_core::{CompactionSettings, ModelLimits};
use smithers_providers::{complete_once, ApiConfig};
use smithers_store::DurableStore;
use smithers_tools::truncate::truncate_tail;
use smithers_types::{Compaction, FileOpsRecord, Message, MessageId, OutputLimits, Role};

use crate::error::CompactionError;

/// Tokens kept un-summarized at the tail of history, regardless of the
/// overall trigger threshold.
const DEFAULT_KEEP_RECENT_TOKENS: u32 = 20_000;

const MAX_TOOL_ARG_CHARS_IN_TRANSCRIPT: usize = 500;

const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are compacting a coding assistant's conversation history so it fits the model's context window. \
Respond with exactly four markdown sections, in this order: \
`## Original Request`, `## Key Decisions`, `## Work Completed`, `## Current State`. \
Be concise. Do not invent information that is not present in the transcript.";

const SUMMARIZATION_OUTPUT_LIMIT: OutputLimits = OutputLimits {
    max_tokens: 1024,
    thinking_budget: None,
};

fn estimate_message_tokens(message: &Message) -> u32 {
    if message.ephemeral {
        return 0;
    }
    let bytes = message.estimation_byte_len();
    u32::try_from(bytes.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Sum of `ceil(bytes/4)` over every non-ephemeral message.
#[must_use]
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Whether compaction should run, given the current history and the
/// resolved per-model context limit.
#[must_use]
pub fn should_compact(messages: &[Message], limits: &ModelLimits, settings: &CompactionSettings) -> bool {
    if !settings.enabled {
        return false;
    }
    let context_limit = settings.context_limit_override.unwrap_or(limits.context_limit);
    let tokens = estimate_total_tokens(messages);
    tokens > context_limit.saturating_sub(settings.reserve_tokens)
}

/// `(first_kept_index, first_kept_msg_id)`, or `None` if no valid cut
/// exists.
#[must_use]
pub fn select_cut_point(messages: &[Message], keep_recent_tokens: u32) -> Option<(usize, MessageId)> {
    if messages.is_empty() {
        return None;
    }

    let mut acc: u32 = 0;
    let mut candidate = messages.len();
    for (index, message) in messages.iter().enumerate().rev() {
        if message.ephemeral {
            candidate = index;
            continue;
        }
        let tokens = estimate_message_tokens(message);
        if acc.saturating_add(tokens) > keep_recent_tokens {
            candidate = index + 1;
            break;
        }
        acc += tokens;
        candidate = index;
    }

    let mut index = candidate;
    while index < messages.len() && messages[index].role != Role::User {
        index += 1;
    }

    if index == 0 || index >= messages.len() {
        return None;
    }
    Some((index, messages[index].id))
}

fn render_tool_args(tool_input: Option<&Value>) -> String {
    let raw = tool_input.map(std::string::ToString::to_string).unwrap_or_default();
    truncate_tail(&raw, MAX_TOOL_ARG_CHARS_IN_TRANSCRIPT)
}

fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        if message.ephemeral || message.role == Role::System {
            continue;
        }
        out.push('[');
        out.push_str(message.role.as_str());
        out.push_str("]: ");
        out.push_str(&message.content);
        if let Some(tool_name) = &message.tool_name {
            out.push_str(&format!(" (tool: {tool_name}({}))", render_tool_args(message.tool_input.as_ref())));
        }
        out.push('\n');
    }
    out
}

fn build_summarization_prompt(prior_summary: Option<&str>, messages_to_summarize: &[Message]) -> String {
    let mut prompt = String::new();
    if let Some(summary) = prior_summary {
        prompt.push_str("Prior summary of earlier history:\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Transcript to summarize:\n");
    prompt.push_str(&render_transcript(messages_to_summarize));
    prompt
}

/// Extract `read_file`/`write_file`/`edit_file` paths out of the compacted
/// range.
#[must_use]
pub fn extract_file_ops(messages: &[Message]) -> FileOpsRecord {
    let mut read: Vec<String> = Vec::new();
    let mut modified: Vec<String> = Vec::new();

    for message in messages {
        let Some(tool_name) = &message.tool_name else { continue };
        let Some(path) = message.tool_input.as_ref().and_then(|v| v.get("path")).and_then(Value::as_str) else {
            continue;
        };
        match tool_name.as_str() {
            "read_file" => read.push(path.to_string()),
            "write_file" | "edit_file" => modified.push(path.to_string()),
            _ => {}
        }
    }

    modified.sort();
    modified.dedup();
    read.sort();
    read.dedup();
    read.retain(|path| !modified.contains(path));

    FileOpsRecord { read_only: read, modified }
}

/// Everything [`summarize`] needs, gathered from the store while the
/// controller still owns it synchronously. Produced by [`prepare`].
pub struct CompactionRequest {
    first_kept_msg_id: MessageId,
    tokens_before: u32,
    prior_summary: Option<String>,
    messages_to_summarize: Vec<Message>,
}

/// Read-only half of a compaction attempt: decide whether one is needed
/// and, if so, gather exactly the data the async summarization call
/// needs, without holding the call itself inside a tick.
///
/// `None` means either compaction wasn't needed or no valid cut point
/// exists yet.
pub fn prepare(
    store: &dyn DurableStore,
    limits: &ModelLimits,
    settings: &CompactionSettings,
) -> Result<Option<CompactionRequest>, CompactionError> {
    let messages = store.fetch_messages()?;
    if !should_compact(&messages, limits, settings) {
        return Ok(None);
    }

    let Some((cut_index, first_kept_msg_id)) = select_cut_point(&messages, DEFAULT_KEEP_RECENT_TOKENS) else {
        return Ok(None);
    };
    let tokens_before = estimate_total_tokens(&messages);
    let prior_summary = store.latest_compaction()?.map(|compaction| compaction.summary);
    let messages_to_summarize = messages[..cut_index].to_vec();

    Ok(Some(CompactionRequest {
        first_kept_msg_id,
        tokens_before,
        prior_summary,
        messages_to_summarize,
    }))
}

/// The async half: issue the blocking, non-streaming summarization call
/// and build the final [`Compaction`]. Never fails - a placeholder summary
/// is written instead, so the cut advances deterministically even when the
/// provider call errors.
pub async fn summarize(api_config: &ApiConfig, request: CompactionRequest) -> Compaction {
    let CompactionRequest {
        first_kept_msg_id,
        tokens_before,
        prior_summary,
        messages_to_summarize,
    } = request;

    let user_prompt = build_summarization_prompt(prior_summary.as_deref(), &messages_to_summarize);
    let summarization_request = [Message::new(
        MessageId::new(0),
        Role::User,
        user_prompt,
        std::time::SystemTime::now(),
    )];

    let summary_body = complete_once(api_config, &summarization_request, SUMMARIZATION_OUTPUT_LIMIT, Some(SUMMARIZATION_SYSTEM_PROMPT)).await;
    let mut summary = match summary_body {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(%err, "compaction summarization call failed, writing placeholder summary");
            "## Original Request\n(summarization unavailable)\n\n## Key Decisions\n\n## Work Completed\n\n## Current State\nContext was compacted but the summarization call failed; detail before this point has been dropped.".to_string()
        }
    };

    let file_ops = extract_file_ops(&messages_to_summarize);
    if !file_ops.is_empty() {
        summary.push('\n');
        summary.push_str(&file_ops.to_markup());
    }

    Compaction {
        summary,
        first_kept_msg_id,
        tokens_before,
        file_ops: Some(file_ops),
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use smithers_types::Provider;

    use super::*;

    fn message(id: u64, role: Role, content: &str) -> Message {
        Message::new(MessageId::new(id), role, content, SystemTime::now())
    }

    #[test]
    fn total_tokens_excludes_ephemeral_messages() {
        let messages = vec![
            message(0, Role::User, "a".repeat(400).as_str()),
            message(1, Role::Assistant, "b".repeat(400).as_str()).ephemeral(),
        ];
        assert_eq!(estimate_total_tokens(&messages), 100);
    }

    #[test]
    fn should_compact_honors_disabled_setting() {
        let limits = ModelLimits { context_limit: 1000 };
        let settings = CompactionSettings {
            enabled: false,
            reserve_tokens: 0,
            context_limit_override: None,
        };
        let messages = vec![message(0, Role::User, &"x".repeat(8000))];
        assert!(!should_compact(&messages, &limits, &settings));
    }

    #[test]
    fn should_compact_triggers_past_threshold() {
        let limits = ModelLimits { context_limit: 1000 };
        let settings = CompactionSettings {
            enabled: true,
            reserve_tokens: 100,
            context_limit_override: None,
        };
        let small = vec![message(0, Role::User, "hi")];
        assert!(!should_compact(&small, &limits, &settings));

        let large = vec![message(0, Role::User, &"x".repeat(4000))];
        assert!(should_compact(&large, &limits, &settings));
    }

    #[test]
    fn cut_point_advances_to_next_user_message() {
        let messages = vec![
            message(0, Role::User, &"x".repeat(400)),
            message(1, Role::Assistant, &"y".repeat(400)),
            message(2, Role::User, &"z".repeat(400)),
            message(3, Role::Assistant, "short"),
        ];
        let (index, id) = select_cut_point(&messages, 1).expect("a cut exists");
        assert_eq!(index, 2);
        assert_eq!(id, MessageId::new(2));
    }

    #[test]
    fn cut_point_is_none_when_everything_fits_in_the_recent_budget() {
        let messages = vec![message(0, Role::User, "hi"), message(1, Role::Assistant, "hello")];
        assert!(select_cut_point(&messages, 20_000).is_none());
    }

    #[test]
    fn cut_point_is_none_when_nothing_fits_at_all() {
        let messages = vec![message(0, Role::User, &"x".repeat(10_000))];
        assert!(select_cut_point(&messages, 1).is_none());
    }

    #[test]
    fn file_ops_splits_read_only_from_modified() {
        let messages = vec![
            message(0, Role::Assistant, "").with_tool_hint("read_file", serde_json::json!({"path": "a.rs"})),
            message(1, Role::Assistant, "").with_tool_hint("write_file", serde_json::json!({"path": "b.rs"})),
            message(2, Role::Assistant, "").with_tool_hint("read_file", serde_json::json!({"path": "b.rs"})),
        ];
        let ops = extract_file_ops(&messages);
        assert_eq!(ops.modified, vec!["b.rs".to_string()]);
        assert_eq!(ops.read_only, vec!["a.rs".to_string()]);
    }

    #[test]
    fn prepare_is_a_noop_below_threshold() {
        let mut store = smithers_store::InMemoryStore::new();
        store.append_message(message(0, Role::User, "hi")).expect("append");
        let limits = ModelLimits { context_limit: 200_000 };
        let settings = CompactionSettings::default();

        let result = prepare(&store, &limits, &settings).expect("ok");
        assert!(result.is_none());
    }

    #[test]
    fn prepare_gathers_a_request_once_past_threshold() {
        let mut store = smithers_store::InMemoryStore::new();
        for i in 0..5 {
            store
                .append_message(message(i, Role::User, &"x".repeat(4000)))
                .expect("append");
            store
                .append_message(message(i + 100, Role::Assistant, &"y".repeat(4000)))
                .expect("append");
        }
        let limits = ModelLimits { context_limit: 1000 };
        let settings = CompactionSettings {
            enabled: true,
            reserve_tokens: 0,
            context_limit_override: None,
        };

        let request = prepare(&store, &limits, &settings).expect("ok").expect("a request");
        assert!(!request.messages_to_summarize.is_empty());
        assert!(request.tokens_before > 0);
    }

    #[tokio::test]
    async fn summarize_falls_back_to_a_placeholder_on_provider_failure() {
        let api_config = ApiConfig::resolve(smithers_types::ModelName::new(Provider::Claude, "claude-sonnet-4-20250514"), |_| {
            Some("test-key".to_string())
        })
        .expect("resolve");
        let request = CompactionRequest {
            first_kept_msg_id: MessageId::new(5),
            tokens_before: 1234,
            prior_summary: None,
            messages_to_summarize: vec![message(0, Role::User, "do the thing")],
        };

        let compaction = summarize(&api_config, request).await;
        assert_eq!(compaction.first_kept_msg_id, MessageId::new(5));
        assert_eq!(compaction.tokens_before, 1234);
        assert!(compaction.summary.contains("Original Request"));
    }
}
