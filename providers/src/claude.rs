//! Anthropic Messages API driver.
//!
//! SSE framed; named events `content_block_start/_delta/_stop`,
//! `message_delta`, `message_stop`. A tool_use content block is
//! **finalized** on `content_block_stop` for that block index.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use smithers_types::{Message, ModelName, OutputLimits, Role, StreamEvent, StreamFinishReason, ToolCall, ToolDefinition};

use crate::continuation::Continuation;
use crate::driver::{DriverError, StreamingState};
use crate::http::{http_client, read_capped_error_body};
use crate::retry::{RetryConfig, send_with_retry};
use crate::sse::{MAX_SSE_BUFFER_BYTES, drain_next_sse_event, extract_sse_data};

pub(crate) const API_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const API_VERSION: &str = "2023-06-01";

fn is_opus_4_6_model(model: &str) -> bool {
    model.to_ascii_lowercase().starts_with("claude-opus-4-6")
}

fn anthropic_beta_header(model: &str, limits: OutputLimits) -> Option<&'static str> {
    if is_opus_4_6_model(model) {
        return Some("context-1m-2025-08-07");
    }
    if limits.has_thinking() {
        Some("interleaved-thinking-2025-05-14")
    } else {
        None
    }
}

fn content_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

pub fn build_request_body(
    model: &str,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    tools: Option<&[ToolDefinition]>,
    continuation: Option<&Continuation<'_>>,
) -> Value {
    let mut api_messages: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => continue,
            Role::User => {
                api_messages.push(json!({
                    "role": "user",
                    "content": [content_block(&message.content)],
                }));
            }
            Role::Assistant => {
                api_messages.push(json!({
                    "role": "assistant",
                    "content": [content_block(&message.content)],
                }));
            }
        }
    }

    if let Some(continuation) = continuation {
        append_continuation(&mut api_messages, continuation);
    }

    let mut body = json!({
        "model": model,
        "max_tokens": limits.effective_max_tokens(),
        "messages": api_messages,
        "stream": true,
    });

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        body["system"] = json!(prompt);
    }

    if let Some(tools) = tools
        && !tools.is_empty()
    {
        body["tools"] = json!(
            tools
                .iter()
                .map(|tool| json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                }))
                .collect::<Vec<_>>()
        );
    }

    if let Some(budget) = limits.thinking_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }

    body
}

/// Appends the continuation's assistant-content-JSON and tool_result
/// blocks. Anthropic's content-block model is
/// close enough to the canonical shape that this is close to a direct
/// translation; OpenAI and Google need more reshaping (see their modules).
fn append_continuation(api_messages: &mut Vec<Value>, continuation: &Continuation<'_>) {
    let mut assistant_blocks: Vec<Value> = Vec::new();
    if !continuation.assistant_text.is_empty() {
        assistant_blocks.push(content_block(continuation.assistant_text));
    }
    for call in continuation.assistant_tool_calls {
        assistant_blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input_json,
        }));
    }
    api_messages.push(json!({ "role": "assistant", "content": assistant_blocks }));

    let mut result_blocks: Vec<Value> = continuation
        .tool_results
        .iter()
        .map(|result| {
            json!({
                "type": "tool_result",
                "tool_use_id": result.id,
                "content": result.content,
                "is_error": !result.success,
            })
        })
        .collect();
    for steering_text in continuation.steering_texts {
        result_blocks.push(content_block(steering_text));
    }
    api_messages.push(json!({ "role": "user", "content": result_blocks }));
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    MessageStart,
    MessageDelta { delta: Option<MessageDeltaInfo> },
    ContentBlockStart { index: u32, content_block: ContentBlock },
    ContentBlockDelta { index: u32, delta: Delta },
    ContentBlockStop { index: u32 },
    MessageStop,
    Ping,
    Error { error: ErrorInfo },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text,
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Unknown,
}

struct PendingToolUse {
    id: String,
    name: String,
    json_buffer: String,
}

fn stop_reason_to_finish(reason: StopReason) -> StreamFinishReason {
    match reason {
        StopReason::ToolUse => StreamFinishReason::ToolUse,
        StopReason::MaxTokens => StreamFinishReason::Length,
        StopReason::EndTurn | StopReason::StopSequence | StopReason::Unknown => StreamFinishReason::Stop,
    }
}

fn apply_event(
    raw_event: &str,
    pending_tool: &mut Option<PendingToolUse>,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) {
    let Some(data) = extract_sse_data(raw_event) else {
        return;
    };
    let parsed: Result<Event, _> = serde_json::from_str(&data);
    let event = match parsed {
        Ok(event) => event,
        Err(err) => {
            let _ = tx.send(StreamEvent::ProtocolError(err.to_string()));
            return;
        }
    };

    match event {
        Event::ContentBlockStart {
            content_block: ContentBlock::ToolUse { id, name },
            ..
        } => {
            *pending_tool = Some(PendingToolUse {
                id,
                name,
                json_buffer: String::new(),
            });
        }
        Event::ContentBlockDelta {
            delta: Delta::TextDelta { text },
            ..
        } => {
            let _ = tx.send(StreamEvent::TextDelta(text));
        }
        Event::ContentBlockDelta {
            delta: Delta::ThinkingDelta { thinking },
            ..
        } => {
            let _ = tx.send(StreamEvent::ThinkingDelta(thinking));
        }
        Event::ContentBlockDelta {
            delta: Delta::InputJsonDelta { partial_json },
            ..
        } => {
            if let Some(pending) = pending_tool.as_mut() {
                pending.json_buffer.push_str(&partial_json);
            }
        }
        Event::ContentBlockStop { .. } => {
            if let Some(pending) = pending_tool.take() {
                let input_json = serde_json::from_str(&pending.json_buffer)
                    .unwrap_or(Value::Object(serde_json::Map::new()));
                let _ = tx.send(StreamEvent::ToolCallFinalized(ToolCall {
                    id: pending.id,
                    name: pending.name,
                    input_json,
                }));
            }
        }
        Event::MessageDelta {
            delta: Some(MessageDeltaInfo { stop_reason: Some(reason) }),
        } => {
            let _ = tx.send(StreamEvent::Done(stop_reason_to_finish(reason)));
        }
        Event::Error { error } => {
            let _ = tx.send(StreamEvent::Done(StreamFinishReason::Error));
            tracing::warn!(message = %error.message, "claude stream error event");
        }
        Event::MessageStart
        | Event::MessageDelta { delta: _ }
        | Event::ContentBlockStart { .. }
        | Event::MessageStop
        | Event::Ping
        | Event::Unknown => {}
    }
}

pub fn start(
    api_key: String,
    model: &ModelName,
    request_body: Value,
) -> Result<StreamingState, DriverError> {
    let url = API_URL.to_string();
    let beta_header = anthropic_beta_header(
        model.model_id(),
        OutputLimits::new(request_body["max_tokens"].as_u64().unwrap_or(4096) as u32),
    );
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let client = http_client();
        let retry_config = RetryConfig::default();
        let outcome = send_with_retry(
            || {
                let mut builder = client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", API_VERSION)
                    .header("content-type", "application/json")
                    .json(&request_body);
                if let Some(beta) = beta_header {
                    builder = builder.header("anthropic-beta", beta);
                }
                builder
            },
            &retry_config,
        )
        .await;

        let response = match outcome {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let status = response.status();
                let body = read_capped_error_body(response).await;
                let _ = tx.send(StreamEvent::ProtocolError(format!("API error {status}: {body}")));
                let _ = tx.send(StreamEvent::Done(StreamFinishReason::Error));
                return;
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::ProtocolError(err.to_string()));
                let _ = tx.send(StreamEvent::Done(StreamFinishReason::Error));
                return;
            }
        };

        let mut buffer: Vec<u8> = Vec::new();
        let mut pending_tool: Option<PendingToolUse> = None;
        let mut byte_stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = byte_stream.next().await {
            let Ok(chunk) = chunk else {
                let _ = tx.send(StreamEvent::Done(StreamFinishReason::Error));
                return;
            };
            buffer.extend_from_slice(&chunk);
            if buffer.len() > MAX_SSE_BUFFER_BYTES {
                let _ = tx.send(StreamEvent::ProtocolError("sse buffer exceeded limit".to_string()));
                let _ = tx.send(StreamEvent::Done(StreamFinishReason::Error));
                return;
            }
            while let Some(event_bytes) = drain_next_sse_event(&mut buffer) {
                let raw_event = String::from_utf8_lossy(&event_bytes).into_owned();
                apply_event(&raw_event, &mut pending_tool, &tx);
            }
        }
    });

    Ok(StreamingState::new(
        smithers_types::Provider::Claude,
        rx,
        task,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_stop_reasons() {
        assert_eq!(stop_reason_to_finish(StopReason::ToolUse), StreamFinishReason::ToolUse);
        assert_eq!(stop_reason_to_finish(StopReason::MaxTokens), StreamFinishReason::Length);
        assert_eq!(stop_reason_to_finish(StopReason::EndTurn), StreamFinishReason::Stop);
    }

    #[test]
    fn drops_system_and_builds_tool_block() {
        let messages = vec![Message::new(
            smithers_types::MessageId::new(1),
            Role::User,
            "hi",
            std::time::SystemTime::now(),
        )];
        let body = build_request_body("claude-sonnet-4-20250514", &messages, OutputLimits::default(), Some("be nice"), None, None);
        assert_eq!(body["system"], "be nice");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn accumulates_tool_call_across_deltas() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = None;
        apply_event(
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tc_1\",\"name\":\"read_file\"}}\n",
            &mut pending,
            &tx,
        );
        apply_event(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\":\"}}\n",
            &mut pending,
            &tx,
        );
        apply_event(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"a.txt\\\"}\"}}\n",
            &mut pending,
            &tx,
        );
        apply_event("data: {\"type\":\"content_block_stop\",\"index\":0}\n", &mut pending, &tx);

        let event = rx.try_recv().expect("tool call finalized");
        match event {
            StreamEvent::ToolCallFinalized(call) => {
                assert_eq!(call.id, "tc_1");
                assert_eq!(call.name, "read_file");
                assert_eq!(call.input_json["path"], "a.txt");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
