//! OpenAI Chat Completions streaming driver.
//!
//! `data: [DONE]` terminates the stream; tool calls arrive as per-index
//! deltas across chunks (`tool_calls[i].function.{name,arguments}`) and are
//! finalized only once `[DONE]` or a `finish_reason` arrives, since OpenAI
//! never signals "this one tool call is complete" mid-stream the way
//! Claude's `content_block_stop` does.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use smithers_types::{Message, OutputLimits, Role, StreamEvent, StreamFinishReason, ToolCall, ToolDefinition};

use crate::continuation::Continuation;
use crate::driver::{DriverError, StreamingState};
use crate::http::{http_client, read_capped_error_body};
use crate::retry::{RetryConfig, send_with_retry};
use crate::sse::{MAX_SSE_BUFFER_BYTES, drain_next_sse_event, extract_sse_data};

pub(crate) const API_URL: &str = "https://api.openai.com/v1/chat/completions";

fn is_reasoning_model(model: &str) -> bool {
    model.starts_with('o') || model.contains("reasoning")
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

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        api_messages.push(json!({ "role": "system", "content": prompt }));
    }

    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        api_messages.push(json!({ "role": role, "content": message.content }));
    }

    if let Some(continuation) = continuation {
        append_continuation(&mut api_messages, continuation);
    }

    let mut body = json!({
        "model": model,
        "messages": api_messages,
        "stream": true,
        "max_completion_tokens": limits.effective_max_tokens(),
    });

    if let Some(tools) = tools
        && !tools.is_empty()
    {
        body["tools"] = json!(
            tools
                .iter()
                .map(|tool| json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
                }))
                .collect::<Vec<_>>()
        );
    }

    if is_reasoning_model(model)
        && let Some(budget) = limits.thinking_budget
    {
        let effort = if budget >= 16_000 {
            "high"
        } else if budget >= 4_000 {
            "medium"
        } else {
            "low"
        };
        body["reasoning_effort"] = json!(effort);
    }

    body
}

/// Append the assistant tool-calls message and the per-result `tool`
/// messages OpenAI expects for a continuation round. Steering text has no
/// home inside those messages, so it rides along as one extra trailing user
/// message.
fn append_continuation(api_messages: &mut Vec<Value>, continuation: &Continuation<'_>) {
    let tool_calls: Vec<Value> = continuation
        .assistant_tool_calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.input_json.to_string(),
                },
            })
        })
        .collect();

    let mut assistant_message = json!({
        "role": "assistant",
        "content": if continuation.assistant_text.is_empty() {
            Value::Null
        } else {
            Value::String(continuation.assistant_text.to_string())
        },
    });
    if !tool_calls.is_empty() {
        assistant_message["tool_calls"] = json!(tool_calls);
    }
    api_messages.push(assistant_message);

    for result in continuation.tool_results {
        api_messages.push(json!({
            "role": "tool",
            "tool_call_id": result.id,
            "content": result.content,
        }));
    }

    if !continuation.steering_texts.is_empty() {
        api_messages.push(json!({
            "role": "user",
            "content": continuation.steering_texts.join("\n\n"),
        }));
    }
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

fn finish_reason_to_finish(reason: &str) -> StreamFinishReason {
    match reason {
        "tool_calls" => StreamFinishReason::ToolUse,
        "length" => StreamFinishReason::Length,
        _ => StreamFinishReason::Stop,
    }
}

fn flush_tool_calls(pending: &mut BTreeMap<u32, PendingToolCall>, tx: &mpsc::UnboundedSender<StreamEvent>) {
    for (_, call) in std::mem::take(pending) {
        let input_json = serde_json::from_str(&call.arguments).unwrap_or(Value::Object(serde_json::Map::new()));
        let _ = tx.send(StreamEvent::ToolCallFinalized(ToolCall {
            id: call.id,
            name: call.name,
            input_json,
        }));
    }
}

fn apply_data(
    data: &str,
    pending: &mut BTreeMap<u32, PendingToolCall>,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) -> bool {
    if data.trim() == "[DONE]" {
        flush_tool_calls(pending, tx);
        return true;
    }

    let chunk: Chunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(err) => {
            let _ = tx.send(StreamEvent::ProtocolError(err.to_string()));
            return false;
        }
    };

    for choice in chunk.choices {
        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            let _ = tx.send(StreamEvent::TextDelta(text));
        }

        for tool_delta in choice.delta.tool_calls {
            let entry = pending.entry(tool_delta.index).or_default();
            if let Some(id) = tool_delta.id {
                entry.id = id;
            }
            if let Some(function) = tool_delta.function {
                if let Some(name) = function.name {
                    entry.name = name;
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            flush_tool_calls(pending, tx);
            let _ = tx.send(StreamEvent::Done(finish_reason_to_finish(&reason)));
            return true;
        }
    }

    false
}

pub fn start(
    api_key: String,
    _model: &smithers_types::ModelName,
    request_body: Value,
) -> Result<StreamingState, DriverError> {
    let url = API_URL.to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let client = http_client();
        let retry_config = RetryConfig::default();
        let outcome = send_with_retry(
            || {
                client
                    .post(&url)
                    .bearer_auth(&api_key)
                    .header("content-type", "application/json")
                    .json(&request_body)
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
        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
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
                let Some(data) = extract_sse_data(&raw_event) else {
                    continue;
                };
                if apply_data(&data, &mut pending, &tx) {
                    return;
                }
            }
        }
    });

    Ok(StreamingState::new(smithers_types::Provider::OpenAI, rx, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_finish_reasons() {
        assert_eq!(finish_reason_to_finish("tool_calls"), StreamFinishReason::ToolUse);
        assert_eq!(finish_reason_to_finish("length"), StreamFinishReason::Length);
        assert_eq!(finish_reason_to_finish("stop"), StreamFinishReason::Stop);
    }

    #[test]
    fn assembles_tool_call_across_index_deltas() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = BTreeMap::new();

        let first = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"path\":"}}]}}]}"#;
        let second = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#;
        let done = r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;

        assert!(!apply_data(first, &mut pending, &tx));
        assert!(!apply_data(second, &mut pending, &tx));
        assert!(apply_data(done, &mut pending, &tx));

        let event = rx.try_recv().expect("finalized tool call");
        match event {
            StreamEvent::ToolCallFinalized(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.name, "read_file");
                assert_eq!(call.input_json["path"], "a.txt");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let terminal = rx.try_recv().expect("done event");
        assert_eq!(terminal, StreamEvent::Done(StreamFinishReason::ToolUse));
    }

    #[test]
    fn done_sentinel_terminates() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pending = BTreeMap::new();
        assert!(apply_data("[DONE]", &mut pending, &tx));
    }
}
