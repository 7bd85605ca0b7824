//! Google Generative Language API streaming driver.
//!
//! `alt=sse` wraps a stream of complete JSON objects rather than
//! `data:`-prefixed framed events; we brace-match with
//! [`crate::sse::drain_complete_json_values`] instead of the
//! newline-delimited framing the other two drivers use. A `functionCall`
//! part arrives whole (no incremental argument deltas), so it is finalized
//! the moment it is seen.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use smithers_types::{Message, ModelName, OutputLimits, Role, StreamEvent, StreamFinishReason, ToolCall, ToolDefinition};

use crate::continuation::Continuation;
use crate::driver::{DriverError, StreamingState};
use crate::http::{http_client, read_capped_error_body};
use crate::retry::{RetryConfig, send_with_retry};
use crate::sse::{MAX_SSE_BUFFER_BYTES, drain_complete_json_values};

fn api_url(model_id: &str, api_key: &str) -> String {
    format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{model_id}:streamGenerateContent?alt=sse&key={api_key}"
    )
}

/// Non-streaming counterpart of [`api_url`], used by the blocking
/// summarization call.
pub(crate) fn generate_content_url(model_id: &str, api_key: &str) -> String {
    format!("https://generativelanguage.googleapis.com/v1beta/models/{model_id}:generateContent?key={api_key}")
}

pub fn build_request_body(
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    tools: Option<&[ToolDefinition]>,
    continuation: Option<&Continuation<'_>>,
) -> Value {
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::User => "user",
            Role::Assistant => "model",
        };
        contents.push(json!({
            "role": role,
            "parts": [{ "text": message.content }],
        }));
    }

    if let Some(continuation) = continuation {
        append_continuation(&mut contents, continuation);
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": limits.effective_max_tokens(),
        },
    });

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
    }

    if let Some(tools) = tools
        && !tools.is_empty()
    {
        body["tools"] = json!([{
            "functionDeclarations": tools
                .iter()
                .map(|tool| json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }))
                .collect::<Vec<_>>(),
        }]);
    }

    if let Some(budget) = limits.thinking_budget {
        body["generationConfig"]["thinkingConfig"] = json!({
            "thinkingBudget": budget,
            "includeThoughts": true,
        });
    }

    body
}

/// Append the `functionCall`/`functionResponse` turn pair Gemini expects for
/// a continuation round. Gemini keys responses by function *name*, not call
/// id, so a result whose originating call can't be matched by id is still
/// sent keyed by its own recorded name - a documented approximation, same
/// spirit as the `finishReason` approximation above.
fn append_continuation(contents: &mut Vec<Value>, continuation: &Continuation<'_>) {
    let mut model_parts: Vec<Value> = Vec::new();
    if !continuation.assistant_text.is_empty() {
        model_parts.push(json!({ "text": continuation.assistant_text }));
    }
    for call in continuation.assistant_tool_calls {
        model_parts.push(json!({
            "functionCall": {
                "name": call.name,
                "args": call.input_json,
            },
        }));
    }
    contents.push(json!({ "role": "model", "parts": model_parts }));

    let name_by_id: std::collections::HashMap<&str, &str> = continuation
        .assistant_tool_calls
        .iter()
        .map(|call| (call.id.as_str(), call.name.as_str()))
        .collect();

    let mut user_parts: Vec<Value> = continuation
        .tool_results
        .iter()
        .map(|result| {
            let name = name_by_id.get(result.id.as_str()).copied().unwrap_or(result.id.as_str());
            json!({
                "functionResponse": {
                    "name": name,
                    "response": { "content": result.content },
                },
            })
        })
        .collect();
    for steering_text in continuation.steering_texts {
        user_parts.push(json!({ "text": steering_text }));
    }
    contents.push(json!({ "role": "user", "parts": user_parts }));
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Google's `finishReason=STOP` is treated as terminal the same as a text
/// stop; this is a known approximation documented in the design notes since
/// Google does not distinguish "stopped to call a tool" via finish reason
/// the way Claude and OpenAI do - tool calls are instead detected from the
/// presence of `functionCall` parts regardless of `finishReason`.
fn finish_reason_to_finish(reason: &str, saw_tool_call: bool) -> StreamFinishReason {
    if saw_tool_call {
        return StreamFinishReason::ToolUse;
    }
    match reason {
        "MAX_TOKENS" => StreamFinishReason::Length,
        "STOP" | "" => StreamFinishReason::Stop,
        _ => StreamFinishReason::Error,
    }
}

fn apply_json_value(json_text: &str, call_counter: &mut u32, tx: &mpsc::UnboundedSender<StreamEvent>) -> bool {
    let parsed: GenerateContentResponse = match serde_json::from_str(json_text) {
        Ok(parsed) => parsed,
        Err(err) => {
            let _ = tx.send(StreamEvent::ProtocolError(err.to_string()));
            return false;
        }
    };

    let mut saw_tool_call = false;
    let mut finish_reason = None;

    for candidate in parsed.candidates {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(function_call) = part.function_call {
                    saw_tool_call = true;
                    *call_counter += 1;
                    let _ = tx.send(StreamEvent::ToolCallFinalized(ToolCall {
                        id: format!("gemini-call-{call_counter}"),
                        name: function_call.name,
                        input_json: function_call.args,
                    }));
                } else if let Some(text) = part.text {
                    if part.thought {
                        let _ = tx.send(StreamEvent::ThinkingDelta(text));
                    } else {
                        let _ = tx.send(StreamEvent::TextDelta(text));
                    }
                }
            }
        }
        if let Some(reason) = candidate.finish_reason {
            finish_reason = Some(reason);
        }
    }

    if let Some(reason) = finish_reason {
        let _ = tx.send(StreamEvent::Done(finish_reason_to_finish(&reason, saw_tool_call)));
        return true;
    }
    if saw_tool_call {
        let _ = tx.send(StreamEvent::Done(StreamFinishReason::ToolUse));
        return true;
    }
    false
}

pub fn start(
    api_key: String,
    model: &ModelName,
    request_body: Value,
) -> Result<StreamingState, DriverError> {
    let url = api_url(model.model_id(), &api_key);
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let client = http_client();
        let retry_config = RetryConfig::default();
        let outcome = send_with_retry(
            || client.post(&url).header("content-type", "application/json").json(&request_body),
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
        let mut call_counter = 0u32;
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
            for json_text in drain_complete_json_values(&mut buffer) {
                if apply_json_value(&json_text, &mut call_counter, &tx) {
                    return;
                }
            }
        }
    });

    Ok(StreamingState::new(smithers_types::Provider::Gemini, rx, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_part_without_finish_reason_does_not_terminate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut counter = 0;
        let terminated = apply_json_value(
            r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#,
            &mut counter,
            &tx,
        );
        assert!(!terminated);
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::TextDelta("hi".to_string()));
    }

    #[test]
    fn function_call_part_finalizes_immediately_and_terminates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut counter = 0;
        let terminated = apply_json_value(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"read_file","args":{"path":"a.txt"}}}]},"finishReason":"STOP"}]}"#,
            &mut counter,
            &tx,
        );
        assert!(terminated);
        match rx.try_recv().unwrap() {
            StreamEvent::ToolCallFinalized(call) => {
                assert_eq!(call.name, "read_file");
                assert_eq!(call.input_json["path"], "a.txt");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Done(StreamFinishReason::ToolUse));
    }

    #[test]
    fn thought_part_maps_to_thinking_delta() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut counter = 0;
        apply_json_value(
            r#"{"candidates":[{"content":{"parts":[{"text":"pondering","thought":true}]}}]}"#,
            &mut counter,
            &tx,
        );
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::ThinkingDelta("pondering".to_string()));
    }
}
