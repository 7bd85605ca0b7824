//! Error formatting for transport-kind turn failures.
//!
//! Parses a raw provider error string into a user-facing message,
//! distinguishing auth failures (missing/invalid API key) from other
//! transport failures so the fix-it hint points at the right thing.

use serde_json::Value;
use smithers_types::Provider;

const STREAM_ERROR_BADGE: &str = "[Stream error]";

#[must_use]
pub fn split_api_error(raw: &str) -> Option<(String, String)> {
    let rest = raw.strip_prefix("API error ")?;
    let (status, body) = rest.split_once(": ")?;
    Some((status.trim().to_string(), body.trim().to_string()))
}

#[must_use]
pub fn extract_error_message(raw: &str) -> Option<String> {
    let body = split_api_error(raw).map_or_else(|| raw.trim().to_string(), |(_, body)| body);
    let payload: Value = serde_json::from_str(&body).ok()?;
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/message").and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .map(ToString::to_string)
}

#[must_use]
pub fn is_auth_error(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let mentions_key = lower.contains("api key") || lower.contains("x-api-key") || lower.contains("authorization");
    let auth_words = lower.contains("invalid")
        || lower.contains("incorrect")
        || lower.contains("missing")
        || lower.contains("unauthorized")
        || lower.contains("not provided")
        || lower.contains("authentication");
    let has_code = lower.contains("401");

    lower.contains("invalid_api_key")
        || lower.contains("you must provide an api key")
        || (mentions_key && auth_words)
        || (mentions_key && has_code)
        || (has_code && lower.contains("unauthorized"))
}

fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Formats a raw stream error into the system message appended when a
/// turn fails with a transport error.
#[must_use]
pub fn format_stream_error(provider: Provider, model: &str, err: &str) -> String {
    let trimmed = err.trim();
    let (status, body) = split_api_error(trimmed).unwrap_or_else(|| (String::new(), trimmed.to_string()));
    let extracted = extract_error_message(&body).unwrap_or_else(|| body.clone());
    let is_auth = is_auth_error(&extracted) || is_auth_error(trimmed) || is_auth_error(&status);

    if is_auth {
        let mut content = format!("{STREAM_ERROR_BADGE}\n\n{} authentication failed for model {model}.", provider.display_name());
        content.push_str(&format!("\n\nFix:\n- Set {} (env)\n- Then retry your message.", provider.env_var()));
        let detail = if status.trim().is_empty() {
            truncate_with_ellipsis(&extracted, 160)
        } else {
            status.trim().to_string()
        };
        if !detail.is_empty() {
            content.push_str("\n\nDetails: ");
            content.push_str(&detail);
        }
        return content;
    }

    let detail = if !extracted.trim().is_empty() {
        extracted.trim().to_string()
    } else if !trimmed.is_empty() {
        trimmed.to_string()
    } else {
        "unknown error".to_string()
    };
    let detail_short = truncate_with_ellipsis(&detail, 200);
    let mut content = String::from(STREAM_ERROR_BADGE);
    content.push_str("\n\n");
    if status.trim().is_empty() {
        content.push_str("Request failed.");
    } else {
        content.push_str(&format!("Request failed ({}).", status.trim()));
    }
    if !detail_short.is_empty() {
        content.push_str("\n\nDetails: ");
        content.push_str(&detail_short);
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_auth_error_from_status_code_and_keyword() {
        assert!(is_auth_error("API error 401: unauthorized, missing api key"));
        assert!(!is_auth_error("API error 500: internal server error"));
    }

    #[test]
    fn extracts_nested_error_message() {
        let raw = r#"API error 400: {"error": {"message": "model not found"}}"#;
        assert_eq!(extract_error_message(raw).as_deref(), Some("model not found"));
    }

    #[test]
    fn formats_auth_failure_with_fix_it_hint() {
        let message = format_stream_error(Provider::Claude, "claude-sonnet-4-20250514", "API error 401: invalid x-api-key provided");
        assert!(message.contains("ANTHROPIC_API_KEY"));
        assert!(message.contains("authentication failed"));
    }

    #[test]
    fn formats_generic_transport_failure_with_status() {
        let message = format_stream_error(Provider::OpenAI, "gpt-4o", "API error 500: internal server error");
        assert!(message.contains("Request failed (500)"));
    }

    #[test]
    fn falls_back_to_raw_text_when_unparseable() {
        let message = format_stream_error(Provider::Gemini, "gemini-pro", "connection reset by peer");
        assert!(message.contains("connection reset by peer"));
    }
}
