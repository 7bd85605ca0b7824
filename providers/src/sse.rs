//! Byte-safe stream reassembly shared by the Claude and OpenAI drivers.
//!
//! Neither driver may assume a read chunk ends on a record boundary; events are drained from a growing buffer
//! only once a full `\n\n`/`\r\n\r\n`-terminated block has arrived.

/// Maximum buffered bytes before a driver gives up on a malformed or
/// malicious stream.
pub const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Drain one complete SSE event (sans trailing blank line) from `buffer`,
/// if a full one has arrived.
pub fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Extract the concatenated `data:` payload from a raw SSE event block.
/// Returns `None` if the event carries no `data:` line (e.g. a bare
/// `event:` or comment line).
#[must_use]
pub fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }
            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    found.then_some(data)
}

/// Extract the `event:` name from a raw SSE event block, if present.
#[must_use]
pub fn extract_sse_event_name(event: &str) -> Option<&str> {
    event
        .lines()
        .find_map(|line| line.strip_suffix('\r').unwrap_or(line).strip_prefix("event: "))
}

/// Drain zero or more complete top-level JSON values from a brace-matching
/// buffer, used by the Gemini driver whose `alt=sse` stream wraps complete
/// JSON objects rather than `data:`-prefixed lines.
///
/// Tracks brace depth while skipping over string literals (including
/// escaped quotes) so braces inside string content are not mistaken for
/// structural braces.
pub fn drain_complete_json_values(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut drained = Vec::new();

    loop {
        let text = String::from_utf8_lossy(buffer);
        let Some(start) = text.find(|c: char| c == '{' || c == '[') else {
            break;
        };

        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (idx, ch) in text[start..].char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '{' | '[' => depth += 1,
                '}' | ']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + idx + ch.len_utf8());
                        break;
                    }
                }
                _ => {}
            }
        }

        let Some(end) = end else { break };
        drained.push(text[start..end].to_string());
        let consumed = end;
        drop(text);
        buffer.drain(..consumed);
    }

    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_sse_event_split_across_reads() {
        let mut buffer = b"data: hel".to_vec();
        assert!(drain_next_sse_event(&mut buffer).is_none());
        buffer.extend_from_slice(b"lo\n\n");
        let event = drain_next_sse_event(&mut buffer).expect("complete event");
        assert_eq!(extract_sse_data(&String::from_utf8(event).unwrap()).as_deref(), Some("hello"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn extracts_multiline_data() {
        let event = "data: line one\ndata: line two\n";
        assert_eq!(extract_sse_data(event).as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn brace_matching_ignores_braces_in_strings() {
        let mut buffer = br#"{"a": "}{"} extra"#.to_vec();
        let values = drain_complete_json_values(&mut buffer);
        assert_eq!(values, vec![r#"{"a": "}{"}"#.to_string()]);
    }

    #[test]
    fn brace_matching_waits_for_complete_value() {
        let mut buffer = b"{\"a\": 1".to_vec();
        assert!(drain_complete_json_values(&mut buffer).is_empty());
        buffer.extend_from_slice(b"}");
        assert_eq!(drain_complete_json_values(&mut buffer), vec!["{\"a\": 1}".to_string()]);
    }
}
