//! Output truncation policy: tail-truncation for command-style
//! output (the interesting part is usually the end), head-truncation for
//! file reads (the interesting part is usually the start). Both record the
//! original size in a marker so the model knows content was dropped.

/// Keep the last `limit` bytes of `content`, on a char boundary, prefixed
/// with a marker noting the original size.
#[must_use]
pub fn truncate_tail(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }
    let original_len = content.len();
    let mut start = content.len() - limit;
    while !content.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated {original_len} bytes, showing tail]\n{}", &content[start..])
}

/// Keep the first `limit` bytes of `content`, on a char boundary, suffixed
/// with a marker noting the original size.
#[must_use]
pub fn truncate_head(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }
    let original_len = content.len();
    let mut end = limit;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {original_len} bytes, showing head]", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_content_untouched() {
        assert_eq!(truncate_tail("short", 100), "short");
    }

    #[test]
    fn tail_keeps_only_the_end() {
        let content = "a".repeat(50) + "END";
        let result = truncate_tail(&content, 10);
        assert!(result.ends_with("END"));
        assert!(result.contains("truncated 53 bytes"));
    }

    #[test]
    fn head_keeps_only_the_start() {
        let content = "START".to_string() + &"b".repeat(50);
        let result = truncate_head(&content, 10);
        assert!(result.starts_with("START"));
        assert!(result.contains("truncated 55 bytes"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let content = "€".repeat(20);
        let result = truncate_tail(&content, 5);
        assert!(String::from_utf8(result.clone().into_bytes()).is_ok());
        let _ = result;
    }
}
