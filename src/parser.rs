//! Server-Sent Events (SSE) field parser.

/// Structured result of parsing one event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    /// Last `id` field seen.
    pub id: Option<String>,
    /// Last `event` field seen. `None` means the default `"message"` type.
    pub event_type: Option<String>,
    /// All `data` fields, joined with `\n`.
    pub data: Option<String>,
    /// Last `retry` field that parsed as a non-negative integer, in milliseconds.
    pub retry: Option<u64>,
}

/// Whether a block should skip parsing entirely.
///
/// Comment blocks (starting with `:`) and blocks holding nothing but line
/// breaks produce no record.
pub fn is_ignorable(block: &str) -> bool {
    block.starts_with(':') || block.chars().all(|c| c == '\n' || c == '\r')
}

/// Parse one event block into an [`EventRecord`].
pub fn parse_block(block: &str) -> EventRecord {
    let mut record = EventRecord::default();

    // `\r\n` yields an extra empty line, which is skipped like any other.
    for line in block.split(['\r', '\n']) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (key, value) = split_field(line);
        match key {
            "id" => record.id = Some(value.to_string()),
            "event" => record.event_type = Some(value.to_string()),
            "data" => match &mut record.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => record.data = Some(value.to_string()),
            },
            "retry" => {
                if let Some(millis) = parse_retry(value) {
                    record.retry = Some(millis);
                }
            }
            _ => {}
        }
    }

    record
}

/// Split a field line on its first colon, dropping one leading space from the value.
///
/// A line without a colon is a field with an empty value.
fn split_field(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((key, value)) => (key, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    }
}

fn parse_retry(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_event() {
        let record = parse_block("data: hello world");
        assert_eq!(record.data.as_deref(), Some("hello world"));
        assert_eq!(record.id, None);
        assert_eq!(record.event_type, None);
        assert_eq!(record.retry, None);
    }

    #[test]
    fn test_multiple_data_lines_are_joined() {
        let record = parse_block("data: hello\ndata: world");
        assert_eq!(record.data.as_deref(), Some("hello\nworld"));
        assert_eq!(record.id, None);
        assert_eq!(record.event_type, None);
    }

    #[test]
    fn test_named_event_with_id() {
        let record = parse_block("event: update\nid: 5\ndata: x");
        assert_eq!(record.event_type.as_deref(), Some("update"));
        assert_eq!(record.id.as_deref(), Some("5"));
        assert_eq!(record.data.as_deref(), Some("x"));
    }

    #[test]
    fn test_last_value_wins_except_data() {
        let record = parse_block("id: 1\nevent: a\ndata: one\nid: 2\nevent: b\ndata: two");
        assert_eq!(record.id.as_deref(), Some("2"));
        assert_eq!(record.event_type.as_deref(), Some("b"));
        assert_eq!(record.data.as_deref(), Some("one\ntwo"));
    }

    #[test]
    fn test_crlf_and_cr_lines() {
        let record = parse_block("id: 7\r\ndata: a\rdata: b");
        assert_eq!(record.id.as_deref(), Some("7"));
        assert_eq!(record.data.as_deref(), Some("a\nb"));
    }

    #[test]
    fn test_only_one_leading_space_is_stripped() {
        assert_eq!(parse_block("data:no space").data.as_deref(), Some("no space"));
        assert_eq!(parse_block("data:  two").data.as_deref(), Some(" two"));
        assert_eq!(parse_block("data: a: b").data.as_deref(), Some("a: b"));
    }

    #[test]
    fn test_bare_key_is_present_but_empty() {
        let record = parse_block("data");
        assert_eq!(record.data.as_deref(), Some(""));

        let record = parse_block("data\ndata");
        assert_eq!(record.data.as_deref(), Some("\n"));

        let record = parse_block("id");
        assert_eq!(record.id.as_deref(), Some(""));
    }

    #[test]
    fn test_retry_field() {
        assert_eq!(parse_block("retry: 500").retry, Some(500));
        assert_eq!(parse_block("retry: 500\nretry: 250").retry, Some(250));
        assert_eq!(parse_block("retry: -5").retry, None);
        assert_eq!(parse_block("retry: 1.5").retry, None);
        assert_eq!(parse_block("retry: soon").retry, None);
        assert_eq!(parse_block("retry:").retry, None);
        assert_eq!(parse_block("retry: 100\nretry: bogus").retry, Some(100));
    }

    #[test]
    fn test_unknown_fields_and_comments_are_ignored() {
        let record = parse_block(": keep-alive\nfoo: bar\ndata: x\n:another");
        assert_eq!(
            record,
            EventRecord {
                data: Some("x".into()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_comment_lines_do_not_create_fields() {
        assert_eq!(parse_block(":data: nope"), EventRecord::default());
    }

    #[test]
    fn test_empty_interior_lines() {
        let record = parse_block("\n\ndata: x\n\n");
        assert_eq!(record.data.as_deref(), Some("x"));
    }

    #[test]
    fn test_is_ignorable() {
        assert!(is_ignorable(": ping"));
        assert!(is_ignorable(":"));
        assert!(is_ignorable(""));
        assert!(is_ignorable("\r\n"));
        assert!(!is_ignorable("data: x"));
        assert!(!is_ignorable("retry: 10"));
    }
}
