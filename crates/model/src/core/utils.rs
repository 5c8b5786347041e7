use std::fmt::Write;

/// Escape CSV per PostgreSQL COPY CSV rules:
/// - field is wrapped in double quotes
/// - internal `"` becomes `""`
/// - commas, newlines, tabs are safe because quoting protects them
pub fn escape_csv_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');

    for ch in s.chars() {
        if ch == '"' {
            out.push('"'); // double the quote
        }
        out.push(ch);
    }

    out.push('"');
    out
}

pub fn encode_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + 2 * bytes.len());
    out.push_str("\\x");
    for b in bytes {
        write!(&mut out, "{:02x}", b).unwrap();
    }
    out
}

/// Truncate an error message before it is persisted to the execution log.
/// Keeps audit rows bounded without losing the leading context.
pub fn bounded_error_message(msg: &str, max_len: usize) -> String {
    if msg.len() <= max_len {
        return msg.to_string();
    }
    let mut cut = max_len;
    while !msg.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &msg[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escaping_doubles_quotes() {
        assert_eq!(escape_csv_string(r#"a"b"#), r#""a""b""#);
    }

    #[test]
    fn bounded_message_respects_char_boundaries() {
        let msg = "héllo world";
        let bounded = bounded_error_message(msg, 3);
        assert!(bounded.starts_with("hé") || bounded.starts_with("h"));
        assert!(bounded.ends_with('…'));
        assert_eq!(bounded_error_message("short", 64), "short");
    }
}
