//! IRCv3 message-tag value escaping.
//!
//! Tag values escape `; SPACE \ CR LF` per the message-tags specification.

/// Unescape a raw tag value.
///
/// Unknown escape sequences drop the backslash, matching the spec's
/// "strip the `\`" rule. A trailing lone backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

/// Escape a tag value for the wire.
pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_known_sequences() {
        assert_eq!(unescape_tag_value("a\\sb"), "a b");
        assert_eq!(unescape_tag_value("a\\:b"), "a;b");
        assert_eq!(unescape_tag_value("a\\\\b"), "a\\b");
        assert_eq!(unescape_tag_value("a\\rb\\nc"), "a\rb\nc");
    }

    #[test]
    fn test_unescape_unknown_drops_backslash() {
        assert_eq!(unescape_tag_value("a\\qb"), "aqb");
        assert_eq!(unescape_tag_value("trailing\\"), "trailing");
    }

    #[test]
    fn test_escape_round_trip() {
        let original = "a value; with\\everything\r\n";
        assert_eq!(unescape_tag_value(&escape_tag_value(original)), original);
    }
}
