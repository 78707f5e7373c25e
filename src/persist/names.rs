//! Index name sanitization.
//!
//! Index names are derived from field paths and record values, which may
//! contain characters that are unsafe in filenames on some platform. Each
//! reserved character is percent-escaped as its two-digit uppercase hex
//! byte value. The escaping is stable, so the same name always maps to the
//! same file; distinct names may collide and such collisions are accepted.

/// Characters that cannot appear in a cross-platform filename
fn reserved(ch: char) -> bool {
    matches!(
        ch,
        '%' | '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'
    ) || (ch as u32) < 0x20
}

/// Percent-escapes `name` into a safe filename stem.
///
/// Applied exactly once per name: registry keys are sanitized names and
/// file paths append the extension to the key without re-escaping.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii() && reserved(ch) {
            out.push_str(&format!("%{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(sanitize("type_post"), "type_post");
        assert_eq!(sanitize("value_content_type"), "value_content_type");
    }

    #[test]
    fn test_reserved_characters_are_escaped() {
        assert_eq!(sanitize("a/b"), "a%2Fb");
        assert_eq!(sanitize("a:b"), "a%3Ab");
        assert_eq!(sanitize("a?b*c"), "a%3Fb%2Ac");
        assert_eq!(sanitize("say \"hi\""), "say %22hi%22");
        assert_eq!(sanitize("back\\slash"), "back%5Cslash");
        assert_eq!(sanitize("<angle>"), "%3Cangle%3E");
        assert_eq!(sanitize("pipe|d"), "pipe%7Cd");
    }

    #[test]
    fn test_percent_itself_is_escaped() {
        assert_eq!(sanitize("100%"), "100%25");
    }

    #[test]
    fn test_control_bytes_are_escaped() {
        assert_eq!(sanitize("a\tb"), "a%09b");
        assert_eq!(sanitize("a\nb"), "a%0Ab");
    }

    #[test]
    fn test_non_ascii_passes_through_intact() {
        assert_eq!(sanitize("type_héllo"), "type_héllo");
        assert_eq!(sanitize("авторы"), "авторы");
    }

    #[test]
    fn test_same_input_same_output() {
        let name = "value_content_type_post/reply";
        assert_eq!(sanitize(name), sanitize(name));
    }
}
