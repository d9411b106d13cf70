//! Splits a top-level JSON array into its element byte spans without
//! deserializing (and thereby reformatting) the elements themselves.
//!
//! Flattening a JSON-array append into N separate messages must preserve
//! each element's original bytes exactly, so this walks brackets and string
//! state rather than going through `serde_json::Value`.

/// `body` must already be known to start with `[` after whitespace-trimming.
/// Returns `None` on malformed input (unterminated string, unbalanced
/// brackets, trailing garbage after the closing `]`).
pub fn split_top_level_elements(body: &[u8]) -> Option<Vec<&[u8]>> {
    debug_assert_eq!(body.first(), Some(&b'['));
    let close = body.len() - 1;
    if body[close] != b']' {
        return None;
    }
    let inner = &body[1..close];

    let mut elements = Vec::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0usize;
    let mut saw_any = false;

    for (i, &b) in inner.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                elements.push(trim(&inner[start..i]));
                start = i + 1;
                saw_any = true;
            }
            _ => {}
        }
        if depth < 0 {
            return None;
        }
    }
    if in_string || depth != 0 {
        return None;
    }

    let last = trim(&inner[start..]);
    if !last.is_empty() {
        elements.push(last);
    } else if saw_any {
        // trailing comma with nothing after it
        return None;
    }

    Some(elements)
}

fn trim(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(b.len());
    let end = b.iter().rposition(|c| !c.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    &b[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_array() {
        let els = split_top_level_elements(br#"[1,2,3]"#).unwrap();
        assert_eq!(els, vec![b"1".as_ref(), b"2".as_ref(), b"3".as_ref()]);
    }

    #[test]
    fn preserves_original_whitespace_inside_elements() {
        let els = split_top_level_elements(br#"[{"a": 1},  {"b":2}]"#).unwrap();
        assert_eq!(els[0], br#"{"a": 1}"#.as_ref());
        assert_eq!(els[1], br#"{"b":2}"#.as_ref());
    }

    #[test]
    fn ignores_commas_inside_strings_and_nested_structures() {
        let els = split_top_level_elements(br#"["a,b", [1,2], {"x": [3,4]}]"#).unwrap();
        assert_eq!(els.len(), 3);
        assert_eq!(els[0], br#""a,b""#.as_ref());
        assert_eq!(els[1], br#"[1,2]"#.as_ref());
        assert_eq!(els[2], br#"{"x": [3,4]}"#.as_ref());
    }

    #[test]
    fn empty_array_yields_no_elements() {
        let els = split_top_level_elements(b"[]").unwrap();
        assert!(els.is_empty());
    }

    #[test]
    fn whitespace_only_array_yields_no_elements() {
        let els = split_top_level_elements(b"[   ]").unwrap();
        assert!(els.is_empty());
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        assert!(split_top_level_elements(b"[1,2").is_none());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(split_top_level_elements(br#"["a]"#).is_none());
    }

    #[test]
    fn rejects_trailing_comma() {
        assert!(split_top_level_elements(b"[1,2,]").is_none());
    }

    #[test]
    fn escaped_quote_does_not_end_string_early() {
        let els = split_top_level_elements(br#"["a\"b", 1]"#).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[0], br#""a\"b""#.as_ref());
    }
}
