//! Glob matching for webhook subscription patterns: `/`-delimited segments
//! with `*` (one segment) and `**` (zero or more segments) wildcards.
//! `%2A`/`%2a` in a literal segment decodes to a real `*` character rather
//! than being treated as a wildcard.

pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<String> = pattern.split('/').map(decode_segment).collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn decode_segment(segment: &str) -> String {
    segment.replace("%2A", "*").replace("%2a", "*")
}

fn match_segments(pattern: &[String], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(seg) if seg == "**" => {
            if match_segments(&pattern[1..], path) {
                return true;
            }
            if !path.is_empty() && match_segments(pattern, &path[1..]) {
                return true;
            }
            false
        }
        Some(seg) => {
            let Some((head, rest)) = path.split_first() else { return false };
            let segment_matches = seg == "*" || seg == *head;
            segment_matches && match_segments(&pattern[1..], rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_segments_match_exactly() {
        assert!(matches("/s/a", "/s/a"));
        assert!(!matches("/s/a", "/s/b"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(matches("/s/*", "/s/a"));
        assert!(!matches("/s/*", "/s/a/b"));
    }

    #[test]
    fn double_star_matches_zero_or_more_segments() {
        assert!(matches("/s/**", "/s"));
        assert!(matches("/s/**", "/s/a"));
        assert!(matches("/s/**", "/s/a/b/c"));
    }

    #[test]
    fn percent_encoded_star_is_literal() {
        assert!(matches("/s/%2A", "/s/*"));
        assert!(!matches("/s/%2A", "/s/a"));
    }

    #[test]
    fn double_star_in_the_middle_spans_any_depth() {
        assert!(matches("/s/**/end", "/s/end"));
        assert!(matches("/s/**/end", "/s/a/b/end"));
        assert!(!matches("/s/**/end", "/s/a/b"));
    }
}
