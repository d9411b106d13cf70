//! Offset codec: parse/format/compare/advance over the `segment_position`
//! cursor token, plus the two sentinels (`-1`, `now`).

use std::cmp::Ordering;
use std::fmt;

/// An ordered position in a stream.
///
/// `At(segment, position)` is the only variant ever stored alongside a
/// message; `Beginning`/`Now` only ever appear as the caller-supplied side of
/// a read request and are resolved away before any comparison against stored
/// offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Sentinel `-1`: from the beginning of the stream.
    Beginning,
    /// Sentinel `now`: from the current tail, resolved by the store at use time.
    Now,
    /// A concrete `segment_position` token.
    At(u64, u64),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OffsetError {
    #[error("invalid offset: {0}")]
    Invalid(String),
}

impl Offset {
    pub const fn sentinel_begin() -> Offset {
        Offset::Beginning
    }

    pub const fn sentinel_now() -> Offset {
        Offset::Now
    }

    pub const fn zero() -> Offset {
        Offset::At(0, 0)
    }

    /// Parse a wire-format offset string.
    ///
    /// Accepts `-1`, `now`, or `segment_position` where both fields are
    /// non-negative decimal integers with no leading zeros (the digit `0`
    /// itself is the only exception).
    pub fn parse(s: &str) -> Result<Offset, OffsetError> {
        if s == "-1" {
            return Ok(Offset::Beginning);
        }
        if s == "now" {
            return Ok(Offset::Now);
        }
        let (seg, pos) = s
            .split_once('_')
            .ok_or_else(|| OffsetError::Invalid(s.to_string()))?;
        let segment = parse_unsigned_field(seg).ok_or_else(|| OffsetError::Invalid(s.to_string()))?;
        let position = parse_unsigned_field(pos).ok_or_else(|| OffsetError::Invalid(s.to_string()))?;
        Ok(Offset::At(segment, position))
    }

    pub fn format(&self) -> String {
        match self {
            Offset::Beginning => "-1".to_string(),
            Offset::Now => "now".to_string(),
            Offset::At(seg, pos) => format!("{}_{}", seg, pos),
        }
    }

    pub fn is_beginning(&self) -> bool {
        matches!(self, Offset::Beginning)
    }

    pub fn is_now(&self) -> bool {
        matches!(self, Offset::Now)
    }

    /// Advance a concrete offset by `byte_count` within its current segment.
    ///
    /// Panics if called on a sentinel; callers resolve sentinels to a
    /// concrete offset before ever advancing one.
    pub fn advance(&self, byte_count: u64) -> Offset {
        match self {
            Offset::At(seg, pos) => Offset::At(*seg, pos + byte_count),
            _ => panic!("advance() called on a sentinel offset"),
        }
    }

    /// Start of the next segment (position resets to 0).
    pub fn next_segment(&self) -> Offset {
        match self {
            Offset::At(seg, _) => Offset::At(seg + 1, 0),
            _ => panic!("next_segment() called on a sentinel offset"),
        }
    }

    pub fn segment(&self) -> Option<u64> {
        match self {
            Offset::At(seg, _) => Some(*seg),
            _ => None,
        }
    }
}

fn parse_unsigned_field(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Compare two concrete offsets lexicographically-by-field: segment first,
/// then position. Comparisons against a sentinel are not meaningful and are
/// rejected by `partial_cmp` (`None`).
pub fn compare(a: &Offset, b: &Offset) -> Option<Ordering> {
    match (a, b) {
        (Offset::At(sa, pa), Offset::At(sb, pb)) => Some((sa, pa).cmp(&(sb, pb))),
        (Offset::Beginning, Offset::Beginning) => Some(Ordering::Equal),
        (Offset::Beginning, Offset::At(..)) => Some(Ordering::Less),
        (Offset::At(..), Offset::Beginning) => Some(Ordering::Greater),
        _ => None,
    }
}

impl PartialOrd for Offset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        compare(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sentinels() {
        assert_eq!(Offset::parse("-1").unwrap(), Offset::Beginning);
        assert_eq!(Offset::parse("now").unwrap(), Offset::Now);
    }

    #[test]
    fn parses_segment_position() {
        assert_eq!(Offset::parse("0_0").unwrap(), Offset::At(0, 0));
        assert_eq!(Offset::parse("3_1024").unwrap(), Offset::At(3, 1024));
    }

    #[test]
    fn rejects_leading_zeros() {
        assert!(Offset::parse("0_01").is_err());
        assert!(Offset::parse("01_0").is_err());
        assert_eq!(Offset::parse("0_0").unwrap(), Offset::At(0, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Offset::parse("abc").is_err());
        assert!(Offset::parse("1_2_3").is_err());
        assert!(Offset::parse("-2").is_err());
        assert!(Offset::parse("1_-2").is_err());
        assert!(Offset::parse("").is_err());
    }

    #[test]
    fn format_round_trips() {
        for s in ["-1", "now", "0_0", "12_9999"] {
            assert_eq!(Offset::parse(s).unwrap().format(), s);
        }
    }

    #[test]
    fn numeric_comparison_not_string_comparison() {
        // "9" < "10" numerically, which would be backwards under a raw
        // string compare.
        let a = Offset::At(0, 9);
        let b = Offset::At(0, 10);
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn compares_across_segments() {
        let a = Offset::At(0, 999_999);
        let b = Offset::At(1, 0);
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn advance_and_next_segment() {
        let o = Offset::At(0, 10);
        assert_eq!(o.advance(5), Offset::At(0, 15));
        assert_eq!(o.next_segment(), Offset::At(1, 0));
    }
}
