//! Parsing and validation of `Range: bytes=...` request headers.

use std::fmt;
use std::slice;

use axum_extra::headers::ContentRange;
use thiserror::Error;

const BYTES_UNIT: &str = "bytes";

/// Represents a single byte range with start and end positions (exclusive end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_exclusive: u64,
}

impl ByteRange {
    /// Create a new byte range with inclusive start and exclusive end.
    pub fn new(start: u64, end_exclusive: u64) -> Self {
        ByteRange { start, end_exclusive }
    }

    /// Create a byte range from the inclusive offsets used on the wire.
    pub fn inclusive(start: u64, end: u64) -> Self {
        ByteRange { start, end_exclusive: end + 1 }
    }

    pub fn len(&self) -> u64 {
        self.end_exclusive - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end_exclusive <= self.start
    }

    /// Inclusive offset of the last byte in the range.
    pub fn last(&self) -> u64 {
        self.end_exclusive - 1
    }

    /// The `Content-Range` value for this range of an entity of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.last(), total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.last())
    }
}

/// No specifier of the `Range` header selects any byte of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("range not satisfiable for entity of {length} bytes")]
pub struct RangeNotSatisfiable {
    pub length: u64,
}

impl RangeNotSatisfiable {
    /// The `Content-Range: bytes */length` header reporting the true entity length.
    pub fn content_range(&self) -> ContentRange {
        ContentRange::unsatisfied_bytes(self.length)
    }
}

/// The satisfiable ranges of a `Range` header, in the order they were requested.
///
/// Overlapping ranges are neither merged nor reordered. A `RangeSet` is never
/// empty: a header without a single satisfiable specifier is reported as
/// [`RangeNotSatisfiable`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Parses `header` against an entity of `length` bytes.
    ///
    /// Malformed specifiers are dropped one by one; out-of-bounds ends are
    /// clamped to the last byte of the entity.
    pub fn parse(header: &str, length: u64) -> Result<Self, RangeNotSatisfiable> {
        let unsatisfiable = RangeNotSatisfiable { length };

        let (unit, specifiers) = header.trim().split_once('=').ok_or(unsatisfiable)?;
        if !unit.trim().eq_ignore_ascii_case(BYTES_UNIT) {
            tracing::debug!(header, "range header with unsupported unit");
            return Err(unsatisfiable);
        }

        let ranges: Vec<ByteRange> = specifiers
            .split(',')
            .map(str::trim)
            .filter(|spec| !spec.is_empty())
            .filter_map(|spec| {
                let range = parse_specifier(spec, length);
                if range.is_none() {
                    tracing::debug!(spec, length, "dropping unsatisfiable range specifier");
                }
                range
            })
            .collect();

        if ranges.is_empty() {
            return Err(unsatisfiable);
        }
        Ok(RangeSet { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, ByteRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        &self.ranges
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = &'a ByteRange;
    type IntoIter = slice::Iter<'a, ByteRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Normalizes one `start-end`, `start-` or `-suffix` specifier.
fn parse_specifier(spec: &str, length: u64) -> Option<ByteRange> {
    if length == 0 {
        return None;
    }
    let last = length - 1;
    let (first, second) = spec.split_once('-')?;
    let (first, second) = (first.trim(), second.trim());

    if first.is_empty() {
        // last N bytes; a suffix longer than the entity selects all of it
        let suffix = parse_offset(second)?;
        if suffix == 0 {
            return None;
        }
        return Some(ByteRange::inclusive(length.saturating_sub(suffix), last));
    }

    let start = parse_offset(first)?;
    if start >= length {
        return None;
    }
    let end = if second.is_empty() {
        last
    } else {
        let end = parse_offset(second)?;
        if end < start {
            return None;
        }
        end.min(last)
    };
    Some(ByteRange::inclusive(start, end))
}

/// Only plain decimal digits; `u64::from_str` would also accept a leading `+`.
/// Offsets too large for a `u64` saturate, so they still clamp to the entity.
fn parse_offset(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(value.parse().unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ranges(header: &str, length: u64) -> Result<Vec<(u64, u64)>, RangeNotSatisfiable> {
        RangeSet::parse(header, length)
            .map(|set| set.iter().map(|r| (r.start, r.last())).collect())
    }

    #[test]
    fn test_parse_range_header() {
        let tests = [
            ("bytes=0-100", 200, Ok(vec![(0, 100)])),
            ("bytes=0-100,200-300", 500, Ok(vec![(0, 100), (200, 300)])),
            ("bytes=0-", 500, Ok(vec![(0, 499)])),
            ("bytes=-100", 500, Ok(vec![(400, 499)])),
            ("bytes=100-", 500, Ok(vec![(100, 499)])),
            ("bytes=-1", 500, Ok(vec![(499, 499)])),
            ("bytes=0-0", 500, Ok(vec![(0, 0)])),
            ("bytes=0-0,-1", 1024, Ok(vec![(0, 0), (1023, 1023)])),
            ("bytes=0-24646", 500, Ok(vec![(0, 499)])),
            ("bytes=-1000", 500, Ok(vec![(0, 499)])),
            ("bytes=0-99999999999999999999999", 100, Ok(vec![(0, 99)])),
            ("bytes=-99999999999999999999999", 100, Ok(vec![(0, 99)])),
            ("bytes=99999999999999999999999-", 100, Err(RangeNotSatisfiable { length: 100 })),
            ("bytes = 1-2 , 4-5", 10, Ok(vec![(1, 2), (4, 5)])),
            ("BYTES=1-2", 10, Ok(vec![(1, 2)])),
            ("bytes=1-2,,3-4", 10, Ok(vec![(1, 2), (3, 4)])),
            ("none", 500, Err(RangeNotSatisfiable { length: 500 })),
            ("bleets=100-324", 500, Err(RangeNotSatisfiable { length: 500 })),
            ("bytes=", 500, Err(RangeNotSatisfiable { length: 500 })),
        ];

        for (i, (header, length, expected)) in tests.iter().enumerate() {
            let result = ranges(header, *length);
            assert_eq!(result, *expected, "Failed to parse range header #{i}: {header}");
        }
    }

    #[test]
    fn keeps_request_order_and_overlaps() {
        assert_eq!(
            ranges("bytes=500-600,0-10,550-999", 1000),
            Ok(vec![(500, 600), (0, 10), (550, 999)])
        );
    }

    #[test]
    fn drops_malformed_specifiers_individually() {
        let tests = [
            "bytes=abc-4,2-3",
            "bytes=-5-3,2-3",
            "bytes=9-3,2-3",
            "bytes=7,2-3",
            "bytes=+1-4,2-3",
            "bytes=-0,2-3",
            "bytes=2000-,2-3",
        ];
        for header in tests {
            assert_eq!(ranges(header, 1000), Ok(vec![(2, 3)]), "header: {header}");
        }
    }

    #[test]
    fn start_beyond_entity_is_unsatisfiable() {
        assert_matches!(
            RangeSet::parse("bytes=1000-2000", 1000),
            Err(RangeNotSatisfiable { length: 1000 })
        );
        assert_matches!(
            RangeSet::parse("bytes=999-2000", 1000),
            Ok(set) if set.as_slice() == [ByteRange::new(999, 1000)]
        );
    }

    #[test]
    fn empty_entity_satisfies_nothing() {
        for header in ["bytes=0-0", "bytes=-1", "bytes=0-"] {
            assert_eq!(ranges(header, 0), Err(RangeNotSatisfiable { length: 0 }));
        }
    }

    #[test]
    fn clamps_every_end_to_the_entity() {
        for length in [1u64, 2, 17, 100, 1024] {
            for start in 0..length {
                for end in [start, start + 1, length - 1, length, length * 3] {
                    let header = format!("bytes={start}-{end}");
                    assert_eq!(
                        ranges(&header, length),
                        Ok(vec![(start, end.min(length - 1))]),
                        "header: {header}, length: {length}"
                    );
                }
            }
        }
    }

    #[test]
    fn content_range_values() {
        let range = ByteRange::inclusive(0, 499);
        assert_eq!(500, range.len());
        assert_eq!("bytes 0-499/1024", range.content_range(1024));
        assert_eq!("0-499", range.to_string());
        assert_eq!(
            ContentRange::unsatisfied_bytes(42),
            RangeNotSatisfiable { length: 42 }.content_range()
        );
    }
}
