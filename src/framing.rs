//! Status, headers and body layout of a read response.
//!
//! The framing is computed up front, before any byte of the body is produced,
//! so that `Content-Length` is known exactly even for `multipart/byteranges`
//! responses. The body itself is a sequence of [`BodyPart`]s which
//! [`crate::stream::FramedBody`] turns into bytes.

use std::fmt;

use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::error::PoolHttpError;
use crate::negotiate::{self, FileMetadata};
use crate::range::{ByteRange, RangeSet};

const CRLF: &str = "\r\n";
const BOUNDARY_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const BOUNDARY_CHARS: u32 = 16;

pub const DIGEST: HeaderName = HeaderName::from_static("digest");

/// Multipart boundary for a seed: `__` + 16 base32 characters + `__`.
///
/// Only the low 80 bits of the seed are used. Seed zero yields
/// `__AAAAAAAAAAAAAAAA__`.
pub fn boundary_from_seed(seed: u128) -> String {
    let mut boundary = String::with_capacity(BOUNDARY_CHARS as usize + 4);
    boundary.push_str("__");
    for i in (0..BOUNDARY_CHARS).rev() {
        let index = (seed >> (5 * i)) & 0x1f;
        boundary.push(BOUNDARY_ALPHABET[index as usize] as char);
    }
    boundary.push_str("__");
    boundary
}

/// Source of per-response multipart boundaries.
pub trait BoundaryGenerator: Send + Sync + fmt::Debug {
    fn next_boundary(&self) -> String;
}

/// Boundaries seeded from random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundaryGenerator for RandomBoundary {
    fn next_boundary(&self) -> String {
        boundary_from_seed(uuid::Uuid::new_v4().as_u128())
    }
}

/// The same boundary for every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBoundary(pub u128);

impl BoundaryGenerator for FixedBoundary {
    fn next_boundary(&self) -> String {
        boundary_from_seed(self.0)
    }
}

/// One piece of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    /// Multipart delimiter and part headers.
    Literal(Bytes),
    /// Bytes to be read from the session's channel.
    Read(ByteRange),
}

impl BodyPart {
    pub fn len(&self) -> u64 {
        match self {
            BodyPart::Literal(bytes) => bytes.len() as u64,
            BodyPart::Read(range) => range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Framing of a successful GET or HEAD response.
#[derive(Debug, Clone)]
pub struct ResponseFraming {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub parts: Vec<BodyPart>,
}

/// Options that shape the entity headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramingOptions {
    pub guess_content_type: bool,
}

impl ResponseFraming {
    /// Frames the response for `metadata`, optionally restricted to `ranges`.
    pub fn new(
        metadata: &FileMetadata,
        ranges: Option<&RangeSet>,
        boundaries: &dyn BoundaryGenerator,
        options: FramingOptions,
    ) -> Result<Self, PoolHttpError> {
        let total = metadata.length;
        let mut headers = HeaderMap::new();
        let (status, parts) = match ranges.map(RangeSet::as_slice) {
            None | Some([]) => {
                let disposition = negotiate::encode_disposition(metadata.file_name());
                headers.insert(
                    CONTENT_DISPOSITION,
                    negotiate::header_value(disposition.header_value())?,
                );
                headers.insert(CONTENT_TYPE, content_type(metadata, options)?);
                (StatusCode::OK, whole(total))
            }
            Some([range]) => {
                headers.insert(CONTENT_RANGE, negotiate::header_value(range.content_range(total))?);
                headers.insert(CONTENT_TYPE, content_type(metadata, options)?);
                (StatusCode::PARTIAL_CONTENT, vec![BodyPart::Read(*range)])
            }
            Some(ranges) => {
                let boundary = boundaries.next_boundary();
                let content_type = negotiate::multipart_content_type(&boundary);
                headers.insert(CONTENT_TYPE, negotiate::header_value(content_type)?);
                (StatusCode::PARTIAL_CONTENT, multipart(ranges, total, &boundary))
            }
        };

        if let Some(digest) = negotiate::digest(&metadata.checksums) {
            headers.insert(DIGEST, negotiate::header_value(digest)?);
        }
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let content_length: u64 = parts.iter().map(BodyPart::len).sum();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));

        Ok(ResponseFraming { status, headers, parts })
    }

    /// Exact length of the framed body.
    pub fn content_length(&self) -> u64 {
        self.parts.iter().map(BodyPart::len).sum()
    }

    /// The read instructions, in body order.
    pub fn reads(&self) -> impl Iterator<Item = &ByteRange> {
        self.parts.iter().filter_map(|part| match part {
            BodyPart::Read(range) => Some(range),
            BodyPart::Literal(_) => None,
        })
    }
}

fn content_type(
    metadata: &FileMetadata,
    options: FramingOptions,
) -> Result<HeaderValue, PoolHttpError> {
    negotiate::header_value(negotiate::content_type(metadata, options.guess_content_type))
}

fn whole(total: u64) -> Vec<BodyPart> {
    if total == 0 {
        Vec::new()
    } else {
        vec![BodyPart::Read(ByteRange::new(0, total))]
    }
}

/// Delimiter, part header and blank line precede every range; a closing
/// delimiter follows the last one.
fn multipart(ranges: &[ByteRange], total: u64, boundary: &str) -> Vec<BodyPart> {
    let mut parts = Vec::with_capacity(ranges.len() * 2 + 1);
    for range in ranges {
        let header = format!(
            "{CRLF}--{boundary}{CRLF}Content-Range: {}{CRLF}{CRLF}",
            range.content_range(total)
        );
        parts.push(BodyPart::Literal(Bytes::from(header)));
        parts.push(BodyPart::Read(*range));
    }
    parts.push(BodyPart::Literal(Bytes::from(format!("{CRLF}--{boundary}--{CRLF}"))));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Checksum, ChecksumType};

    fn metadata(length: u64) -> FileMetadata {
        FileMetadata { path: "/path/to/file".into(), length, checksums: vec![] }
    }

    fn frame(metadata: &FileMetadata, ranges: Option<&RangeSet>) -> ResponseFraming {
        ResponseFraming::new(metadata, ranges, &FixedBoundary(0), FramingOptions::default())
            .unwrap()
    }

    fn header<'a>(framing: &'a ResponseFraming, name: &str) -> Option<&'a str> {
        framing.headers.get(name).map(|v| v.to_str().unwrap())
    }

    fn literal(part: &BodyPart) -> &str {
        match part {
            BodyPart::Literal(bytes) => std::str::from_utf8(bytes).unwrap(),
            BodyPart::Read(range) => panic!("expected a literal part, found read of {range}"),
        }
    }

    #[test]
    fn boundary_seeds() {
        assert_eq!("__AAAAAAAAAAAAAAAA__", boundary_from_seed(0));
        assert_eq!("__AAAAAAAAAAAAAAAB__", boundary_from_seed(1));
        assert_eq!("__7777777777777777__", boundary_from_seed(u128::MAX));
        assert_eq!("__AAAAAAAAAAAAAAAA__", FixedBoundary(0).next_boundary());

        let random = RandomBoundary.next_boundary();
        assert_eq!(20, random.len());
        assert!(random.starts_with("__") && random.ends_with("__"));
    }

    #[test]
    fn test_full_response() {
        let framing = frame(&metadata(100), None);

        assert_eq!(StatusCode::OK, framing.status);
        assert_eq!(Some("100"), header(&framing, "Content-Length"));
        assert_eq!(Some("attachment;filename=file"), header(&framing, "Content-Disposition"));
        assert_eq!(Some("bytes"), header(&framing, "Accept-Ranges"));
        assert_eq!(Some("application/octet-stream"), header(&framing, "Content-Type"));
        assert_eq!(None, header(&framing, "Digest"));
        assert_eq!(None, header(&framing, "Content-Range"));
        assert_eq!(vec![BodyPart::Read(ByteRange::new(0, 100))], framing.parts);
    }

    #[test]
    fn test_empty_file() {
        let framing = frame(&metadata(0), None);
        assert_eq!(StatusCode::OK, framing.status);
        assert_eq!(Some("0"), header(&framing, "Content-Length"));
        assert!(framing.parts.is_empty());
    }

    #[test]
    fn test_single_range() {
        let mut metadata = metadata(1024);
        metadata.checksums.push(Checksum::new(ChecksumType::Adler32, "03da0195"));
        let ranges = RangeSet::parse("bytes=0-499", 1024).unwrap();
        let framing = frame(&metadata, Some(&ranges));

        assert_eq!(StatusCode::PARTIAL_CONTENT, framing.status);
        assert_eq!(Some("500"), header(&framing, "Content-Length"));
        assert_eq!(Some("bytes 0-499/1024"), header(&framing, "Content-Range"));
        assert_eq!(Some("adler32=03da0195"), header(&framing, "Digest"));
        assert_eq!(None, header(&framing, "Content-Disposition"));
        assert_eq!(vec![&ByteRange::new(0, 500)], framing.reads().collect::<Vec<_>>());
    }

    #[test]
    fn test_multiple_ranges() {
        let ranges = RangeSet::parse("bytes=0-0,-1", 1024).unwrap();
        let framing = frame(&metadata(1024), Some(&ranges));

        assert_eq!(StatusCode::PARTIAL_CONTENT, framing.status);
        assert_eq!(
            Some("multipart/byteranges; boundary=\"__AAAAAAAAAAAAAAAA__\""),
            header(&framing, "Content-Type")
        );
        assert_eq!(Some("154"), header(&framing, "Content-Length"));
        assert_eq!(154, framing.content_length());
        assert_eq!(None, header(&framing, "Content-Range"));
        assert_eq!(None, header(&framing, "Content-Disposition"));

        assert_eq!(5, framing.parts.len());
        assert_eq!(
            "\r\n--__AAAAAAAAAAAAAAAA__\r\nContent-Range: bytes 0-0/1024\r\n\r\n",
            literal(&framing.parts[0])
        );
        assert_eq!(BodyPart::Read(ByteRange::new(0, 1)), framing.parts[1]);
        assert_eq!(
            "\r\n--__AAAAAAAAAAAAAAAA__\r\nContent-Range: bytes 1023-1023/1024\r\n\r\n",
            literal(&framing.parts[2])
        );
        assert_eq!(BodyPart::Read(ByteRange::new(1023, 1024)), framing.parts[3]);
        assert_eq!("\r\n--__AAAAAAAAAAAAAAAA__--\r\n", literal(&framing.parts[4]));
    }

    #[test]
    fn multipart_length_is_sum_of_parts() {
        let headers = [
            "bytes=0-9,20-29,40-49",
            "bytes=5-,-5",
            "bytes=0-0,0-0,0-0,0-0",
            "bytes=1-2,900-5000",
        ];
        for header_value in headers {
            let ranges = RangeSet::parse(header_value, 1000).unwrap();
            let options = FramingOptions::default();
            let framing =
                ResponseFraming::new(&metadata(1000), Some(&ranges), &RandomBoundary, options)
                    .unwrap();
            let declared: u64 = header(&framing, "Content-Length").unwrap().parse().unwrap();
            let summed: u64 = framing.parts.iter().map(|p| p.len()).sum();
            assert_eq!(declared, summed, "range: {header_value}");
            assert_eq!(ranges.len(), framing.reads().count());
        }
    }
}
