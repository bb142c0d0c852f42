//! Entity headers derived from file metadata: disposition, digest and type.

use axum::http::HeaderValue;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::channel::Checksum;
use crate::error::PoolHttpError;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Characters escaped in an RFC 5987 `ext-value`; everything but `attr-char`.
const EXT_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Metadata of the file behind a read session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Logical path, already percent-decoded.
    pub path: String,
    pub length: u64,
    pub checksums: Vec<Checksum>,
}

impl FileMetadata {
    /// The last path segment, used as the suggested download name.
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }
}

pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Percent-decodes a request path; `None` if the result is not UTF-8.
pub fn decode_path(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|path| path.into_owned())
}

/// How a filename is conveyed in `Content-Disposition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// `filename=<token>`
    Plain(String),
    /// `filename="<quoted-string>"`, with `"` and `\` escaped.
    Quoted(String),
    /// `filename*=UTF-8''<percent-encoded>`
    Extended(String),
}

impl Disposition {
    pub fn header_value(&self) -> String {
        match self {
            Disposition::Plain(name) => format!("attachment;filename={name}"),
            Disposition::Quoted(name) => format!("attachment;filename=\"{name}\""),
            Disposition::Extended(name) => format!("attachment;filename*=UTF-8''{name}"),
        }
    }
}

/// Picks the plain, quoted or extended form for `name`.
pub fn encode_disposition(name: &str) -> Disposition {
    if !name.chars().all(|c| matches!(c, ' '..='~')) {
        return Disposition::Extended(utf8_percent_encode(name, EXT_VALUE).to_string());
    }
    if !name.is_empty() && name.bytes().all(is_token_char) {
        return Disposition::Plain(name.to_string());
    }
    let mut quoted = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    Disposition::Quoted(quoted)
}

/// RFC 7230 `tchar`.
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!'
                | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// `Digest` value, `None` when no checksum is known.
pub fn digest(checksums: &[Checksum]) -> Option<String> {
    if checksums.is_empty() {
        return None;
    }
    let mut sorted: Vec<&Checksum> = checksums.iter().collect();
    sorted.sort_by_key(|checksum| checksum.kind);
    let value = sorted
        .iter()
        .map(|checksum| format!("{}={}", checksum.kind.name(), checksum.value))
        .collect::<Vec<_>>()
        .join(",");
    Some(value)
}

/// `Content-Type` of a whole or single-range body.
pub fn content_type(metadata: &FileMetadata, guess: bool) -> String {
    if guess {
        if let Some(mime) = mime_guess::from_path(metadata.file_name()).first() {
            return mime.essence_str().to_string();
        }
    }
    OCTET_STREAM.to_string()
}

/// `Content-Type` of a `multipart/byteranges` body.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/byteranges; boundary=\"{boundary}\"")
}

pub(crate) fn header_value(value: String) -> Result<HeaderValue, PoolHttpError> {
    HeaderValue::try_from(value).map_err(|e| PoolHttpError::InvalidHeader(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChecksumType;

    #[test]
    fn test_encode_disposition() {
        let tests = [
            ("file", Disposition::Plain("file".into()), "attachment;filename=file"),
            (
                "data.tar.gz",
                Disposition::Plain("data.tar.gz".into()),
                "attachment;filename=data.tar.gz",
            ),
            (
                "file?here",
                Disposition::Quoted("file?here".into()),
                "attachment;filename=\"file?here\"",
            ),
            ("my file", Disposition::Quoted("my file".into()), "attachment;filename=\"my file\""),
            (
                "file\\\"here",
                Disposition::Quoted("file\\\\\\\"here".into()),
                "attachment;filename=\"file\\\\\\\"here\"",
            ),
            (
                "\u{16A0}\u{16C7}\u{16BB}",
                Disposition::Extended("%E1%9A%A0%E1%9B%87%E1%9A%BB".into()),
                "attachment;filename*=UTF-8''%E1%9A%A0%E1%9B%87%E1%9A%BB",
            ),
            (
                "caf\u{e9} menu.txt",
                Disposition::Extended("caf%C3%A9%20menu.txt".into()),
                "attachment;filename*=UTF-8''caf%C3%A9%20menu.txt",
            ),
            ("", Disposition::Quoted("".into()), "attachment;filename=\"\""),
        ];

        for (i, (name, form, header)) in tests.iter().enumerate() {
            let encoded = encode_disposition(name);
            assert_eq!(*form, encoded, "Failed to encode #{i}: {name}");
            assert_eq!(*header, encoded.header_value(), "Failed header #{i}: {name}");
        }
    }

    #[test]
    fn extended_form_is_exclusive() {
        let value = encode_disposition("\u{16A0}\"x").header_value();
        assert!(value.contains("filename*="));
        assert!(!value.contains("filename="));
    }

    #[test]
    fn control_characters_use_extended_form() {
        assert_eq!(Disposition::Extended("a%0Ab".into()), encode_disposition("a\nb"));
    }

    #[test]
    fn file_names() {
        assert_eq!("file", file_name("/path/to/file"));
        assert_eq!("file?here", file_name("/path/to/file?here"));
        assert_eq!("dir", file_name("/path/dir/"));
        assert_eq!("", file_name("/"));
    }

    #[test]
    fn decodes_paths() {
        assert_eq!(Some("/path/to/file?here".to_string()), decode_path("/path/to/file%3Fhere"));
        assert_eq!(
            Some("/path/to/\u{16A0}\u{16C7}\u{16BB}".to_string()),
            decode_path("/path/to/%E1%9A%A0%E1%9B%87%E1%9A%BB")
        );
        assert_eq!(None, decode_path("/path/%FF"));
    }

    #[test]
    fn digest_values() {
        assert_eq!(None, digest(&[]));
        assert_eq!(
            Some("adler32=03da0195".to_string()),
            digest(&[Checksum::new(ChecksumType::Adler32, "03da0195")])
        );
        assert_eq!(
            Some("adler32=03da0195,md5=d41d8cd98f00b204e9800998ecf8427e".to_string()),
            digest(&[
                Checksum::new(ChecksumType::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
                Checksum::new(ChecksumType::Adler32, "03da0195"),
            ])
        );
    }

    #[test]
    fn content_types() {
        let metadata =
            FileMetadata { path: "/data/report.json".into(), length: 3, checksums: vec![] };
        assert_eq!(OCTET_STREAM, content_type(&metadata, false));
        assert_eq!("application/json", content_type(&metadata, true));

        let unknown = FileMetadata { path: "/data/blob".into(), length: 3, checksums: vec![] };
        assert_eq!(OCTET_STREAM, content_type(&unknown, true));

        assert_eq!(
            "multipart/byteranges; boundary=\"__AAAAAAAAAAAAAAAA__\"",
            multipart_content_type("__AAAAAAAAAAAAAAAA__")
        );
    }
}
