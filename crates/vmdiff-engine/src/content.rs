//! Byte-exact file content extraction and formatting

use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use vmdiff_core::{absolute_guest_path, Error, GuestSession, Result};

/// How many bytes to keep and where to stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentLimits {
    /// Keep at most this many bytes (`None` = unlimited)
    pub read: Option<usize>,

    /// Truncate before the first occurrence of this sequence (empty = no stop)
    pub stop: Vec<u8>,
}

impl ContentLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Limits from the `read = -1` convention: any negative value is unlimited
    pub fn from_read(read: i64, stop: impl Into<Vec<u8>>) -> Self {
        Self {
            read: usize::try_from(read).ok(),
            stop: stop.into(),
        }
    }
}

/// Stop-trim, then clamp to the read limit
pub fn apply_limits(mut data: Vec<u8>, limits: &ContentLimits) -> Vec<u8> {
    if !limits.stop.is_empty() {
        if let Some(pos) = data
            .windows(limits.stop.len())
            .position(|window| window == limits.stop.as_slice())
        {
            data.truncate(pos);
        }
    }

    if let Some(read) = limits.read {
        data.truncate(read);
    }

    data
}

/// Extracted file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Binary(Vec<u8>),
    Text(String),
}

impl Content {
    /// Decode bytes as UTF-8, replacing malformed sequences
    pub fn text(bytes: &[u8]) -> Self {
        let (text, had_errors) = encoding_rs::UTF_8.decode_without_bom_handling(bytes);
        if had_errors {
            debug!("content is not valid UTF-8; replaced malformed sequences");
        }
        Content::Text(text.into_owned())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Binary(bytes) => bytes,
            Content::Text(text) => text.as_bytes(),
        }
    }
}

/// Encodings offered for extracted bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Hex,
    Bits,
}

impl ContentFormat {
    pub fn render(&self, bytes: &[u8]) -> String {
        match self {
            ContentFormat::Hex => format_hex(bytes),
            ContentFormat::Bits => format_bits(bytes),
        }
    }
}

impl FromStr for ContentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hex" => Ok(ContentFormat::Hex),
            "bits" => Ok(ContentFormat::Bits),
            other => Err(Error::format(format!(
                "Unknown content format {:?} (expected \"hex\" or \"bits\")",
                other
            ))),
        }
    }
}

/// Uppercase hex pairs separated by single spaces
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Eight `0`/`1` characters per byte, most significant bit first
pub fn format_bits(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8);
    for byte in bytes {
        let _ = write!(out, "{:08b}", byte);
    }
    out
}

/// Inverse of [`format_hex`]; whitespace between pairs is ignored
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    hex::decode(compact).map_err(|e| Error::format(format!("Invalid hex string: {}", e)))
}

/// Fetch a guest file through a unique scratch file and apply `limits`
///
/// The scratch file lives in `scratch_dir` (or the system temp dir) and is
/// removed on every exit path.
pub fn extract(
    guest: &mut dyn GuestSession,
    name: &str,
    limits: &ContentLimits,
    scratch_dir: Option<&Path>,
) -> Result<Vec<u8>> {
    let path = absolute_guest_path(name);

    let scratch = match scratch_dir {
        Some(dir) => tempfile::Builder::new().prefix("vmdiff-").tempfile_in(dir)?,
        None => tempfile::Builder::new().prefix("vmdiff-").tempfile()?,
    };

    guest.download(&path, scratch.path())?;
    let data = std::fs::read(scratch.path())?;
    debug!("extracted {} bytes from {}", data.len(), path);

    Ok(apply_limits(data, limits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_before_read() {
        let limits = ContentLimits::from_read(5, "X");
        assert_eq!(apply_limits(b"abcXdef".to_vec(), &limits), b"abc");

        let limits = ContentLimits::from_read(3, "");
        assert_eq!(apply_limits(b"abcXdef".to_vec(), &limits), b"abc");
    }

    #[test]
    fn test_limits_edge_cases() {
        let data = b"a\0b\0c".to_vec();
        assert_eq!(apply_limits(data.clone(), &ContentLimits::unlimited()), data);
        assert_eq!(apply_limits(data.clone(), &ContentLimits::from_read(-1, "\0")), b"a");
        assert_eq!(apply_limits(data.clone(), &ContentLimits::from_read(100, "zz")), data);
        assert!(apply_limits(data, &ContentLimits::from_read(0, "")).is_empty());
        assert!(apply_limits(b"ab".to_vec(), &ContentLimits::from_read(-1, "abc")) == b"ab");
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(b"hi"), "68 69");
        assert_eq!(format_hex(&[0x00, 0xAB, 0xff]), "00 AB FF");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_format_bits() {
        assert_eq!(format_bits(b"hi"), "0110100001101001");
        assert_eq!(format_bits(&[0x01, 0x80]), "0000000110000000");
        assert_eq!(format_bits(&[]), "");
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("68 69").unwrap(), b"hi");
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
        assert!(matches!(decode_hex("6"), Err(Error::Format(_))));
    }

    #[test]
    fn test_content_format_parse() {
        assert_eq!("hex".parse::<ContentFormat>().unwrap(), ContentFormat::Hex);
        assert_eq!("bits".parse::<ContentFormat>().unwrap(), ContentFormat::Bits);
        assert!(matches!("base64".parse::<ContentFormat>(), Err(Error::Format(_))));
        assert_eq!(ContentFormat::Hex.render(b"hi"), "68 69");
    }

    #[test]
    fn test_text_is_lossy() {
        assert_eq!(Content::text(b"hi"), Content::Text("hi".to_string()));
        assert_eq!(
            Content::text(&[0x68, 0xff]),
            Content::Text("h\u{FFFD}".to_string())
        );
        assert_eq!(Content::Binary(vec![0, 1]).as_bytes(), &[0, 1]);
    }
}
