//! Transfer-encoding decoding for body size accounting
//!
//! The store records the decoded byte count of every leaf body. Decoding
//! here is only used for counting; stored body bytes stay in their
//! transfer encoding. A failed decode falls back to the encoded size so a
//! save never aborts over a bad body.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Recognized Content-Transfer-Encoding values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Parse a header value; unknown labels count as identity encodings.
    pub fn from_label(label: &str) -> TransferEncoding {
        match label.trim().to_ascii_lowercase().as_str() {
            "base64" => TransferEncoding::Base64,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            "8bit" => TransferEncoding::EightBit,
            "binary" => TransferEncoding::Binary,
            _ => TransferEncoding::SevenBit,
        }
    }
}

/// Count the decoded size of an in-memory body.
///
/// Falls back to `data.len()` when the data does not decode cleanly.
pub fn decoded_size(data: &[u8], encoding: &str) -> u64 {
    match TransferEncoding::from_label(encoding) {
        TransferEncoding::Base64 => {
            let stripped: Vec<u8> = data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match STANDARD.decode(&stripped) {
                Ok(decoded) => decoded.len() as u64,
                Err(_) => data.len() as u64,
            }
        }
        TransferEncoding::QuotedPrintable => decode_quoted_printable_len(data),
        _ => data.len() as u64,
    }
}

/// Count the decoded size of an on-disk body without pulling it into
/// memory, falling back to `fallback` when the file cannot be read or
/// the stream is malformed. Identity encodings never touch the file
/// since their decoded size is the encoded one.
pub fn decoded_size_of_file(path: &Path, encoding: &str, fallback: u64) -> u64 {
    let count = || -> io::Result<Option<u64>> {
        let file = fs::File::open(path)?;
        let mut reader = io::BufReader::new(file);
        match TransferEncoding::from_label(encoding) {
            TransferEncoding::Base64 => base64_stream_len(&mut reader),
            TransferEncoding::QuotedPrintable => {
                quoted_printable_stream_len(&mut reader).map(Some)
            }
            _ => Ok(Some(fallback)),
        }
    };
    match count() {
        Ok(Some(size)) => size,
        _ => fallback,
    }
}

/// Count the decoded length of a base64 stream from its symbol and
/// padding counts alone; `None` when the stream is not base64.
fn base64_stream_len(reader: &mut impl Read) -> io::Result<Option<u64>> {
    let mut symbols = 0u64;
    let mut padding = 0u64;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => symbols += 1,
                b'=' => padding += 1,
                _ if b.is_ascii_whitespace() => {}
                _ => return Ok(None),
            }
        }
    }
    let total = symbols + padding;
    if total % 4 != 0 || padding > 2 {
        return Ok(None);
    }
    Ok(Some(total / 4 * 3 - padding))
}

fn quoted_printable_stream_len(reader: &mut impl Read) -> io::Result<u64> {
    let mut counter = QuotedPrintableCounter::default();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            counter.push(b);
        }
    }
    Ok(counter.finish())
}

/// Lenient quoted-printable decode that only counts output bytes.
///
/// Soft line breaks vanish, `=XX` escapes become one byte, and anything
/// malformed passes through literally, so this never fails.
fn decode_quoted_printable_len(data: &[u8]) -> u64 {
    let mut counter = QuotedPrintableCounter::default();
    for &b in data {
        counter.push(b);
    }
    counter.finish()
}

/// Byte-at-a-time quoted-printable output counter.
///
/// Holds at most two bytes of an unresolved `=` escape across input
/// chunks so the same counter serves slices and streams.
#[derive(Default)]
struct QuotedPrintableCounter {
    count: u64,
    held: Vec<u8>,
}

impl QuotedPrintableCounter {
    fn push(&mut self, b: u8) {
        match self.held.as_slice() {
            [] => {
                if b == b'=' {
                    self.held.push(b);
                } else {
                    self.count += 1;
                }
            }
            [b'='] => match b {
                // Soft break "=\n"
                b'\n' => self.held.clear(),
                b'\r' => self.held.push(b),
                _ if b.is_ascii_hexdigit() => self.held.push(b),
                _ => self.pass_through(b),
            },
            [b'=', b'\r'] => {
                // Soft break "=\r\n"
                if b == b'\n' {
                    self.held.clear();
                } else {
                    self.pass_through(b);
                }
            }
            [b'=', _] => {
                if b.is_ascii_hexdigit() {
                    self.count += 1;
                    self.held.clear();
                } else {
                    self.pass_through(b);
                }
            }
            _ => unreachable!("held never exceeds two bytes"),
        }
    }

    /// Abandon the held escape as literal bytes and reprocess `b`.
    fn pass_through(&mut self, b: u8) {
        self.count += self.held.len() as u64;
        self.held.clear();
        self.push(b);
    }

    fn finish(mut self) -> u64 {
        self.count += self.held.len() as u64;
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decoded_size() {
        // "hello world" is 11 bytes
        assert_eq!(decoded_size(b"aGVsbG8gd29ybGQ=", "base64"), 11);
        // Line breaks inside the encoded stream are ignored
        assert_eq!(decoded_size(b"aGVsbG8g\r\nd29ybGQ=", "BASE64"), 11);
    }

    #[test]
    fn test_base64_failure_falls_back_to_encoded_size() {
        let garbage = b"!!!not base64!!!";
        assert_eq!(decoded_size(garbage, "base64"), garbage.len() as u64);
    }

    #[test]
    fn test_quoted_printable_decoded_size() {
        assert_eq!(decoded_size(b"caf=C3=A9", "quoted-printable"), 5);
        assert_eq!(decoded_size(b"line=\r\nbreak", "quoted-printable"), 9);
    }

    #[test]
    fn test_identity_encodings() {
        assert_eq!(decoded_size(b"plain", "7bit"), 5);
        assert_eq!(decoded_size(b"plain", "8bit"), 5);
        assert_eq!(decoded_size(b"plain", "something-unknown"), 5);
    }

    #[test]
    fn test_file_counting_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body");

        std::fs::write(&path, b"aGVsbG8g\r\nd29ybGQ=").unwrap();
        assert_eq!(decoded_size_of_file(&path, "base64", 99), 11);

        std::fs::write(&path, b"caf=C3=A9 line=\r\nbreak").unwrap();
        assert_eq!(decoded_size_of_file(&path, "quoted-printable", 99), 15);

        // Malformed base64 and missing files fall back
        std::fs::write(&path, b"!!!not base64!!!").unwrap();
        assert_eq!(decoded_size_of_file(&path, "base64", 99), 99);
        assert_eq!(
            decoded_size_of_file(&dir.path().join("absent"), "base64", 7),
            7
        );

        // Identity encodings report the caller's encoded size unchanged
        assert_eq!(decoded_size_of_file(&path, "7bit", 16), 16);
    }
}
