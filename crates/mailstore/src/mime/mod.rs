//! In-memory MIME part tree
//!
//! The store consumes an already-parsed tree; this module is the shape of
//! that tree plus the header and encoding codecs needed to round-trip it
//! through the relational schema.

pub mod encoding;
pub mod headers;

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::error::Result;
use crate::flags::FlagSet;
pub use encoding::TransferEncoding;
pub use headers::{Headers, extract_message_id, extract_message_ids};

/// One node in the part tree
#[derive(Debug, Clone, Default)]
pub struct Part {
    pub headers: Headers,
    /// Opaque tag the fetch protocol uses to address this part on the
    /// server (e.g. an IMAP body section).
    pub server_extra: Option<String>,
    pub body: PartBody,
}

/// Where a part's payload lives in memory
#[derive(Debug, Clone, Default)]
pub enum PartBody {
    /// Body not available; only metadata was fetched.
    #[default]
    Missing,
    Leaf(LeafBody),
    Multipart(Multipart),
    Message(Box<Message>),
}

/// A non-container body in its transfer encoding
#[derive(Debug, Clone)]
pub struct LeafBody {
    /// Content-Transfer-Encoding label, lowercased
    pub encoding: String,
    pub data: BodyData,
}

#[derive(Debug, Clone)]
pub enum BodyData {
    Memory(Vec<u8>),
    /// Body spooled to a file, either a temp spool or an attachment file
    /// owned by the store.
    File(PathBuf),
}

/// A multipart container's own payload
#[derive(Debug, Clone, Default)]
pub struct Multipart {
    pub boundary: String,
    pub preamble: Option<Vec<u8>>,
    pub epilogue: Option<Vec<u8>>,
    pub parts: Vec<Part>,
}

/// A message: the root part of a tree plus store-level envelope state
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Server UID, or a locally generated one; `None` until assigned.
    pub uid: Option<String>,
    pub flags: FlagSet,
    /// Server-reported arrival time.
    pub internal_date: Option<DateTime<Utc>>,
    pub part: Part,
}

impl Part {
    pub fn new(headers: Headers) -> Self {
        Self {
            headers,
            server_extra: None,
            body: PartBody::Missing,
        }
    }

    /// MIME type from the Content-Type header, lowercased, without
    /// parameters. Defaults to `text/plain`.
    pub fn mime_type(&self) -> String {
        self.headers
            .get_unfolded("Content-Type")
            .and_then(|value| {
                value
                    .split(';')
                    .next()
                    .map(|t| t.trim().to_ascii_lowercase())
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    /// Content-ID without the surrounding angle brackets
    pub fn content_id(&self) -> Option<String> {
        self.headers.get_unfolded("Content-ID").map(|value| {
            value
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    }

    /// Content-Transfer-Encoding label, lowercased; `7bit` when absent
    pub fn transfer_encoding(&self) -> String {
        self.headers
            .get_unfolded("Content-Transfer-Encoding")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "7bit".to_string())
    }
}

impl LeafBody {
    pub fn in_memory(encoding: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            encoding: encoding.into(),
            data: BodyData::Memory(data),
        }
    }

    pub fn from_file(encoding: impl Into<String>, path: PathBuf) -> Self {
        Self {
            encoding: encoding.into(),
            data: BodyData::File(path),
        }
    }

    /// Encoded size of the body in bytes
    pub fn size(&self) -> Result<u64> {
        match &self.data {
            BodyData::Memory(data) => Ok(data.len() as u64),
            BodyData::File(path) => Ok(fs::metadata(path)?.len()),
        }
    }

    /// Read the encoded body bytes
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.data {
            BodyData::Memory(data) => Ok(data.clone()),
            BodyData::File(path) => Ok(fs::read(path)?),
        }
    }
}

impl Message {
    pub fn new(part: Part) -> Self {
        Self {
            uid: None,
            flags: FlagSet::new(),
            internal_date: None,
            part,
        }
    }

    pub fn subject(&self) -> Option<String> {
        self.part.headers.get_unfolded("Subject")
    }

    /// The Message-ID header's `<...>` token, if any
    pub fn message_id(&self) -> Option<String> {
        self.part
            .headers
            .get_first("Message-ID")
            .and_then(extract_message_id)
    }

    pub fn from_addresses(&self) -> Vec<Address> {
        self.address_list("From")
    }

    pub fn to_addresses(&self) -> Vec<Address> {
        self.address_list("To")
    }

    pub fn cc_addresses(&self) -> Vec<Address> {
        self.address_list("Cc")
    }

    pub fn bcc_addresses(&self) -> Vec<Address> {
        self.address_list("Bcc")
    }

    pub fn reply_to_addresses(&self) -> Vec<Address> {
        self.address_list("Reply-To")
    }

    /// Sent date from the Date header
    pub fn sent_date(&self) -> Option<DateTime<Utc>> {
        self.part
            .headers
            .get_unfolded("Date")
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn mime_type(&self) -> String {
        self.part.mime_type()
    }

    fn address_list(&self, name: &str) -> Vec<Address> {
        self.part
            .headers
            .get_unfolded(name)
            .map(|value| Address::parse_list(&value))
            .unwrap_or_default()
    }
}

/// `multipart/*`
pub fn is_multipart(mime_type: &str) -> bool {
    mime_type.len() >= 10 && mime_type[..10].eq_ignore_ascii_case("multipart/")
}

/// `message/rfc822`
pub fn is_message(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case("message/rfc822")
}

/// Fresh boundary string for generated multipart parts
pub fn generate_boundary() -> String {
    format!("----{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_headers(pairs: &[(&str, &str)]) -> Message {
        let mut headers = Headers::new();
        for (name, value) in pairs {
            headers.push(*name, *value);
        }
        Message::new(Part::new(headers))
    }

    #[test]
    fn test_mime_type_strips_parameters() {
        let msg = message_with_headers(&[(
            "Content-Type",
            "multipart/Mixed; boundary=\"abc\"",
        )]);
        assert_eq!(msg.mime_type(), "multipart/mixed");
        assert!(is_multipart(&msg.mime_type()));
    }

    #[test]
    fn test_mime_type_defaults_to_text_plain() {
        let msg = message_with_headers(&[]);
        assert_eq!(msg.mime_type(), "text/plain");
    }

    #[test]
    fn test_message_id_extraction() {
        let msg = message_with_headers(&[("Message-ID", " <one@example.com> ")]);
        assert_eq!(msg.message_id(), Some("<one@example.com>".to_string()));
    }

    #[test]
    fn test_address_accessors() {
        let msg = message_with_headers(&[
            ("From", "Alice <a@example.com>"),
            ("To", "b@example.com, Carol <c@example.com>"),
        ]);
        assert_eq!(msg.from_addresses().len(), 1);
        assert_eq!(msg.to_addresses().len(), 2);
        assert!(msg.cc_addresses().is_empty());
    }

    #[test]
    fn test_sent_date_parses_rfc2822() {
        let msg = message_with_headers(&[("Date", "Tue, 1 Jul 2003 10:52:37 +0200")]);
        assert!(msg.sent_date().is_some());
    }
}
