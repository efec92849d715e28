//! Collaborator seams for content extraction
//!
//! Preview, full-text and attachment-count computation and encryption
//! classification happen outside this crate; the store only consumes
//! their results at save time. `BasicExtractor` is a plain-text-only
//! implementation good enough for local use and the tests.

use crate::mime::{BodyData, Message, Part, PartBody};

/// Preview computed for a message at save time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    /// No previewable content.
    None,
    Text(String),
    /// Content was encrypted; no plaintext preview exists.
    Encrypted,
    /// Extraction failed.
    Error,
}

impl Preview {
    /// Column token for the preview kind
    pub fn kind_token(&self) -> &'static str {
        match self {
            Preview::None => "none",
            Preview::Text(_) => "text",
            Preview::Encrypted => "encrypted",
            Preview::Error => "error",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Preview::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Rebuild from the stored kind token plus text column.
    pub fn from_columns(kind: &str, text: Option<String>) -> Preview {
        match kind {
            "text" => Preview::Text(text.unwrap_or_default()),
            "encrypted" => Preview::Encrypted,
            "error" => Preview::Error,
            _ => Preview::None,
        }
    }
}

/// Attachment metadata for parts whose body was not fetched
#[derive(Debug, Clone, Default)]
pub struct AttachmentInfo {
    pub display_name: Option<String>,
    pub size: Option<u64>,
}

/// Preview / full-text / attachment-count computation trio
pub trait MessageExtractor: Send + Sync {
    fn preview(&self, message: &Message) -> Preview;

    /// Plain text for the full-text index; `None` suppresses the index
    /// row entirely.
    fn fulltext(&self, message: &Message) -> Option<String>;

    fn attachment_count(&self, message: &Message) -> u32;

    /// Display metadata for a part stored without its body
    fn attachment_info(&self, part: &Part) -> AttachmentInfo;
}

/// Everything the save path needs when a message is recognized as an
/// encryption envelope.
#[derive(Debug, Clone)]
pub struct EncryptionResult {
    pub encryption_type: String,
    pub preview: Preview,
    pub attachment_count: u32,
    pub fulltext: Option<String>,
}

/// Classifier for already-recognized encryption envelopes
pub trait EncryptionDetector: Send + Sync {
    /// `Some` when the message is an encryption envelope; the result then
    /// replaces the extractor trio's output wholesale.
    fn classify(&self, message: &Message) -> Option<EncryptionResult>;
}

/// Detector that never recognizes anything
pub struct NoEncryptionDetector;

impl EncryptionDetector for NoEncryptionDetector {
    fn classify(&self, _message: &Message) -> Option<EncryptionResult> {
        None
    }
}

const PREVIEW_MAX_CHARS: usize = 512;

/// Plain-text extractor: first in-memory `text/*` leaf wins.
pub struct BasicExtractor;

impl BasicExtractor {
    fn first_text(&self, message: &Message) -> Option<String> {
        let mut stack = vec![&message.part];
        while let Some(part) = stack.pop() {
            match &part.body {
                PartBody::Leaf(leaf) => {
                    if part.mime_type().starts_with("text/")
                        && let BodyData::Memory(data) = &leaf.data
                    {
                        return Some(String::from_utf8_lossy(data).into_owned());
                    }
                }
                PartBody::Multipart(multipart) => {
                    // reversed so document order wins on pop
                    stack.extend(multipart.parts.iter().rev());
                }
                PartBody::Message(inner) => stack.push(&inner.part),
                PartBody::Missing => {}
            }
        }
        None
    }
}

impl MessageExtractor for BasicExtractor {
    fn preview(&self, message: &Message) -> Preview {
        match self.first_text(message) {
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Preview::None;
                }
                let preview: String = trimmed.chars().take(PREVIEW_MAX_CHARS).collect();
                Preview::Text(preview)
            }
            None => Preview::None,
        }
    }

    fn fulltext(&self, message: &Message) -> Option<String> {
        self.first_text(message).filter(|text| !text.trim().is_empty())
    }

    fn attachment_count(&self, message: &Message) -> u32 {
        let mut count = 0;
        let mut stack = vec![&message.part];
        while let Some(part) = stack.pop() {
            match &part.body {
                PartBody::Multipart(multipart) => stack.extend(multipart.parts.iter()),
                PartBody::Message(inner) => stack.push(&inner.part),
                PartBody::Leaf(_) | PartBody::Missing => {
                    if is_attachment(part) {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    fn attachment_info(&self, part: &Part) -> AttachmentInfo {
        let disposition = part.headers.get_unfolded("Content-Disposition");
        let display_name = disposition
            .as_deref()
            .and_then(|value| header_parameter(value, "filename"))
            .or_else(|| {
                part.headers
                    .get_unfolded("Content-Type")
                    .as_deref()
                    .and_then(|value| header_parameter(value, "name"))
            });
        let size = disposition
            .as_deref()
            .and_then(|value| header_parameter(value, "size"))
            .and_then(|value| value.parse().ok());
        AttachmentInfo { display_name, size }
    }
}

fn is_attachment(part: &Part) -> bool {
    part.headers
        .get_unfolded("Content-Disposition")
        .map(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|token| token.trim().eq_ignore_ascii_case("attachment"))
        })
        .unwrap_or(false)
}

/// Pull a `name=value` parameter out of a structured header value.
fn header_parameter(value: &str, name: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|piece| {
        let (key, val) = piece.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(val.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::{Headers, LeafBody, Multipart};

    fn text_part(text: &str) -> Part {
        let mut headers = Headers::new();
        headers.push("Content-Type", "text/plain");
        let mut part = Part::new(headers);
        part.body = PartBody::Leaf(LeafBody::in_memory("7bit", text.as_bytes().to_vec()));
        part
    }

    fn attachment_part(filename: &str) -> Part {
        let mut headers = Headers::new();
        headers.push("Content-Type", "application/octet-stream");
        headers.push(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\"; size=1234"),
        );
        Part::new(headers)
    }

    fn multipart_message(parts: Vec<Part>) -> Message {
        let mut headers = Headers::new();
        headers.push("Content-Type", "multipart/mixed; boundary=\"b\"");
        let mut root = Part::new(headers);
        root.body = PartBody::Multipart(Multipart {
            boundary: "b".into(),
            preamble: None,
            epilogue: None,
            parts,
        });
        Message::new(root)
    }

    #[test]
    fn test_preview_takes_first_text_part() {
        let message = multipart_message(vec![text_part("hello world"), text_part("second")]);
        assert_eq!(
            BasicExtractor.preview(&message),
            Preview::Text("hello world".into())
        );
    }

    #[test]
    fn test_attachment_count_and_info() {
        let message = multipart_message(vec![text_part("body"), attachment_part("report.pdf")]);
        assert_eq!(BasicExtractor.attachment_count(&message), 1);

        let info = BasicExtractor.attachment_info(&attachment_part("report.pdf"));
        assert_eq!(info.display_name, Some("report.pdf".into()));
        assert_eq!(info.size, Some(1234));
    }

    #[test]
    fn test_no_fulltext_for_empty_body() {
        let message = multipart_message(vec![text_part("   ")]);
        assert_eq!(BasicExtractor.fulltext(&message), None);
        assert_eq!(BasicExtractor.preview(&message), Preview::None);
    }

    #[test]
    fn test_preview_kind_tokens() {
        assert_eq!(Preview::None.kind_token(), "none");
        assert_eq!(Preview::Text("x".into()).kind_token(), "text");
        assert_eq!(
            Preview::from_columns("text", Some("x".into())),
            Preview::Text("x".into())
        );
    }
}
