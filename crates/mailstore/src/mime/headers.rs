//! Header list <-> raw header bytes codec
//!
//! Header bytes are stored verbatim per part so a read reproduces exactly
//! what was saved. Folded continuation lines are kept inside the value.

use crate::error::{Result, StoreError};

/// One raw header line (name plus possibly folded value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered list of raw headers on a part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// All values for a header name, in document order.
    ///
    /// The returned values borrow from `self` only, not from `name`.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        let name = name.to_string();
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(&name))
            .map(|h| h.value.as_str())
    }

    /// First raw value for a header name
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// First value with folding whitespace collapsed to single spaces
    pub fn get_unfolded(&self, name: &str) -> Option<String> {
        self.get_first(name).map(unfold)
    }

    /// Serialize as raw header bytes, one `Name: value\r\n` line per entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for header in &self.0 {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Parse raw header bytes back into a header list.
    ///
    /// Continuation lines (leading space or tab) stay attached to the
    /// previous header's value so [`Headers::to_bytes`] round-trips.
    pub fn parse(bytes: &[u8]) -> Result<Headers> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| StoreError::InvalidValue("header bytes are not UTF-8".into()))?;

        let mut headers = Headers::new();
        for line in split_lines(text) {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                let Some(last) = headers.0.last_mut() else {
                    return Err(StoreError::InvalidValue(
                        "header continuation without a preceding header".into(),
                    ));
                };
                last.value.push_str("\r\n");
                last.value.push_str(line);
                continue;
            }
            let Some(colon) = line.find(':') else {
                return Err(StoreError::InvalidValue(format!(
                    "malformed header line: {line:?}"
                )));
            };
            let name = line[..colon].trim_end();
            let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
            headers.push(name, value);
        }
        Ok(headers)
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split("\r\n")
        .flat_map(|piece| piece.split('\n'))
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Collapse folding whitespace in a header value to single spaces.
pub fn unfold(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_fold = false;
    for c in value.chars() {
        match c {
            '\r' | '\n' => in_fold = true,
            ' ' | '\t' if in_fold => {}
            c => {
                if in_fold {
                    out.push(' ');
                    in_fold = false;
                }
                out.push(c);
            }
        }
    }
    out
}

/// Extract all `<...>` message-id tokens from a References-style value.
pub fn extract_message_ids(value: &str) -> Vec<String> {
    let unfolded = unfold(value);
    let mut ids = Vec::new();
    let mut rest = unfolded.as_str();
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        ids.push(rest[start..start + len + 1].to_string());
        rest = &rest[start + len + 1..];
    }
    ids
}

/// Extract the first `<...>` message-id token, if any.
pub fn extract_message_id(value: &str) -> Option<String> {
    extract_message_ids(value).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut headers = Headers::new();
        headers.push("Subject", "Hello");
        headers.push("From", "alice@example.com");
        let bytes = headers.to_bytes();
        let parsed = Headers::parse(&bytes).unwrap();
        assert_eq!(parsed, headers);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_folded_value_round_trip() {
        let raw = b"Subject: a very\r\n long subject\r\nTo: bob@example.com\r\n";
        let parsed = Headers::parse(raw).unwrap();
        assert_eq!(parsed.to_bytes(), raw.to_vec());
        assert_eq!(
            parsed.get_unfolded("Subject").unwrap(),
            "a very long subject"
        );
    }

    #[test]
    fn test_lookup_value_outlives_name() {
        let mut headers = Headers::new();
        headers.push("Subject", "kept");
        let value = {
            let name = String::from("subject");
            headers.get_first(&name)
        };
        assert_eq!(value, Some("kept"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.push("Message-ID", "<abc@example.com>");
        assert_eq!(headers.get_first("message-id"), Some("<abc@example.com>"));
    }

    #[test]
    fn test_extract_message_ids() {
        let ids = extract_message_ids("<a@x> <b@y>\r\n <c@z>");
        assert_eq!(ids, vec!["<a@x>", "<b@y>", "<c@z>"]);
        assert_eq!(extract_message_id("junk <a@x> more"), Some("<a@x>".into()));
        assert_eq!(extract_message_id("no ids here"), None);
    }
}
