//! Email address model and the packed list serialization used in columns

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Address (e.g., "john@example.com")
    pub email: String,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"');
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Parse a comma-separated address list header value
    pub fn parse_list(s: &str) -> Vec<Address> {
        // Commas inside quoted display names are rare enough that the
        // original stores whatever the parser hands it; we split on
        // commas outside angle brackets.
        let mut result = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, c) in s.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    let piece = s[start..i].trim();
                    if !piece.is_empty() {
                        result.push(Address::parse(piece));
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        let piece = s[start..].trim();
        if !piece.is_empty() {
            result.push(Address::parse(piece));
        }
        result
    }

    /// Format the address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Serialize an address list into its canonical packed column form.
///
/// An empty list packs to `None` so the column stays NULL, matching the
/// unpacked representation of a missing header.
pub fn pack(addresses: &[Address]) -> Option<String> {
    if addresses.is_empty() {
        return None;
    }
    // serde_json never fails on this shape
    Some(serde_json::to_string(addresses).expect("address list serialization"))
}

/// Reverse of [`pack`]; `None` and empty strings unpack to an empty list.
pub fn unpack(packed: Option<&str>) -> Result<Vec<Address>> {
    match packed {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| crate::error::StoreError::InvalidValue(format!("address list: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_name() {
        let addr = Address::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, Some("John Doe".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_bare() {
        let addr = Address::parse("john@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_list() {
        let list = Address::parse_list("Alice <a@example.com>, b@example.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, Some("Alice".to_string()));
        assert_eq!(list[1].email, "b@example.com");
    }

    #[test]
    fn test_pack_round_trip() {
        let list = vec![
            Address::with_name("Alice", "a@example.com"),
            Address::new("b@example.com"),
        ];
        let packed = pack(&list).unwrap();
        let unpacked = unpack(Some(&packed)).unwrap();
        assert_eq!(unpacked, list);
    }

    #[test]
    fn test_pack_empty_is_null() {
        assert_eq!(pack(&[]), None);
        assert_eq!(unpack(None).unwrap(), Vec::<Address>::new());
    }
}
