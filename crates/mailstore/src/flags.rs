//! Message flags and their column representation
//!
//! Five flags double as boolean columns for cheap filtering; everything
//! else lives in the serialized `flags` column only.

use std::collections::BTreeSet;

/// A single message flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flag {
    Seen,
    Deleted,
    Flagged,
    Answered,
    Forwarded,
    /// Full body has been downloaded from the server.
    DownloadedFull,
    /// Only part of the body has been downloaded.
    DownloadedPartial,
}

impl Flag {
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Seen => "SEEN",
            Flag::Deleted => "DELETED",
            Flag::Flagged => "FLAGGED",
            Flag::Answered => "ANSWERED",
            Flag::Forwarded => "FORWARDED",
            Flag::DownloadedFull => "X_DOWNLOADED_FULL",
            Flag::DownloadedPartial => "X_DOWNLOADED_PARTIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Flag> {
        match s {
            "SEEN" => Some(Flag::Seen),
            "DELETED" => Some(Flag::Deleted),
            "FLAGGED" => Some(Flag::Flagged),
            "ANSWERED" => Some(Flag::Answered),
            "FORWARDED" => Some(Flag::Forwarded),
            "X_DOWNLOADED_FULL" => Some(Flag::DownloadedFull),
            "X_DOWNLOADED_PARTIAL" => Some(Flag::DownloadedPartial),
            _ => None,
        }
    }

    /// Flags that are stored as their own boolean column and therefore
    /// excluded from the serialized `flags` column.
    fn has_column(self) -> bool {
        matches!(
            self,
            Flag::Seen | Flag::Deleted | Flag::Flagged | Flag::Answered | Flag::Forwarded
        )
    }
}

/// Ordered set of flags on a message
pub type FlagSet = BTreeSet<Flag>;

/// Serialize the non-column flags as a comma-joined token list.
pub fn serialize_flags(flags: &FlagSet) -> String {
    let tokens: Vec<&str> = flags
        .iter()
        .filter(|flag| !flag.has_column())
        .map(|flag| flag.as_str())
        .collect();
    tokens.join(",")
}

/// Rebuild a flag set from the serialized column plus the boolean columns.
///
/// Unknown tokens are dropped; old databases may contain flags this
/// version no longer knows.
pub fn deserialize_flags(
    serialized: Option<&str>,
    deleted: bool,
    seen: bool,
    flagged: bool,
    answered: bool,
    forwarded: bool,
) -> FlagSet {
    let mut flags = FlagSet::new();
    if let Some(serialized) = serialized {
        for token in serialized.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(flag) = Flag::parse(token) {
                flags.insert(flag);
            }
        }
    }
    if deleted {
        flags.insert(Flag::Deleted);
    }
    if seen {
        flags.insert(Flag::Seen);
    }
    if flagged {
        flags.insert(Flag::Flagged);
    }
    if answered {
        flags.insert(Flag::Answered);
    }
    if forwarded {
        flags.insert(Flag::Forwarded);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_flags_excluded_from_serialized_form() {
        let mut flags = FlagSet::new();
        flags.insert(Flag::Seen);
        flags.insert(Flag::DownloadedFull);
        assert_eq!(serialize_flags(&flags), "X_DOWNLOADED_FULL");
    }

    #[test]
    fn test_deserialize_merges_columns() {
        let flags = deserialize_flags(
            Some("X_DOWNLOADED_FULL"),
            false,
            true,
            true,
            false,
            false,
        );
        assert!(flags.contains(&Flag::Seen));
        assert!(flags.contains(&Flag::Flagged));
        assert!(flags.contains(&Flag::DownloadedFull));
        assert!(!flags.contains(&Flag::Deleted));
    }

    #[test]
    fn test_unknown_tokens_dropped() {
        let flags = deserialize_flags(Some("BOGUS,ANSWERED"), false, false, false, false, false);
        assert_eq!(flags.len(), 1);
        assert!(flags.contains(&Flag::Answered));
    }
}
