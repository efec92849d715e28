//! Typed identifiers for the store's three id spaces
//!
//! Folder rows, message rows, message-part rows and thread nodes all use
//! their own counters. Keeping them as distinct types prevents a part id
//! from ever standing in for a thread-node id or vice versa.

use std::fmt;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

row_id!(
    /// Database id of a folder row.
    FolderId
);

row_id!(
    /// Database id of a message row (real or placeholder).
    MessageRowId
);

row_id!(
    /// Storage id of a message-part row; also names the attachment file
    /// for parts stored on disk.
    PartId
);

row_id!(
    /// Id of a thread-node row. Distinct from the message row it points
    /// at.
    ThreadNodeId
);
