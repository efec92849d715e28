//! Local on-device mail store
//!
//! Persists parsed MIME messages into SQLite, reconstructs conversation
//! threads from reference headers, and manages message bodies that live
//! inline in the database or on disk as attachment files.
//!
//! The entry point is [`LocalStore`]; per-folder operations hang off
//! [`Folder`] handles obtained from it:
//!
//! ```no_run
//! use mailstore::LocalStore;
//!
//! # fn main() -> mailstore::Result<()> {
//! let store = LocalStore::open("mail.sqlite", "attachments")?;
//! store.create_folder("INBOX", "Inbox")?;
//! let inbox = store.folder("INBOX");
//! println!("{} messages", inbox.message_count()?);
//! # Ok(())
//! # }
//! ```

pub mod address;
mod codec;
mod db;
pub mod error;
pub mod extract;
pub mod flags;
pub mod folder;
pub mod ids;
mod message;
pub mod mime;
mod store;
pub mod threading;

pub use codec::MAX_BODY_SIZE_FOR_DATABASE;
pub use error::{Result, StoreError};
pub use flags::{Flag, FlagSet};
pub use folder::{Folder, FolderClass, FolderDetails, FolderType, LOCAL_UID_PREFIX, MoreMessages};
pub use ids::{FolderId, MessageRowId, PartId, ThreadNodeId};
pub use message::{MessageEntry, StoredMessage, ThreadPlacement};
pub use store::LocalStore;
