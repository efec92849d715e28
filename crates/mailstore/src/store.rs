//! Store root: database handle plus the extraction collaborators
//!
//! One `LocalStore` owns one SQLite database and one attachment
//! directory. Folder handles borrow it to run their operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use crate::db::Database;
use crate::error::Result;
use crate::extract::{BasicExtractor, EncryptionDetector, MessageExtractor, NoEncryptionDetector};
use crate::folder::Folder;
use crate::ids::{FolderId, PartId};

#[derive(Clone)]
pub struct LocalStore {
    pub(crate) db: Arc<Database>,
    pub(crate) extractor: Arc<dyn MessageExtractor>,
    pub(crate) encryption: Arc<dyn EncryptionDetector>,
}

impl LocalStore {
    /// Open a store with the default plain-text extractor and no
    /// encryption detection.
    pub fn open(db_path: impl AsRef<Path>, attachment_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_extractors(
            db_path,
            attachment_dir,
            Arc::new(BasicExtractor),
            Arc::new(NoEncryptionDetector),
        )
    }

    /// Open a store with caller-provided extraction collaborators.
    pub fn with_extractors(
        db_path: impl AsRef<Path>,
        attachment_dir: impl AsRef<Path>,
        extractor: Arc<dyn MessageExtractor>,
        encryption: Arc<dyn EncryptionDetector>,
    ) -> Result<Self> {
        let db = Database::open(db_path, attachment_dir)?;
        Ok(Self {
            db: Arc::new(db),
            extractor,
            encryption,
        })
    }

    /// Create a folder row; returns its id. The server id must be unique
    /// across the store.
    pub fn create_folder(&self, server_id: &str, name: &str) -> Result<FolderId> {
        self.db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO folders (server_id, name) VALUES (?, ?)",
                params![server_id, name],
            )?;
            Ok(FolderId(tx.last_insert_rowid()))
        })
    }

    /// Folder handle addressed by server id. Metadata loads lazily on
    /// first use; a missing folder surfaces then.
    pub fn folder(&self, server_id: &str) -> Folder {
        Folder::by_server_id(self.clone(), server_id)
    }

    /// Folder handle addressed by database id.
    pub fn folder_by_id(&self, id: FolderId) -> Folder {
        Folder::by_id(self.clone(), id)
    }

    /// Server ids of all folders, in name order.
    pub fn folder_server_ids(&self) -> Result<Vec<String>> {
        self.db.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT server_id FROM folders WHERE server_id IS NOT NULL ORDER BY name")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    /// Look up the folder containing a message row with the given uid.
    pub fn folder_id_for_uid(&self, uid: &str) -> Result<Option<FolderId>> {
        self.db.with_connection(|conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT folder_id FROM messages WHERE uid = ? LIMIT 1",
                    [uid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.map(FolderId))
        })
    }

    /// The file holding an on-disk part body.
    pub fn attachment_file(&self, part_id: PartId) -> PathBuf {
        self.db.attachment_file(part_id)
    }
}
