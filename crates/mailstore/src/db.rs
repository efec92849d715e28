//! SQLite database handle, schema migrations and attachment directory

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use rusqlite_migration::{M, Migrations};

use crate::error::Result;
use crate::ids::PartId;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE folders (
                id INTEGER PRIMARY KEY,
                name TEXT,
                server_id TEXT UNIQUE,
                local_only INTEGER NOT NULL DEFAULT 0,
                type TEXT NOT NULL DEFAULT 'regular',
                visible_limit INTEGER NOT NULL DEFAULT 25,
                status TEXT,
                last_updated INTEGER NOT NULL DEFAULT 0,
                top_group INTEGER NOT NULL DEFAULT 0,
                integrate INTEGER NOT NULL DEFAULT 0,
                display_class TEXT,
                poll_class TEXT,
                push_class TEXT,
                notify_class TEXT,
                more_messages TEXT NOT NULL DEFAULT 'unknown'
            );

            -- Message rows; empty = 1 marks thread placeholders that carry
            -- no content of their own.
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY,
                folder_id INTEGER NOT NULL,
                uid TEXT,
                subject TEXT,
                date INTEGER,
                internal_date INTEGER,
                flags TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                read INTEGER NOT NULL DEFAULT 0,
                flagged INTEGER NOT NULL DEFAULT 0,
                answered INTEGER NOT NULL DEFAULT 0,
                forwarded INTEGER NOT NULL DEFAULT 0,
                sender_list TEXT,
                to_list TEXT,
                cc_list TEXT,
                bcc_list TEXT,
                reply_to_list TEXT,
                attachment_count INTEGER NOT NULL DEFAULT 0,
                message_id TEXT,
                message_part_id INTEGER,
                mime_type TEXT,
                empty INTEGER NOT NULL DEFAULT 0,
                encryption_type TEXT,
                preview_type TEXT NOT NULL DEFAULT 'none',
                preview TEXT
            );

            CREATE INDEX idx_messages_folder ON messages(folder_id, date);
            CREATE INDEX idx_messages_uid ON messages(uid, folder_id);
            CREATE INDEX idx_messages_message_id ON messages(folder_id, message_id);

            -- One row per part-tree node. 'root' points at the tree's top
            -- node for every row including the top node itself.
            CREATE TABLE message_parts (
                id INTEGER PRIMARY KEY,
                root INTEGER,
                parent INTEGER NOT NULL DEFAULT -1,
                seq INTEGER NOT NULL DEFAULT 0,
                mime_type TEXT,
                header BLOB,
                data_location INTEGER NOT NULL DEFAULT 0,
                decoded_body_size INTEGER,
                display_name TEXT,
                encoding TEXT,
                charset TEXT,
                data BLOB,
                preamble BLOB,
                epilogue BLOB,
                boundary TEXT,
                content_id TEXT,
                server_extra TEXT
            );

            CREATE INDEX idx_message_parts_root ON message_parts(root);

            CREATE TRIGGER set_message_part_root
            AFTER INSERT ON message_parts
            BEGIN
                UPDATE message_parts SET root = id
                WHERE root IS NULL AND ROWID = NEW.ROWID;
            END;

            -- Thread forest; ids here are thread-node ids, distinct from
            -- the message rows they reference.
            CREATE TABLE threads (
                id INTEGER PRIMARY KEY,
                message_id INTEGER NOT NULL,
                root INTEGER,
                parent INTEGER
            );

            CREATE INDEX idx_threads_message ON threads(message_id);
            CREATE INDEX idx_threads_root ON threads(root);
            CREATE INDEX idx_threads_parent ON threads(parent);

            CREATE VIRTUAL TABLE messages_fulltext USING fts4(fulltext);
            "#,
        ),
    ])
}

/// Shared database handle
///
/// A single connection behind a mutex gives the single-effective-writer
/// discipline: mutating sequences hold the lock for their whole
/// transaction, readers take it per statement batch.
pub struct Database {
    conn: Mutex<Connection>,
    attachment_dir: PathBuf,
}

impl Database {
    /// Open (creating if necessary) the database and attachment directory.
    pub fn open(db_path: impl AsRef<Path>, attachment_dir: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())?;

        // WAL keeps readers unblocked during writes; NORMAL sync is safe
        // with WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations().to_latest(&mut conn)?;

        let attachment_dir = attachment_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&attachment_dir)?;
        std::fs::create_dir_all(attachment_dir.join("tmp"))?;

        Ok(Self {
            conn: Mutex::new(conn),
            attachment_dir,
        })
    }

    /// Run read-only work against the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a unit of work inside one all-or-nothing transaction.
    ///
    /// Commits when the closure returns `Ok`; any error rolls the whole
    /// transaction back and propagates.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// The attachment file owned by the given part
    pub fn attachment_file(&self, part_id: PartId) -> PathBuf {
        self.attachment_dir.join(part_id.to_string())
    }

    /// Directory for spooling large bodies before they move into place
    pub fn spool_dir(&self) -> PathBuf {
        self.attachment_dir.join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::tempdir;

    fn open_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("mail.test.sqlite"), dir.path().join("att")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_migrations_apply() {
        let (db, _dir) = open_test_db();
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'messages'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (db, _dir) = open_test_db();

        let result: Result<()> = db.with_transaction(|tx| {
            tx.execute("INSERT INTO folders (server_id, name) VALUES ('f1', 'one')", [])?;
            Err(StoreError::InvalidValue("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM folders", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_root_backfill_trigger() {
        let (db, _dir) = open_test_db();
        let id: i64 = db
            .with_transaction(|tx| {
                tx.execute("INSERT INTO message_parts (parent, seq) VALUES (-1, 0)", [])?;
                Ok(tx.last_insert_rowid())
            })
            .unwrap();
        let root: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT root FROM message_parts WHERE id = ?",
                    [id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(root, id);
    }
}
