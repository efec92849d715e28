//! Error taxonomy for the mail store

/// Errors surfaced by store operations.
///
/// Point lookups signal absence with `Ok(None)` rather than an error;
/// `FolderNotFound` is only raised when an operation requires an already
/// open folder that cannot be located.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("folder not found: {0}")]
    FolderNotFound(String),

    /// A part's parent is missing or of the wrong kind during tree
    /// reconstruction. Fatal; the stored tree must not be silently
    /// repaired.
    #[error("message part tree is corrupt: {0}")]
    StructuralIntegrity(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
