use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EyeDbError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into EyeDbError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Schema mismatch: expected column \"{column}\" not found in {table}")]
    SchemaMismatch { table: String, column: String },

    #[error("Table \"{0}\" already exists; remove or rename it before migrating")]
    ArtifactExists(String),

    #[error("{kind} \"{name}\" depends on {table}; drop it before migrating and recreate it afterwards")]
    DependentObject {
        table: String,
        kind: String,
        name: String,
    },

    #[error("Row count mismatch: copied {actual} rows but source has {expected}")]
    RowCountMismatch { expected: i64, actual: i64 },

    #[error("Transaction rolled back: {0}")]
    TransactionFailure(#[source] Box<EyeDbError>),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
