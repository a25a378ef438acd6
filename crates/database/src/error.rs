//! Database error types.

use thiserror::Error;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx error (connection, query, etc.)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An idempotency key was reused with a different request hash.
    #[error("idempotency key reused with different payload: {key}")]
    IdempotencyConflict { key: String },

    /// A stored JSON column failed to parse.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

impl DatabaseError {
    /// Whether the underlying failure is a unique-constraint violation,
    /// used to resolve concurrent first-submissions of the same key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
