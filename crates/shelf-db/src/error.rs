//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("username already exists: {0}")]
    DuplicateUsername(String),

    #[error("identity is already linked to an account")]
    DuplicateIdentity,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DbError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateUsername(_) | Self::DuplicateIdentity)
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Returns the failing `table.column` if `err` is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn unique_violation(err: &rusqlite::Error) -> Option<&str> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            msg.strip_prefix("UNIQUE constraint failed: ")
        }
        _ => None,
    }
}
