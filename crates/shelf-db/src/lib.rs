pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use error::{DbError, DbResult};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// The site's single persistent store. Constructed once at startup and shared
/// with request handlers by reference; every statement runs under one
/// connection lock, and multi-step invariants additionally run inside an
/// `IMMEDIATE` transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.conn.lock().map_err(|e| DbError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| DbError::LockPoisoned(e.to_string()))?;
        f(&mut conn)
    }
}

/// Format a timestamp for storage. Fixed precision and a `Z` suffix keep
/// lexical order identical to chronological order, which `ORDER BY` relies on.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
