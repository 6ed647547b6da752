use rusqlite::Connection;
use tracing::info;

use crate::DbResult;

pub fn run(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                hashedIdentityKey TEXT NOT NULL UNIQUE,
                avatarUrl       TEXT,
                memberSince     DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                username    TEXT NOT NULL,
                timestamp   DATETIME NOT NULL,
                likes       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS likes (
                userId  INTEGER NOT NULL,
                postId  INTEGER NOT NULL,
                PRIMARY KEY (userId, postId)
            );

            CREATE TABLE IF NOT EXISTS post_cover_images (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                title           TEXT UNIQUE,
                coverImageUrl   TEXT
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (listing indexes)");
        conn.execute_batch(
            "
            CREATE INDEX IF NOT EXISTS idx_posts_timestamp ON posts(timestamp);
            CREATE INDEX IF NOT EXISTS idx_posts_username ON posts(username);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (session revocation)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS revoked_sessions (
                sessionId   TEXT PRIMARY KEY,
                expiresAt   INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
