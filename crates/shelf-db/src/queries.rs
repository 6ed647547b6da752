use crate::error::unique_violation;
use crate::models::{AccountRow, DeleteOutcome, LikeOutcome, PostRow};
use crate::{Database, DbError, DbResult};
use rusqlite::types::ToSql;
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

const ACCOUNT_COLUMNS: &str = "id, username, hashedIdentityKey, avatarUrl, memberSince";
const POST_COLUMNS: &str = "id, title, content, username, timestamp, likes";

impl Database {
    // -- Accounts --

    /// Insert a new account. The duplicate checks and the insert share one
    /// transaction; a UNIQUE violation at insert time is still mapped to the
    /// matching duplicate error.
    pub fn create_account(
        &self,
        username: &str,
        identity_key: &str,
        avatar_url: Option<&str>,
        member_since: &str,
    ) -> DbResult<AccountRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if query_account(&tx, "username", &username)?.is_some() {
                return Err(DbError::DuplicateUsername(username.to_string()));
            }
            if query_account(&tx, "hashedIdentityKey", &identity_key)?.is_some() {
                return Err(DbError::DuplicateIdentity);
            }

            tx.execute(
                "INSERT INTO users (username, hashedIdentityKey, avatarUrl, memberSince) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![username, identity_key, avatar_url, member_since],
            )
            .map_err(|e| account_conflict(e, username))?;

            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(AccountRow {
                id,
                username: username.to_string(),
                identity_key: identity_key.to_string(),
                avatar_url: avatar_url.map(str::to_string),
                member_since: member_since.to_string(),
            })
        })
    }

    pub fn find_account_by_username(&self, username: &str) -> DbResult<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "username", &username))
    }

    pub fn find_account_by_id(&self, id: i64) -> DbResult<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "id", &id))
    }

    pub fn find_account_by_identity_key(&self, identity_key: &str) -> DbResult<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "hashedIdentityKey", &identity_key))
    }

    // -- Posts --

    pub fn create_post(
        &self,
        title: &str,
        content: &str,
        username: &str,
        timestamp: &str,
    ) -> DbResult<PostRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (title, content, username, timestamp, likes) VALUES (?1, ?2, ?3, ?4, 0)",
                (title, content, username, timestamp),
            )?;

            Ok(PostRow {
                id: conn.last_insert_rowid(),
                title: title.to_string(),
                content: content.to_string(),
                username: username.to_string(),
                timestamp: timestamp.to_string(),
                likes: 0,
            })
        })
    }

    pub fn get_post(&self, id: i64) -> DbResult<Option<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_post).optional()?;
            Ok(row)
        })
    }

    /// All posts, most recent first. Posts sharing a timestamp come back
    /// newest insert first.
    pub fn list_posts(&self) -> DbResult<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts ORDER BY timestamp DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_posts_by_author(&self, username: &str) -> DbResult<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE username = ?1 ORDER BY timestamp DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([username], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a post on behalf of `requesting_username`. Only the author may
    /// delete; anyone else gets `Denied` and the row is untouched.
    pub fn delete_post(&self, post_id: i64, requesting_username: &str) -> DbResult<DeleteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let author: Option<String> = tx
                .query_row("SELECT username FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })
                .optional()?;

            let outcome = match author {
                None => DeleteOutcome::NotFound,
                Some(author) if author != requesting_username => DeleteOutcome::Denied,
                Some(_) => {
                    tx.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
                    DeleteOutcome::Deleted
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    // -- Likes --

    /// Record a like from `account_id` on `post_id` and bump the post's
    /// counter. The ownership check, duplicate check, insert and increment run
    /// in one transaction, so concurrent identical requests increment once.
    pub fn like_post(&self, account_id: i64, post_id: i64) -> DbResult<LikeOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let liker: Option<String> = tx
                .query_row("SELECT username FROM users WHERE id = ?1", [account_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(liker) = liker else {
                return Ok(LikeOutcome::AccountNotFound);
            };

            let author: Option<String> = tx
                .query_row("SELECT username FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(author) = author else {
                return Ok(LikeOutcome::PostNotFound);
            };

            if liker == author {
                return Ok(LikeOutcome::OwnPost);
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM likes WHERE userId = ?1 AND postId = ?2",
                    [account_id, post_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(LikeOutcome::AlreadyLiked);
            }

            match tx.execute(
                "INSERT INTO likes (userId, postId) VALUES (?1, ?2)",
                [account_id, post_id],
            ) {
                Ok(_) => {}
                Err(e) if unique_violation(&e).is_some() => {
                    debug!(account_id, post_id, "like rejected by primary key");
                    return Ok(LikeOutcome::AlreadyLiked);
                }
                Err(e) => return Err(e.into()),
            }

            tx.execute("UPDATE posts SET likes = likes + 1 WHERE id = ?1", [post_id])?;
            tx.commit()?;

            Ok(LikeOutcome::Liked)
        })
    }

    // -- Cover images --

    pub fn get_cached_cover(&self, title: &str) -> DbResult<Option<String>> {
        self.with_conn(|conn| {
            let url: Option<Option<String>> = conn
                .query_row(
                    "SELECT coverImageUrl FROM post_cover_images WHERE title = ?1",
                    [title],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(url.flatten())
        })
    }

    /// Insert or replace the cover URL cached for `title`. Last writer wins.
    pub fn upsert_cover(&self, title: &str, cover_image_url: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO post_cover_images (title, coverImageUrl) VALUES (?1, ?2)
                 ON CONFLICT(title) DO UPDATE SET coverImageUrl = excluded.coverImageUrl",
                (title, cover_image_url),
            )?;
            Ok(())
        })
    }

    // -- Sessions --

    /// Mark a session id as logged out. `expires_at` is the token's own
    /// expiry (unix seconds); past it the entry is no longer needed.
    pub fn revoke_session(&self, session_id: &str, expires_at: i64) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO revoked_sessions (sessionId, expiresAt) VALUES (?1, ?2)
                 ON CONFLICT(sessionId) DO NOTHING",
                (session_id, expires_at),
            )?;
            Ok(())
        })
    }

    pub fn is_session_revoked(&self, session_id: &str) -> DbResult<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM revoked_sessions WHERE sessionId = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Drop revocations for tokens that expired before `now`.
    pub fn purge_revoked_sessions(&self, now: i64) -> DbResult<usize> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM revoked_sessions WHERE expiresAt < ?1", [now])?;
            if removed > 0 {
                debug!(removed, "purged expired session revocations");
            }
            Ok(removed)
        })
    }
}

fn query_account(conn: &Connection, column: &str, value: &dyn ToSql) -> DbResult<Option<AccountRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(AccountRow {
                id: row.get(0)?,
                username: row.get(1)?,
                identity_key: row.get(2)?,
                avatar_url: row.get(3)?,
                member_since: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        username: row.get(3)?,
        timestamp: row.get(4)?,
        likes: row.get(5)?,
    })
}

fn account_conflict(err: rusqlite::Error, username: &str) -> DbError {
    let column = unique_violation(&err).map(str::to_owned);
    match column.as_deref() {
        Some("users.username") => DbError::DuplicateUsername(username.to_string()),
        Some("users.hashedIdentityKey") => DbError::DuplicateIdentity,
        _ => DbError::Sqlite(err),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> DbResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> DbResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn account(db: &Database, username: &str) -> AccountRow {
        let key = format!("key-{}", username);
        db.create_account(username, &key, None, "2024-05-01T12:00:00.000000Z")
            .unwrap()
    }

    fn like_rows(db: &Database, account_id: i64, post_id: i64) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM likes WHERE userId = ?1 AND postId = ?2",
                [account_id, post_id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn create_and_find_account() {
        let db = db();
        let created = db
            .create_account(
                "bookworm",
                "abc123",
                Some("http://localhost:3000/avatar/bookworm"),
                "2024-05-01T12:00:00.000000Z",
            )
            .unwrap();

        let by_name = db.find_account_by_username("bookworm").unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_name.identity_key, "abc123");
        assert_eq!(by_name.avatar_url.as_deref(), Some("http://localhost:3000/avatar/bookworm"));

        let by_id = db.find_account_by_id(created.id).unwrap().unwrap();
        assert_eq!(by_id.username, "bookworm");

        let by_key = db.find_account_by_identity_key("abc123").unwrap().unwrap();
        assert_eq!(by_key.id, created.id);

        assert!(db.find_account_by_username("nobody-here").unwrap().is_none());
        assert!(db.find_account_by_id(999).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = db();
        account(&db, "bookworm");

        let err = db
            .create_account("bookworm", "other-key", None, "2024-05-02T12:00:00.000000Z")
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateUsername(ref name) if name == "bookworm"));
        assert!(err.is_conflict());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn duplicate_identity_rejected() {
        let db = db();
        db.create_account("first_reader", "same-key", None, "2024-05-01T12:00:00.000000Z")
            .unwrap();
        let err = db
            .create_account("second_reader", "same-key", None, "2024-05-01T12:00:00.000000Z")
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateIdentity));
    }

    #[test]
    fn insert_time_unique_violation_maps_to_duplicate() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: users.username".to_string()),
        );
        assert!(matches!(account_conflict(err, "bookworm"), DbError::DuplicateUsername(_)));
    }

    #[test]
    fn posts_listed_newest_first() {
        let db = db();
        let t1 = db.create_post("Dune", "spice", "bookworm", "2024-01-01T10:00:00.000000Z").unwrap();
        let t3 = db.create_post("Emma", "wit", "bookworm", "2024-03-01T10:00:00.000000Z").unwrap();
        let t2 = db.create_post("Ulysses", "long", "reader2", "2024-02-01T10:00:00.000000Z").unwrap();

        let ids: Vec<i64> = db.list_posts().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![t3.id, t2.id, t1.id]);

        let mine: Vec<i64> = db
            .list_posts_by_author("bookworm")
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(mine, vec![t3.id, t1.id]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_insertion() {
        let db = db();
        let a = db.create_post("A", "a", "bookworm", "2024-01-01T10:00:00.000000Z").unwrap();
        let b = db.create_post("B", "b", "bookworm", "2024-01-01T10:00:00.000000Z").unwrap();
        let ids: Vec<i64> = db.list_posts().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn only_author_can_delete() {
        let db = db();
        let post = db.create_post("Dune", "spice", "bookworm", "2024-01-01T10:00:00.000000Z").unwrap();

        assert_eq!(db.delete_post(post.id, "intruder").unwrap(), DeleteOutcome::Denied);
        let kept = db.get_post(post.id).unwrap().unwrap();
        assert_eq!(kept.title, "Dune");
        assert_eq!(kept.content, "spice");

        assert_eq!(db.delete_post(post.id, "bookworm").unwrap(), DeleteOutcome::Deleted);
        assert!(db.get_post(post.id).unwrap().is_none());

        assert_eq!(db.delete_post(post.id, "bookworm").unwrap(), DeleteOutcome::NotFound);
    }

    #[test]
    fn like_is_idempotent() {
        let db = db();
        account(&db, "author_one");
        let fan = account(&db, "fan_reader");
        let post = db.create_post("Dune", "spice", "author_one", "2024-01-01T10:00:00.000000Z").unwrap();

        assert_eq!(db.like_post(fan.id, post.id).unwrap(), LikeOutcome::Liked);
        assert_eq!(db.like_post(fan.id, post.id).unwrap(), LikeOutcome::AlreadyLiked);

        assert_eq!(db.get_post(post.id).unwrap().unwrap().likes, 1);
        assert_eq!(like_rows(&db, fan.id, post.id), 1);
    }

    #[test]
    fn cannot_like_own_post() {
        let db = db();
        let author = account(&db, "author_one");
        let post = db.create_post("Dune", "spice", "author_one", "2024-01-01T10:00:00.000000Z").unwrap();

        assert_eq!(db.like_post(author.id, post.id).unwrap(), LikeOutcome::OwnPost);
        assert_eq!(db.get_post(post.id).unwrap().unwrap().likes, 0);
        assert_eq!(like_rows(&db, author.id, post.id), 0);
    }

    #[test]
    fn like_unknown_post_or_account() {
        let db = db();
        let fan = account(&db, "fan_reader");
        let post = db.create_post("Dune", "spice", "author_one", "2024-01-01T10:00:00.000000Z").unwrap();

        assert_eq!(db.like_post(fan.id, 4242).unwrap(), LikeOutcome::PostNotFound);
        assert_eq!(db.like_post(4242, post.id).unwrap(), LikeOutcome::AccountNotFound);
        assert_eq!(db.get_post(post.id).unwrap().unwrap().likes, 0);
    }

    #[test]
    fn concurrent_likes_increment_once() {
        use std::sync::Arc;

        let db = Arc::new(db());
        account(&db, "author_one");
        let fan = account(&db, "fan_reader");
        let post = db.create_post("Dune", "spice", "author_one", "2024-01-01T10:00:00.000000Z").unwrap();
        let (fan_id, post_id) = (fan.id, post.id);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.like_post(fan_id, post_id).unwrap())
            })
            .collect();
        let liked = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == LikeOutcome::Liked)
            .count();

        assert_eq!(liked, 1);
        assert_eq!(db.get_post(post_id).unwrap().unwrap().likes, 1);
    }

    #[test]
    fn concurrent_registrations_claim_username_once() {
        use std::sync::Arc;

        let db = Arc::new(db());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.create_account("bookworm", &format!("key-{}", i), None, "2024-05-01T12:00:00.000000Z")
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, DbError::DuplicateUsername(name) if name == "bookworm"))
        );

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn revoked_sessions_stay_revoked_until_purged() {
        let db = db();
        assert!(!db.is_session_revoked("sid-1").unwrap());

        db.revoke_session("sid-1", 1_000).unwrap();
        db.revoke_session("sid-1", 1_000).unwrap();
        db.revoke_session("sid-2", 5_000).unwrap();
        assert!(db.is_session_revoked("sid-1").unwrap());

        // Only entries whose token would have expired anyway are dropped.
        assert_eq!(db.purge_revoked_sessions(2_000).unwrap(), 1);
        assert!(!db.is_session_revoked("sid-1").unwrap());
        assert!(db.is_session_revoked("sid-2").unwrap());
    }

    #[test]
    fn cover_cache_upsert() {
        let db = db();
        assert!(db.get_cached_cover("Dune").unwrap().is_none());

        db.upsert_cover("Dune", "http://covers/dune-1.jpg").unwrap();
        assert_eq!(db.get_cached_cover("Dune").unwrap().as_deref(), Some("http://covers/dune-1.jpg"));

        db.upsert_cover("Dune", "http://covers/dune-2.jpg").unwrap();
        assert_eq!(db.get_cached_cover("Dune").unwrap().as_deref(), Some("http://covers/dune-2.jpg"));

        // Keys are exact, case-sensitive titles.
        assert!(db.get_cached_cover("dune").unwrap().is_none());
    }
}
