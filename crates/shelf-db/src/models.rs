/// Database row types — these map directly to SQLite rows.
/// Distinct from shelf-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub username: String,
    pub identity_key: String,
    pub avatar_url: Option<String>,
    pub member_since: String,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub username: String,
    pub timestamp: String,
    pub likes: i64,
}

/// Result of a like request. Only `Liked` changes any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Liked,
    AlreadyLiked,
    OwnPost,
    PostNotFound,
    AccountNotFound,
}

/// Result of a delete request. Only `Deleted` changes any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Denied,
    NotFound,
}
