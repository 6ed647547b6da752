use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub member_since: DateTime<Utc>,
}

/// A book review. `likes` is a denormalized count of rows in the likes table
/// and is only ever incremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub likes: i64,
}
