use axum::{
    Extension, Form, Json,
    extract::{Path, State},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use shelf_db::format_timestamp;
use shelf_db::models::{AccountRow, DeleteOutcome, PostRow};
use shelf_types::api::{CreatePostRequest, FeedResponse, PostView, ProfileResponse};
use shelf_types::models::{Account, Post};

use crate::AppState;
use crate::auth::current_account;
use crate::covers::CoverCache;
use crate::error::ApiError;
use crate::middleware::CurrentAccount;
use crate::run_db;
use crate::session::{SessionPhase, current_phase};

/// GET / — every post, newest first, with covers. Works logged out.
pub async fn feed(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = match current_phase(&state, &jar).await? {
        SessionPhase::Authenticated { account_id } => {
            run_db(&state, move |db| db.find_account_by_id(account_id)).await?
        }
        _ => None,
    };

    let rows = run_db(&state, |db| db.list_posts()).await?;
    let posts = with_covers(&state.covers, rows).await;

    Ok(Json(FeedResponse {
        posts,
        viewer: viewer.map(to_account),
    }))
}

/// POST /posts
pub async fn create_post(
    State(state): State<AppState>,
    Extension(CurrentAccount(account_id)): Extension<CurrentAccount>,
    Form(req): Form<CreatePostRequest>,
) -> Result<Redirect, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("title is required".into()));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }

    let author = current_account(&state, account_id).await?;
    let timestamp = format_timestamp(chrono::Utc::now());
    let content = req.content;

    let post = run_db(&state, move |db| {
        db.create_post(&title, &content, &author.username, &timestamp)
    })
    .await?;

    info!(post_id = post.id, "User {} posted about {}", post.username, post.title);
    Ok(Redirect::to("/"))
}

/// POST /delete/{id} — only the author's request deletes anything.
pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(CurrentAccount(account_id)): Extension<CurrentAccount>,
) -> Result<Redirect, ApiError> {
    let account = current_account(&state, account_id).await?;
    let username = account.username;

    let outcome = run_db(&state, move |db| db.delete_post(post_id, &username)).await?;
    match outcome {
        DeleteOutcome::Deleted => info!(post_id, account_id, "post deleted"),
        DeleteOutcome::Denied => warn!(post_id, account_id, "delete denied: not the author"),
        DeleteOutcome::NotFound => debug!(post_id, "delete ignored: no such post"),
    }

    Ok(Redirect::to("/"))
}

/// GET /profile
pub async fn profile(
    State(state): State<AppState>,
    Extension(CurrentAccount(account_id)): Extension<CurrentAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let account = current_account(&state, account_id).await?;

    let username = account.username.clone();
    let rows = run_db(&state, move |db| db.list_posts_by_author(&username)).await?;
    let posts = with_covers(&state.covers, rows).await;

    Ok(Json(ProfileResponse {
        account: to_account(account),
        posts,
    }))
}

/// Attach cover URLs, resolving every title concurrently. Missing covers
/// render as an empty string.
pub(crate) async fn with_covers(covers: &CoverCache, rows: Vec<PostRow>) -> Vec<PostView> {
    let urls = join_all(rows.iter().map(|row| covers.get_cover_image(&row.title))).await;

    rows.into_iter()
        .zip(urls)
        .map(|(row, url)| PostView {
            post: to_post(row),
            cover_image_url: url.unwrap_or_default(),
        })
        .collect()
}

fn to_post(row: PostRow) -> Post {
    Post {
        timestamp: parse_timestamp(&row.timestamp, "post", row.id),
        id: row.id,
        title: row.title,
        content: row.content,
        username: row.username,
        likes: row.likes,
    }
}

pub(crate) fn to_account(row: AccountRow) -> Account {
    Account {
        member_since: parse_timestamp(&row.member_since, "account", row.id),
        id: row.id,
        username: row.username,
        avatar_url: row.avatar_url,
    }
}

fn parse_timestamp(raw: &str, kind: &str, id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // Rows inserted from the sqlite3 shell use "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {} {}: {}", raw, kind, id, e);
            chrono::DateTime::default()
        })
}
