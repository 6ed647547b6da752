use axum::{
    Extension,
    extract::{Path, State},
    response::Redirect,
};
use tracing::debug;

use shelf_db::models::LikeOutcome;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::CurrentAccount;
use crate::run_db;

/// POST /like/{id} — like someone else's post, at most once.
///
/// Self-likes and repeats change nothing; every outcome lands back on the
/// feed the same way.
pub async fn like_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(CurrentAccount(account_id)): Extension<CurrentAccount>,
) -> Result<Redirect, ApiError> {
    let outcome = run_db(&state, move |db| db.like_post(account_id, post_id)).await?;

    match outcome {
        LikeOutcome::Liked => debug!(account_id, post_id, "post liked"),
        LikeOutcome::AlreadyLiked => debug!(account_id, post_id, "like ignored: already liked"),
        LikeOutcome::OwnPost => debug!(account_id, post_id, "like ignored: own post"),
        LikeOutcome::PostNotFound => debug!(account_id, post_id, "like ignored: no such post"),
        LikeOutcome::AccountNotFound => return Err(ApiError::Unauthorized),
    }

    Ok(Redirect::to("/"))
}
