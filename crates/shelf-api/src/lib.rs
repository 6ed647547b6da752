pub mod auth;
pub mod covers;
pub mod error;
pub mod identity;
pub mod likes;
pub mod middleware;
pub mod posts;
pub mod session;

pub use auth::{AppState, AppStateInner};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tracing::error;

use shelf_db::{Database, DbResult};

use crate::error::ApiError;

/// All routes. Everything under the Session Gate redirects to `/login`
/// when the session is not authenticated.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(posts::feed))
        .route("/posts/books/{title}", get(covers::cover_for_title))
        .route("/books", get(covers::book_gallery))
        .route("/login", get(auth::login_page))
        .route("/auth/google", get(auth::login))
        .route("/auth/google/callback", get(auth::provider_callback))
        .route("/register", get(auth::register_page).post(auth::register))
        .route("/logout", get(auth::logout))
        .route("/health", get(|| async { "ok" }));

    let protected_routes = Router::new()
        .route("/posts", post(posts::create_post))
        .route("/like/{id}", post(likes::like_post))
        .route("/delete/{id}", post(posts::delete_post))
        .route("/profile", get(posts::profile))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// Run a blocking store call off the async runtime, keeping the store's own
/// result for the caller to inspect.
pub(crate) async fn spawn_db<F, T>(state: &AppState, f: F) -> Result<DbResult<T>, ApiError>
where
    F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })
}

/// Like [`spawn_db`], with store errors converted to [`ApiError`].
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(spawn_db(state, f).await??)
}
