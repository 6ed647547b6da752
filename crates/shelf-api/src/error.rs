//! HTTP-facing error type.
//!
//! Nothing in the request path is fatal: validation and conflicts become 4xx
//! responses, a missing session becomes a redirect to `/login`, and store
//! failures become a 500 with the detail kept in the log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::error;

use shelf_db::DbError;
use shelf_types::api::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no authenticated session")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        if err.is_conflict() {
            Self::Conflict(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => return Redirect::to("/login").into_response(),
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(detail) => {
                error!("Request failed: {}", detail);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "internal error".into(),
                    }),
                )
                    .into_response();
            }
        };

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
