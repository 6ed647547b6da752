use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::ApiError;
use crate::session::{current_phase, require_authenticated};

/// Account id bound to the request's session, inserted by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentAccount(pub i64);

/// Session Gate for protected routes: anything without an authenticated
/// session is redirected to `/login` before the handler runs.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let account_id = require_authenticated(&current_phase(&state, &jar).await?)?;

    req.extensions_mut().insert(CurrentAccount(account_id));
    Ok(next.run(req).await)
}
