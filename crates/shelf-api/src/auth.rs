use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use reqwest::Url;
use tracing::{info, warn};

use shelf_crypto::keys::{generate_oauth_state, state_matches};
use shelf_db::models::AccountRow;
use shelf_db::{Database, DbError, format_timestamp};
use shelf_types::api::{
    LoginPageResponse, PageQuery, ProviderCallbackQuery, RegisterPageResponse,
    RegisterUsernameRequest,
};

use crate::covers::CoverCache;
use crate::error::ApiError;
use crate::identity::{self, IdentityProvider, IdentityResolution};
use crate::session::{self, SessionKeys, SessionPhase, current_phase};
use crate::{run_db, spawn_db};

pub const MIN_USERNAME_LEN: usize = 6;

const LOGIN_FAILED: &str = "/login?error=Login+failed";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub covers: CoverCache,
    pub identity: Arc<dyn IdentityProvider>,
    pub sessions: SessionKeys,
    /// Externally visible base URL, used to derive avatar references.
    pub public_url: String,
}

/// Why a registration attempt was bounced back to the username form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidUsername,
    DuplicateUsername,
    DuplicateIdentity,
}

impl RegistrationError {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidUsername => "6 Character Minimum Name Length",
            Self::DuplicateUsername => "Username already exists",
            Self::DuplicateIdentity => "Account already registered",
        }
    }

    fn redirect(self) -> Redirect {
        Redirect::to(&format!("/register?error={}", self.message().replace(' ', "+")))
    }
}

/// Usernames are required and at least six characters once surrounding
/// whitespace is trimmed.
pub fn validate_username(username: Option<&str>) -> Result<&str, RegistrationError> {
    let username = username.map(str::trim).unwrap_or_default();
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(RegistrationError::InvalidUsername);
    }
    Ok(username)
}

/// `{public_url}/avatar/{username}`, with the username percent-encoded as a
/// single path segment.
pub fn avatar_url(public_url: &str, username: &str) -> Result<String, ApiError> {
    let mut url = Url::parse(public_url)
        .map_err(|e| ApiError::Internal(format!("invalid public url {}: {}", public_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::Internal(format!("public url {} cannot carry a path", public_url)))?
        .pop_if_empty()
        .push("avatar")
        .push(username);
    Ok(url.into())
}

/// Load the account a session is bound to. A session pointing at a missing
/// account is treated as logged out.
pub async fn current_account(state: &AppState, account_id: i64) -> Result<AccountRow, ApiError> {
    run_db(state, move |db| db.find_account_by_id(account_id))
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// GET /login
pub async fn login_page(Query(query): Query<PageQuery>) -> impl IntoResponse {
    Json(LoginPageResponse {
        provider_url: "/auth/google".into(),
        error: query.error,
    })
}

/// GET /auth/google — start the provider round trip.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let oauth_state = generate_oauth_state();
    let location = state.identity.authorization_url(&oauth_state);
    let jar = state
        .sessions
        .store(jar, SessionPhase::AwaitingProvider { oauth_state })?;

    Ok((jar, Redirect::to(&location)))
}

/// GET /auth/google/callback — finish the round trip and either log the
/// account in or send the visitor to pick a username.
pub async fn provider_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ProviderCallbackQuery>,
) -> Result<(CookieJar, Redirect), ApiError> {
    let SessionPhase::AwaitingProvider { oauth_state } = current_phase(&state, &jar).await? else {
        warn!("Provider callback without a pending login");
        return Ok((jar, Redirect::to(LOGIN_FAILED)));
    };

    if let Some(error) = &query.error {
        warn!("Identity provider returned error: {}", error);
        return Ok((jar, Redirect::to(LOGIN_FAILED)));
    }

    let (Some(code), Some(returned_state)) = (&query.code, &query.state) else {
        return Ok((jar, Redirect::to(LOGIN_FAILED)));
    };
    if !state_matches(&oauth_state, returned_state) {
        warn!("OAuth state mismatch on callback");
        return Ok((jar, Redirect::to(LOGIN_FAILED)));
    }

    let external = match state.identity.exchange(code).await {
        Ok(external) => external,
        Err(e) => {
            warn!("Identity exchange failed: {}", e);
            return Ok((jar, Redirect::to(LOGIN_FAILED)));
        }
    };

    match identity::resolve_account(&state, &external.subject).await? {
        IdentityResolution::Registered(account) => {
            info!(account_id = account.id, "User {} logged in", account.username);
            let jar = state.sessions.store(
                jar,
                SessionPhase::Authenticated {
                    account_id: account.id,
                },
            )?;
            Ok((jar, Redirect::to("/")))
        }
        IdentityResolution::Unregistered { identity_key } => {
            let jar = state
                .sessions
                .store(jar, SessionPhase::PendingRegistration { identity_key })?;
            Ok((jar, Redirect::to("/register")))
        }
    }
}

/// GET /register
pub async fn register_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pending = matches!(
        current_phase(&state, &jar).await?,
        SessionPhase::PendingRegistration { .. }
    );

    Ok(Json(RegisterPageResponse {
        pending,
        error: query.error,
    }))
}

/// POST /register — claim a username for the pending identity.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(req): Form<RegisterUsernameRequest>,
) -> Result<(CookieJar, Redirect), ApiError> {
    let SessionPhase::PendingRegistration { identity_key } = current_phase(&state, &jar).await? else {
        return Err(ApiError::Unauthorized);
    };

    let username = match validate_username(req.username.as_deref()) {
        Ok(username) => username.to_string(),
        Err(e) => return Ok((jar, e.redirect())),
    };

    let avatar = avatar_url(&state.public_url, &username)?;
    let member_since = format_timestamp(chrono::Utc::now());

    let created = spawn_db(&state, move |db| {
        db.create_account(&username, &identity_key, Some(&avatar), &member_since)
    })
    .await?;

    let account = match created {
        Ok(account) => account,
        Err(DbError::DuplicateUsername(_)) => {
            return Ok((jar, RegistrationError::DuplicateUsername.redirect()));
        }
        Err(DbError::DuplicateIdentity) => {
            return Ok((jar, RegistrationError::DuplicateIdentity.redirect()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(account_id = account.id, "Registered user {}", account.username);

    let jar = state.sessions.store(
        jar,
        SessionPhase::Authenticated {
            account_id: account.id,
        },
    )?;
    Ok((jar, Redirect::to("/")))
}

/// GET /logout — the old token stops working even if the browser keeps it.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let jar = session::end_session(&state, jar).await?;
    Ok((jar, Redirect::to("/")))
}
