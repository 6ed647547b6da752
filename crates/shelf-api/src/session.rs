use anyhow::anyhow;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shelf_crypto::keys::generate_session_id;

use crate::AppState;
use crate::error::ApiError;
use crate::run_db;

pub const SESSION_COOKIE: &str = "shelf_session";

/// Where a browser session is in the login lifecycle.
///
/// `AwaitingProvider` covers the redirect to the identity provider and back.
/// `PendingRegistration` holds the pseudonymous key of a first-time visitor
/// until they pick a username; it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    Anonymous,
    AwaitingProvider { oauth_state: String },
    PendingRegistration { identity_key: String },
    Authenticated { account_id: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sid: String,
    session: SessionPhase,
    exp: usize,
}

/// A verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub phase: SessionPhase,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Signs and reads the session cookie.
pub struct SessionKeys {
    secret: String,
    ttl: chrono::Duration,
    secure_cookie: bool,
}

impl SessionKeys {
    pub fn new(secret: impl Into<String>, ttl: chrono::Duration, secure_cookie: bool) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            secure_cookie,
        }
    }

    /// Sign a fresh session carrying `phase`. Every call mints a new session id.
    pub fn issue(&self, phase: SessionPhase) -> anyhow::Result<String> {
        let expires_at = chrono::Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow!("session lifetime {} out of range", self.ttl))?;

        let claims = Claims {
            sid: generate_session_id(),
            session: phase,
            exp: expires_at.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Decode a session token. Tampered or expired tokens yield `None`.
    /// Revocation is not checked here; see [`current_phase`].
    pub fn read(&self, token: &str) -> Option<Session> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| Session {
            id: data.claims.sid,
            phase: data.claims.session,
            expires_at: data.claims.exp as i64,
        })
        .map_err(|e| debug!("Discarding session token: {}", e))
        .ok()
    }

    pub fn session(&self, jar: &CookieJar) -> Option<Session> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| self.read(cookie.value()))
    }

    /// Replace the session with `phase`.
    pub fn store(&self, jar: CookieJar, phase: SessionPhase) -> Result<CookieJar, ApiError> {
        let token = self
            .issue(phase)
            .map_err(|e| ApiError::Internal(format!("session signing failed: {}", e)))?;

        let cookie = Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie);

        Ok(jar.add(cookie))
    }

    pub fn destroy(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }
}

/// Current phase of the request's session. A missing cookie, a bad token and
/// a logged-out session all read as `Anonymous`.
pub async fn current_phase(state: &AppState, jar: &CookieJar) -> Result<SessionPhase, ApiError> {
    let Some(session) = state.sessions.session(jar) else {
        return Ok(SessionPhase::Anonymous);
    };

    let id = session.id.clone();
    if run_db(state, move |db| db.is_session_revoked(&id)).await? {
        debug!("Rejecting revoked session");
        return Ok(SessionPhase::Anonymous);
    }

    Ok(session.phase)
}

/// Logout: revoke the session id server-side, then drop the cookie.
pub async fn end_session(state: &AppState, jar: CookieJar) -> Result<CookieJar, ApiError> {
    if let Some(Session { id, phase, expires_at }) = state.sessions.session(&jar) {
        let now = chrono::Utc::now().timestamp();
        run_db(state, move |db| {
            db.revoke_session(&id, expires_at)?;
            db.purge_revoked_sessions(now)
        })
        .await?;

        if let SessionPhase::Authenticated { account_id } = phase {
            info!(account_id, "Logged out");
        }
    }

    Ok(state.sessions.destroy(jar))
}

/// Session Gate: the bound account id, or `Unauthorized` when the session
/// is not logged in.
pub fn require_authenticated(phase: &SessionPhase) -> Result<i64, ApiError> {
    match phase {
        SessionPhase::Authenticated { account_id } => Ok(*account_id),
        _ => Err(ApiError::Unauthorized),
    }
}
