//! Identity Resolver.
//!
//! The identity provider is a black box that turns an authorization code into
//! a subject identifier. The subject is hashed into a pseudonymous key before
//! it touches the store, and the key is what links a login to an account.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use shelf_crypto::identity::pseudonymous_key;
use shelf_db::models::AccountRow;

use crate::AppState;
use crate::error::ApiError;
use crate::run_db;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub subject: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a login. `state` must come back
    /// unchanged on the callback.
    fn authorization_url(&self, state: &str) -> String;

    /// Trade the callback's authorization code for the subject identifier.
    async fn exchange(&self, code: &str) -> anyhow::Result<ExternalIdentity>;
}

/// Google OAuth 2.0 authorization-code flow, `openid profile` scope.
pub struct GoogleIdentityProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: Url,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
}

impl GoogleIdentityProvider {
    pub fn new(
        client: reqwest::Client,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            client_id,
            client_secret,
            redirect_uri,
            auth_url: Url::parse(GOOGLE_AUTH_URL)?,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid profile")
            .append_pair("state", state);
        url.into()
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<ExternalIdentity> {
        let token: TokenResponse = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let info: UserInfo = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ExternalIdentity { subject: info.sub })
    }
}

/// Map a provider subject to its pseudonymous identity key.
pub fn resolve_identity(subject: &str) -> String {
    pseudonymous_key(subject)
}

#[derive(Debug)]
pub enum IdentityResolution {
    Registered(AccountRow),
    Unregistered { identity_key: String },
}

/// Resolve a provider subject to a local account, or report that the
/// caller still has to register.
pub async fn resolve_account(state: &AppState, subject: &str) -> Result<IdentityResolution, ApiError> {
    let identity_key = resolve_identity(subject);

    let key = identity_key.clone();
    let account = run_db(state, move |db| db.find_account_by_identity_key(&key)).await?;

    Ok(match account {
        Some(account) => IdentityResolution::Registered(account),
        None => IdentityResolution::Unregistered { identity_key },
    })
}
