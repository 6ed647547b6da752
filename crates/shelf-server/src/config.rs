use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder session secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "oneringtorulethemall",
];

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub public_url: String,
    pub session_secret: String,
    pub session_ttl: chrono::Duration,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub books_api_url: String,
    pub cover_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env_or("SHELF_HOST", "0.0.0.0");
        let port: u16 = env_or("SHELF_PORT", "3000")
            .parse()
            .context("SHELF_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

        let session_secret = std::env::var("SHELF_SESSION_SECRET").unwrap_or_default();
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            bail!("SHELF_SESSION_SECRET is unset or still a placeholder");
        }

        let session_ttl = parse_session_ttl(&env_or("SHELF_SESSION_TTL_HOURS", "168"))?;
        let cover_timeout_secs: u64 = env_or("SHELF_COVER_TIMEOUT_SECS", "5")
            .parse()
            .context("SHELF_COVER_TIMEOUT_SECS must be a number of seconds")?;

        let public_url = std::env::var("SHELF_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));
        if reqwest::Url::parse(&public_url).is_err() {
            bail!("SHELF_PUBLIC_URL is not a valid URL: {}", public_url);
        }

        Ok(Self {
            addr,
            db_path: db_path(),
            public_url,
            session_secret,
            session_ttl,
            google_client_id: std::env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID is required")?,
            google_client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET is required")?,
            books_api_url: env_or("SHELF_BOOKS_API_URL", shelf_api::covers::GOOGLE_BOOKS_URL),
            cover_timeout: Duration::from_secs(cover_timeout_secs),
        })
    }

    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/google/callback", self.public_url.trim_end_matches('/'))
    }

    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

/// `SHELF_DB_PATH`, on its own so `--seed` works without the rest of the config.
pub fn db_path() -> PathBuf {
    env_or("SHELF_DB_PATH", "bookshelf.db").into()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

/// Session lifetime in hours. Must be positive, and a session issued now must
/// still expire at a representable time.
fn parse_session_ttl(raw: &str) -> anyhow::Result<chrono::Duration> {
    let hours: i64 = raw
        .parse()
        .context("SHELF_SESSION_TTL_HOURS must be a number of hours")?;
    if hours <= 0 {
        bail!("SHELF_SESSION_TTL_HOURS must be positive, got {}", hours);
    }

    let ttl = chrono::TimeDelta::try_hours(hours)
        .with_context(|| format!("SHELF_SESSION_TTL_HOURS={} is out of range", hours))?;
    if chrono::Utc::now().checked_add_signed(ttl).is_none() {
        bail!("SHELF_SESSION_TTL_HOURS={} is out of range", hours);
    }

    Ok(ttl)
}
