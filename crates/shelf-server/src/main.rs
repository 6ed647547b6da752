mod config;
mod seed;

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;

use shelf_api::covers::{CoverCache, GoogleBooksLookup};
use shelf_api::identity::GoogleIdentityProvider;
use shelf_api::session::SessionKeys;
use shelf_api::{AppState, AppStateInner};

use crate::config::Config;
use crate::seed::SeedOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelf_server=debug,shelf_api=debug,shelf_db=info,tower_http=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--seed") {
        let db = shelf_db::Database::open(&config::db_path())?;
        match seed::populate(&db)? {
            SeedOutcome::Populated(_) => {}
            SeedOutcome::AlreadySeeded => info!("Sample data already present, nothing to do"),
        }
        return Ok(());
    }

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(shelf_db::Database::open(&config.db_path)?);

    let http = reqwest::Client::builder()
        .user_agent(concat!("bookshelf/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let lookup = Arc::new(GoogleBooksLookup::new(http.clone(), config.books_api_url.clone()));
    let identity = Arc::new(GoogleIdentityProvider::new(
        http,
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.oauth_redirect_uri(),
    )?);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        covers: CoverCache::new(db, lookup, config.cover_timeout),
        identity,
        sessions: SessionKeys::new(
            config.session_secret.clone(),
            config.session_ttl,
            config.secure_cookies(),
        ),
        public_url: config.public_url.clone(),
    });

    let app = shelf_api::router(state).layer(TraceLayer::new_for_http());

    info!("Bookshelf listening on {}", config.addr);
    info!("Public URL: {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
