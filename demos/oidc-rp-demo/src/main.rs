use anyhow::{Context, Result};
use ras_identity_oidc::{
    FlowStateStore, InMemoryFlowStateStore, OidcConfig, OidcRelyingParty, spawn_sweeper,
};
use ras_identity_session::{SessionConfig, SessionService};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod routes;

use config::AppConfig;
use routes::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    info!("Starting OpenID Connect relying party demo: {:?}", config);

    let oidc_config = OidcConfig::new().with_state_ttl(600);
    let state_store = Arc::new(InMemoryFlowStateStore::new(oidc_config.state_ttl_seconds));
    let sessions = Arc::new(SessionService::new(
        SessionConfig::default()
            .with_cookie_secret(&config.session_secret)
            .with_token_expiry_binding(true),
    ));

    let relying_party = OidcRelyingParty::new(
        oidc_config,
        config.client_config(),
        state_store.clone(),
        sessions.clone(),
    )
    .context("Failed to configure the relying party")?;

    if let Err(e) = relying_party.discover().await {
        warn!("Identity provider not reachable yet: {}", e);
    }

    let flow_state: Arc<dyn FlowStateStore> = state_store;
    spawn_sweeper(flow_state, SWEEP_INTERVAL);

    let session_sweeper = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = session_sweeper.sweep_expired().await;
            if removed > 0 {
                info!("Removed {} expired sessions", removed);
            }
        }
    });

    let app = routes::router(AppState {
        relying_party: Arc::new(relying_party),
        sessions,
        secure_cookies: config.secure_cookies(),
    });

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Server running on http://{}", bind_addr);
    info!("Redirect URI: {}", config.redirect_uri);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
