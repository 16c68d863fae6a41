//! relay-gateway: an LLM API gateway that fronts several backend wire
//! protocols behind the chat-completions protocol, with pooled or
//! refresh-token outbound credentials.

mod config;
mod dispatch;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use keypool::{AuditLog, KeyPool};
use relay_auth::source::{resolve, CredentialSource, SourcePaths};
use relay_auth::{TokenConfig, TokenLifecycle};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dispatch::{AuthMode, Dispatcher};
use crate::routes::{build_router, AppState, RequestCounters};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let prometheus =
        metrics::install_recorder().context("failed to install metrics recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);
    let config_path = Config::resolve_path(cli_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        models = config.models.len(),
        "configuration loaded"
    );
    routes::log_routes(&config);

    let auth = resolve_auth_mode(&config).await?;
    info!(mode = auth.name(), "credential source resolved");

    let listen_addr = config.server.listen_addr;
    let max_connections = config.server.max_connections;
    let state = AppState {
        dispatcher: Arc::new(Dispatcher::new(Arc::new(config), auth)),
        prometheus,
        started_at: Instant::now(),
        counters: Arc::new(RequestCounters::default()),
    };
    let app = build_router(state, max_connections);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listener.local_addr()?, "relay gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

/// Build the outbound credential mode from the startup source chain.
/// Refresh-token mode performs one eager refresh so a dead token fails
/// the process at startup instead of on the first request.
async fn resolve_auth_mode(config: &Config) -> anyhow::Result<AuthMode> {
    match resolve(&SourcePaths::from_process()) {
        CredentialSource::MultiKey { secrets } => {
            info!(
                count = secrets.len(),
                algorithm = %config.pool.algorithm,
                remove_on_quota = config.pool.remove_on_quota,
                "using multi-key credential pool"
            );
            let pool = KeyPool::new(
                secrets,
                config.pool.algorithm,
                config.pool.remove_on_quota,
                AuditLog::new(config.pool.audit_file.clone()),
            );
            metrics::set_active_credentials(pool.active_count());
            Ok(AuthMode::MultiKey(Arc::new(pool)))
        }
        CredentialSource::RefreshToken {
            token,
            access_token,
            persist_path,
            merge_on_persist,
        } => {
            let lifecycle = TokenLifecycle::new(TokenConfig {
                refresh_token: token,
                access_token,
                persist_path,
                merge_on_persist,
                client_id: None,
            });
            lifecycle
                .refresh()
                .await
                .context("initial token refresh failed")?;
            Ok(AuthMode::Refresh(Arc::new(lifecycle)))
        }
        CredentialSource::ClientSupplied => Ok(AuthMode::Client),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
