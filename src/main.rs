use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use edge_auth_gateway::build_gateway;
use edge_auth_gateway::config::Config;
use edge_auth_gateway::oidc::{discover, ClientRegistration, OAuth2IdentityProvider};
use edge_auth_gateway::session_storage::in_memory::MemoryKvStore;
use edge_auth_gateway::session_storage::KeyValueStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt_layer)
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(config = ?config, "configuration loaded");

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let metadata = discover(&config.auth_server_url, &http_client)
        .await
        .context("could not discover the identity provider")?;
    let provider = Arc::new(OAuth2IdentityProvider::new(ClientRegistration::from_config(
        &config, metadata,
    ))?);

    let store = connect_store(&config).await?;
    let app = build_gateway(&config, store, provider, Router::new())?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("could not bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "edge gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    use edge_auth_gateway::session_storage::redis::RedisKvStore;

    if let Some(redis_url) = &config.redis_url {
        let store = RedisKvStore::connect(redis_url)
            .await
            .context("could not connect to Redis")?;
        info!("using Redis session store");
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryKvStore::new()))
}

#[cfg(not(feature = "redis"))]
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the `redis` feature is disabled; using the in-memory store");
    }
    Ok(Arc::new(MemoryKvStore::new()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("could not listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("could not listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
