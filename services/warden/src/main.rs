//! Warden service entry point.
//!
//! Loads configuration, bootstraps the authorization engine (catalog
//! validation and index rebuild), and serves Prometheus metrics until
//! interrupted.
use anyhow::Context;
use std::future::Future;
use warden::AuthzEngine;
use warden::config::WardenConfig;
use warden::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WardenConfig::from_env_or_yaml().context("warden config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: WardenConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle =
        observability::init_observability("warden").context("install metrics recorder")?;
    let engine = AuthzEngine::from_config(&config).await?;
    engine.health_check().await.context("store health check")?;

    let addr = config.metrics_bind;
    tracing::info!(%addr, "warden metrics listening");
    observability::serve_metrics_with_shutdown(metrics_handle, addr, shutdown).await?;
    tracing::info!("warden stopped");
    Ok(())
}
