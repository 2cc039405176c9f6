//! chat-recap HTTP Server

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recap_core::FsContentStore;
use recap_pipeline::HttpArchiveFetcher;
use recap_server::{AppState, ENDPOINTS, ServerConfig, Services, build_gateways, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let env = |key: &str| std::env::var(key).ok();

    let config = ServerConfig::from_lookup(env).context("invalid server configuration")?;

    // LLM provider
    let provider = recap_runtime::provider_from_lookup(env).context("LLM provider")?;
    let info = provider.info();
    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to {} (model {})", info.name, info.default_model),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not reachable - generation will fail until it is", info.name);
        }
    }

    // Payments
    let gateways = build_gateways(env);
    if gateways.is_empty() {
        tracing::warn!("⚠ No payment provider configured - checkouts and webhooks disabled");
    }

    let fetcher = HttpArchiveFetcher::new(config.pipeline.download_timeout)
        .context("archive fetcher")?;
    let content = FsContentStore::new(&config.content_dir);
    tracing::info!(dir = %config.content_dir, "Content store ready");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(
        config,
        Services {
            provider,
            fetcher: Arc::new(fetcher),
            content: Arc::new(content),
            gateways,
        },
    )
    .context("application state")?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 chat-recap server running on http://{}", bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    for (method, path, summary) in ENDPOINTS {
        tracing::info!("  {method:<4} {path:<30} - {summary}");
    }

    axum::serve(listener, app).await?;

    Ok(())
}
