use std::sync::Arc;

use anyhow::Context;

use tensai_dispatch::config::DispatcherConfig;
use tensai_dispatch::dispatcher::ModuleDispatcher;
use tensai_dispatch::error::Result;
use tensai_dispatch::server::dispatch_routes;
use tensai_dispatch::transport::ReqwestTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DispatcherConfig::from_env().context("invalid dispatcher configuration")?;

    eprintln!("🛰  TensAI Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Upstream: {}", config.base_url);
    eprintln!("   API: http://0.0.0.0:{}/api/modules", config.port);
    eprintln!(
        "   Auth: {}\n",
        if config.api_key.is_some() { "bearer token" } else { "none" }
    );

    serve(config).await.context("dispatch server failed")?;
    Ok(())
}

async fn serve(config: DispatcherConfig) -> Result<()> {
    let registry = config.registry();
    tracing::info!(modules = registry.len(), "Endpoint registry loaded");

    let dispatcher = ModuleDispatcher::new(Arc::new(registry), Arc::new(ReqwestTransport::new()))
        .with_backoff(config.backoff)
        .with_identity(config.identity());

    let app = dispatch_routes(Arc::new(dispatcher));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Dispatch API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
