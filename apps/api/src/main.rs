use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use booking_queue_cell::{CascadeWorkerConfig, CascadeWorkerService};
use shared_config::AppConfig;
use shared_database::{redis_store::connect_pool, InMemoryTenantResolver, RedisTenantResolver, TenantResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic queue API server");

    // Load configuration
    let config = AppConfig::from_env();

    let tenants: Arc<dyn TenantResolver> = match &config.redis_url {
        Some(url) => {
            let pool = connect_pool(url)
                .await
                .context("failed to connect to Redis")?;
            Arc::new(RedisTenantResolver::new(pool, config.redis_key_prefix.clone()))
        }
        None => Arc::new(InMemoryTenantResolver::new()),
    };

    let services = router::Services::build(tenants, &config);

    // The cascade worker re-runs cascades that did not finish inline
    let worker = Arc::new(CascadeWorkerService::new(
        CascadeWorkerConfig::from_app_config(&config),
        services.disruption.clone(),
    ));
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.start().await {
                error!("Cascade worker exited: {}", e);
            }
        })
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(&services).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(cors),
    );

    // Run the server
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    worker.shutdown().await;
    if let Err(e) = worker_handle.await {
        error!("Cascade worker task failed: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
