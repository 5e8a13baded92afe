mod api;
mod audience;
mod automation;
mod config;
mod database;
mod downstream;
mod engine;
mod schedule;

use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use audience::GeneratorRegistry;
use config::Config;
use database::establish_connection;
use engine::AutomationEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub engine: Arc<AutomationEngine>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    // The host build pipeline imports this binary for static analysis;
    // never arm schedules or open sockets in that context.
    if config.build_phase {
        tracing::warn!("BUILD_PHASE set, engine startup suppressed");
        return Ok(());
    }

    tracing::info!("Starting pushcast on port {}", config.port);

    // Connect to database; migrations run inside establish_connection()
    let db = establish_connection(&config.database_url).await?;
    let db = Arc::new(db);

    // In-process audience generators register here; deployments wire their
    // own implementations before the engine comes up.
    let registry = GeneratorRegistry::new();

    // The engine is a process singleton: built once, shared with every
    // request handler through AppState.
    let engine = AutomationEngine::new(db.clone(), &config, registry).await;

    // Restore schedules for every active automation definition
    engine.startup_restore().await;

    // Store port before moving config into Arc
    let port = config.port;

    let state = AppState {
        db,
        engine: engine.clone(),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://localhost:{port}").parse().unwrap(),
            format!("http://127.0.0.1:{port}").parse().unwrap(),
        ])
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let app = api::create_router().layer(cors).with_state(state);

    // Start server
    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;

    println!("pushcast server listening on http://0.0.0.0:{port}");

    // Setup graceful shutdown on Ctrl+C and SIGTERM
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Release every cron handle so no zombie survives into the next boot
    engine.shutdown().await;

    tracing::info!("Application shutdown complete");
    Ok(())
}
