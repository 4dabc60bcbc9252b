use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use apptd::auth::AuthConfig;
use apptd::clock::SystemClock;
use apptd::config::Config;
use apptd::engine::Engine;
use apptd::http::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apptd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    apptd::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        apptd::compactor::run_compactor(compactor_engine, threshold).await;
    });

    let auth = AuthConfig::new(config.api_key.clone());
    if !auth.is_configured() {
        tracing::warn!("APPTD_API_KEY is not set; every protected request will be rejected");
    }
    let state = AppState::new(engine, config.policy.clone(), auth, Arc::new(SystemClock));
    let app = http::router(state, config.request_timeout);

    let addr = config.addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("apptd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.policy.zone());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("apptd stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight requests drain before `serve` returns.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
