//! HTTP server module
//!
//! Provides the Axum-based HTTP server for the custom metrics API, health and
//! self metrics, plus the background task that keeps the catalog fresh.

pub mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics::AdapterMetrics;
use crate::provider::{MetricsProvider, ResourceLister, StaticResourceLister};
use crate::store::PrometheusClient;

/// Base path of the custom metrics API
pub const API_PREFIX: &str = "/apis/custom.metrics.k8s.io/v1beta1";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Engine, catalog and collaborators
    pub provider: Arc<MetricsProvider>,
    /// Configuration file re-read on reload
    pub config_path: Option<Arc<PathBuf>>,
}

/// Build the provider described by a configuration
///
/// # Errors
/// Returns an error if the Prometheus client cannot be created or a rule fails to compile
pub fn build_provider(config: &Config) -> Result<MetricsProvider> {
    let mut client = PrometheusClient::new(&config.prometheus.url, config.prometheus.timeout_ms)?;
    if let (Some(username), Some(password)) =
        (&config.prometheus.username, &config.prometheus.password)
    {
        client = client.with_auth(username, password);
    }

    let engine = config.compile_rules()?;

    let lister: Option<Arc<dyn ResourceLister>> = if config.objects.is_empty() {
        None
    } else {
        Some(Arc::new(StaticResourceLister::from_config(&config.objects)))
    };

    Ok(MetricsProvider::new(
        engine,
        Arc::new(client),
        lister,
        Arc::new(AdapterMetrics::new()),
    ))
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::self_metrics))
        .route("/-/reload", post(handlers::reload))
        .route(API_PREFIX, get(handlers::api_resources))
        .route(&format!("{}/*path", API_PREFIX), get(handlers::metric_values))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Re-run discovery at a fixed interval
pub fn spawn_refresh(provider: Arc<MetricsProvider>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already ran discovery
        ticker.tick().await;

        loop {
            ticker.tick().await;
            provider.refresh().await;
        }
    })
}

/// Run the HTTP server
///
/// # Arguments
/// * `config` - Application configuration
/// * `config_path` - File re-read by `POST /-/reload`, if any
///
/// # Errors
/// Returns an error if the server fails to start
pub async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let provider = Arc::new(build_provider(&config)?);

    let stats = provider.refresh().await;
    if stats.failed_groups > 0 {
        warn!(
            failed_groups = stats.failed_groups,
            "Initial discovery incomplete; serving a partial catalog"
        );
    }

    let refresh = spawn_refresh(
        Arc::clone(&provider),
        Duration::from_secs(config.discovery.interval_secs),
    );

    let state = AppState {
        provider,
        config_path: config_path.map(Arc::new),
    };
    let app = router(state);

    // Handle "localhost" specially, otherwise parse as IP address
    let bind_address = &config.server.bind_address;
    let bind_addr: std::net::IpAddr = if bind_address == "localhost" {
        std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        bind_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind_address '{}': {}. Use an IP address (e.g., '0.0.0.0', '127.0.0.1') or 'localhost'.", bind_address, e))?
    };
    let addr = SocketAddr::from((bind_addr, config.server.port));
    info!(
        address = %addr,
        prometheus = %config.prometheus.url,
        interval_secs = config.discovery.interval_secs,
        "Server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
