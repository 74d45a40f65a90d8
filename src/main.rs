//! Credit Scoring API - Main Entry Point
//!
//! Loads the model from disk, opens the audit store and serves the scoring
//! endpoints until interrupted.

use anyhow::{Context, Result};
use credit_scoring_service::{
    api::{api_routes, AppState},
    audit::AuditLog,
    config::AppConfig,
    lifecycle::ModelManager,
    metrics::{MetricsReporter, ServiceMetrics},
    remote::HubClient,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    credit_scoring_service::init_tracing(&config.logging.level, &config.logging.format)?;

    info!("Starting Credit Scoring API");
    info!(
        model_dir = %config.model.model_dir.display(),
        default_threshold = config.model.default_threshold,
        "Configuration loaded successfully"
    );
    if let Some(uri) = &config.remote.tracking_uri {
        info!(tracking_uri = %uri, "Model tracking server");
    }

    // Initialize metrics
    let metrics = Arc::new(ServiceMetrics::new());

    // Load the serving model
    let store = Arc::new(HubClient::from_config(&config.remote));
    let manager = Arc::new(ModelManager::new(config.model.clone(), store));
    let loader = Arc::clone(&manager);
    match tokio::task::spawn_blocking(move || loader.load()).await? {
        Some(backend) => {
            info!(backend = %backend.kind(), "Model loaded");
            manager.publish(backend);
        }
        None => warn!("No model loaded; scoring returns 503 until /reload_model succeeds"),
    }

    // Open the audit store
    let audit = if config.audit.enabled {
        match AuditLog::connect(&config.audit).await {
            Ok(log) => Some(log),
            Err(e) => {
                error!(error = %format!("{:#}", e), "Audit log unavailable, serving without it");
                None
            }
        }
    } else {
        info!("Audit log disabled");
        None
    };

    // Start metrics reporter
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = AppState::new(
        manager,
        config.model.default_threshold,
        config.remote.clone(),
        audit,
        metrics.clone(),
    );
    let routes = api_routes(state);

    let ip: IpAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %bound, "Listening");
    server.await;

    // Print final summary
    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
