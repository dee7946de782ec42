use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use mindwell_backend::api;
use mindwell_backend::config::AppConfig;
use mindwell_backend::database::directory_repository::DirectoryRepository;
use mindwell_backend::database::donation_repository::DonationRepository;
use mindwell_backend::database::init_pool_from_config;
use mindwell_backend::gateways::factory::GatewayRegistry;
use mindwell_backend::health::{HealthChecker, HealthStatus};
use mindwell_backend::logging::init_tracing;
use mindwell_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use mindwell_backend::services::{
    DonationOrchestrator, OrchestratorConfig, ReconciliationDispatcher,
};
use mindwell_backend::workers::{StaleDonationSweeper, SweeperConfig};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting Mindwell backend service"
    );

    // Database pool
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;
    info!(
        max_connections = config.database.max_connections,
        "Database connection pool initialized"
    );

    // Gateway adapters are built once so the mobile-money token cache
    // survives across requests.
    let registry = Arc::new(GatewayRegistry::from_env().map_err(|e| {
        error!("Failed to configure payment gateways: {}", e);
        anyhow::anyhow!(e.to_string())
    })?);
    info!(rails = ?registry.enabled_rails(), "Payment gateways configured");

    let ledger = Arc::new(DonationRepository::new(db_pool.clone()));
    let directory = Arc::new(DirectoryRepository::new(db_pool.clone()));
    let health_checker = HealthChecker::new(db_pool.clone());

    let orchestrator = Arc::new(DonationOrchestrator::new(
        ledger.clone(),
        directory,
        registry.clone(),
        OrchestratorConfig::from_env(),
    ));
    let dispatcher = Arc::new(ReconciliationDispatcher::new(registry, ledger.clone()));

    // Background sweeper for donations whose gateway never called back
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper = StaleDonationSweeper::new(ledger.clone(), SweeperConfig::from_env());
    let sweeper_handle = tokio::spawn(sweeper.run(worker_shutdown_rx));
    info!("Stale donation sweeper started");

    // Routes
    let donation_state = api::donations::DonationState { orchestrator };
    let donation_routes = Router::new()
        .route("/api/donations", post(api::donations::create_donation))
        .route("/api/donations", get(api::donations::list_donations))
        .route("/api/donations/{id}", get(api::donations::get_donation))
        .route(
            "/api/donations/{id}/cancel",
            post(api::donations::cancel_donation),
        )
        .route(
            "/api/providers/{id}/donations/total",
            get(api::donations::provider_donation_total),
        )
        .with_state(donation_state);

    let webhook_state = Arc::new(api::webhooks::WebhookState { dispatcher });
    let webhook_routes = Router::new()
        .route("/webhooks/{rail}", post(api::webhooks::handle_webhook))
        .with_state(webhook_state);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(donation_routes)
        .merge(webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    match tokio::time::timeout(std::time::Duration::from_secs(5), sweeper_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Sweeper task failed during shutdown"),
        Err(_) => error!("Timed out waiting for sweeper shutdown"),
    }

    info!("Server shutdown complete");
    Ok(())
}

// Application state for the base routes
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "Welcome to Mindwell Backend API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(
        health_status.status,
        mindwell_backend::health::HealthState::Unhealthy
    ) {
        error!("Health check failed, service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
