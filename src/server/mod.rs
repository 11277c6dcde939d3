//! HTTP server wiring: router, handlers and the serve loop

use crate::config::GatewayConfig;
use crate::health::{HealthChecker, HealthStatus};
use crate::metrics::GatewayMetrics;
use crate::relay::{RelayParams, RelayService};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub metrics: Arc<GatewayMetrics>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new());
        let relay = Arc::new(RelayService::new(config, metrics.clone())?);
        Ok(Self {
            relay,
            metrics,
            health: Arc::new(HealthChecker::new()),
        })
    }
}

/// Build the router. The relay answers on its path with and without a trailing `/`.
pub fn router(state: AppState, config: &GatewayConfig) -> Router {
    let relay_path = config.relay.path.trim_end_matches('/');

    let mut app = Router::new()
        .route(relay_path, get(relay_handler))
        .route(&format!("{}/", relay_path), get(relay_handler));

    if config.health.enabled {
        app = app.route(&config.health.path, get(health_handler));
    }
    if config.metrics.enabled {
        app = app.route(&config.metrics.path, get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let app = router(state, &config);

    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Starting gateway on {}", addr);
    info!("Relay endpoint at {}", config.relay.path);
    info!("Backend proxy endpoint {}", config.backend.proxy_endpoint());
    if config.health.enabled {
        info!("Health endpoint enabled at {}", config.health.path);
    }
    if config.metrics.enabled {
        info!("Metrics endpoint enabled at {}", config.metrics.path);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Relay handler
async fn relay_handler(
    State(state): State<AppState>,
    Query(params): Query<RelayParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.relay.relay(params, &headers).await
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.liveness();
    (
        if health.status == HealthStatus::Healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(health),
    )
}

/// Metrics handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}
