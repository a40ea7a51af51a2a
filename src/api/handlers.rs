//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use utoipa::ToSchema;

use crate::bot::BotStats;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Whether the bot is ready to trade.
    pub ready: Arc<AtomicBool>,
    /// Live session counters.
    pub stats: Arc<BotStats>,
    /// Simulated order API in use.
    pub dry_run: bool,
    /// Renders `/metrics` when the recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ready", &self.is_ready())
            .field("dry_run", &self.dry_run)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl AppState {
    /// State with fresh counters, not ready.
    pub fn new(dry_run: bool) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(BotStats::new()),
            dry_run,
            prometheus: None,
        }
    }

    /// Share the bot's ready flag and counters.
    pub fn with_bot(mut self, ready: Arc<AtomicBool>, stats: Arc<BotStats>) -> Self {
        self.ready = ready;
        self.stats = stats;
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Status: "ok".
    #[schema(value_type = String)]
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Pairs currently monitored.
    pub active_pairs: usize,
}

/// Status response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// "running" or "starting".
    #[schema(value_type = String)]
    pub status: &'static str,
    /// "simulation" or "live".
    #[schema(value_type = String)]
    pub mode: &'static str,
    /// Last balance read was verified.
    pub trading_enabled: bool,
    /// Statistics.
    pub stats: StatsResponse,
}

/// Statistics in status response. Money values are decimal strings.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub active_pairs: usize,
    pub price_updates: u64,
    pub opportunities_found: u64,
    pub trades_attempted: u64,
    pub trades_executed: u64,
    pub compensations: u64,
    pub exposures: u64,
    pub missed_no_balance: u64,
    pub total_pnl: String,
    pub missed_profit: String,
}

/// Health check handler - always returns 200.
#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, body = ReadyResponse),
        (status = 503, body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        active_pairs: state.stats.snapshot().active_pairs,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns bot status and statistics.
#[utoipa::path(get, path = "/api/v1/status", responses((status = 200, body = StatusResponse)))]
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.stats.snapshot();
    let status = if state.is_ready() { "running" } else { "starting" };

    Json(StatusResponse {
        status,
        mode: if state.dry_run { "simulation" } else { "live" },
        trading_enabled: snap.trading_enabled,
        stats: StatsResponse {
            uptime_seconds: snap.uptime_seconds,
            active_pairs: snap.active_pairs,
            price_updates: snap.price_updates,
            opportunities_found: snap.opportunities_found,
            trades_attempted: snap.trades_attempted,
            trades_executed: snap.trades_executed,
            compensations: snap.compensations,
            exposures: snap.exposures,
            missed_no_balance: snap.missed_no_balance,
            total_pnl: snap.total_pnl.to_string(),
            missed_profit: snap.missed_profit.round_dp(4).to_string(),
        },
    })
}

/// Prometheus text exposition, 404 when metrics are disabled.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
