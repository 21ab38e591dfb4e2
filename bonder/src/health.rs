//! Health check and metrics HTTP server
//!
//! Provides endpoints for Kubernetes health checks and monitoring:
//! - GET /health - Liveness check (always returns 200 if server is running)
//! - GET /ready - Readiness check (every watcher running and not failing)
//! - GET /metrics - Prometheus-compatible metrics
//! - GET /records - JSON dump of the state store

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::settlement::RootBook;
use crate::store::StateStore;
use crate::types::{ChainRecord, RecordKind, RootState};
use crate::watcher::{PollingWatcher, WatcherStatus};

/// Consecutive failed polls after which a watcher counts as unhealthy
pub const MAX_CONSECUTIVE_FAILURES: u64 = 3;

/// Health server state shared across handlers
pub struct HealthState {
    /// Service start time for uptime calculation
    pub start_time: Instant,

    /// Latest observations
    pub store: Arc<dyn StateStore>,

    /// Watchers whose health makes up readiness
    pub watchers: Vec<Arc<PollingWatcher>>,

    /// Root projection, when the settlement engine is running
    pub book: Option<RootBook>,
}

impl HealthState {
    pub fn new(store: Arc<dyn StateStore>, watchers: Vec<Arc<PollingWatcher>>) -> Self {
        Self {
            start_time: Instant::now(),
            store,
            watchers,
            book: None,
        }
    }

    pub fn with_book(mut self, book: RootBook) -> Self {
        self.book = Some(book);
        self
    }

    /// Ready when there is at least one watcher and every one of them is
    /// running without a streak of failures.
    pub fn is_ready(&self) -> bool {
        !self.watchers.is_empty() && self.watchers.iter().all(|w| watcher_healthy(&w.status()))
    }
}

fn watcher_healthy(status: &WatcherStatus) -> bool {
    status.running && status.stats.consecutive_failures < MAX_CONSECUTIVE_FAILURES
}

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub watchers: Vec<WatcherStatus>,
}

/// Health check handler - liveness
async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check handler
async fn ready_handler(State(state): State<Arc<HealthState>>) -> Response {
    let response = ReadyResponse {
        ready: state.is_ready(),
        watchers: state.watchers.iter().map(|w| w.status()).collect(),
    };

    if response.ready {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

/// Metrics handler - Prometheus format
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# HELP hop_bonder_polls_total Watcher poll iterations");
    let _ = writeln!(out, "# TYPE hop_bonder_polls_total counter");
    for w in &state.watchers {
        let status = w.status();
        let _ = writeln!(
            out,
            "hop_bonder_polls_total{{watcher=\"{}\",chain=\"{}\",status=\"ok\"}} {}",
            status.name, status.chain, status.stats.polls_ok
        );
        let _ = writeln!(
            out,
            "hop_bonder_polls_total{{watcher=\"{}\",chain=\"{}\",status=\"failed\"}} {}",
            status.name, status.chain, status.stats.polls_failed
        );
    }

    let _ = writeln!(out, "\n# HELP hop_bonder_gas_price_wei Latest observed gas price");
    let _ = writeln!(out, "# TYPE hop_bonder_gas_price_wei gauge");
    match state.store.records() {
        Ok(records) => {
            for record in records.iter().filter(|r| r.kind == RecordKind::GasPrice) {
                let _ = writeln!(
                    out,
                    "hop_bonder_gas_price_wei{{chain=\"{}\"}} {}",
                    record.chain, record.value
                );
            }
        }
        Err(e) => warn!(error = %e, "State store unreadable for metrics"),
    }

    if let Some(book) = &state.book {
        let _ = writeln!(out, "\n# HELP hop_bonder_transfer_roots Tracked transfer roots by state");
        let _ = writeln!(out, "# TYPE hop_bonder_transfer_roots gauge");
        for root_state in [
            RootState::Committed,
            RootState::Bonded,
            RootState::Challenged,
            RootState::ResolvedValid,
            RootState::ResolvedFraudulent,
            RootState::Settled,
        ] {
            let _ = writeln!(
                out,
                "hop_bonder_transfer_roots{{state=\"{}\"}} {}",
                root_state.as_str(),
                book.in_state(root_state).len()
            );
        }
    }

    let _ = writeln!(out, "\n# HELP hop_bonder_uptime_seconds Service uptime in seconds");
    let _ = writeln!(out, "# TYPE hop_bonder_uptime_seconds gauge");
    let _ = writeln!(out, "hop_bonder_uptime_seconds {}", state.start_time.elapsed().as_secs());

    let _ = writeln!(out, "\n# HELP hop_bonder_ready Whether every watcher is healthy");
    let _ = writeln!(out, "# TYPE hop_bonder_ready gauge");
    let _ = writeln!(out, "hop_bonder_ready {}", u8::from(state.is_ready()));

    out
}

/// Records handler - JSON dump of the state store
async fn records_handler(State(state): State<Arc<HealthState>>) -> Response {
    match state.store.records() {
        Ok(records) => Json::<Vec<ChainRecord>>(records).into_response(),
        Err(e) => {
            warn!(error = %e, "State store unreadable");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/records", get(records_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health server that runs alongside the watcher fleet
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }

    /// Run the health server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = create_router(Arc::clone(&self.state));

        info!(port = self.port, "Health server starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
