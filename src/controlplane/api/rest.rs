//! DR Health Handlers
//!
//! `GET /healthz?mode={active|standby|disable}` reports the DR health of the
//! local cluster. Active and disabled clusters are always up; a standby
//! cluster reports the replication verdict.

use crate::crd::DrMode;
use crate::metrics::DrMetrics;
use crate::replication::ReplicationChecker;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query string of the health endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

/// Health response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builder of the DR health router
pub struct HealthRouter {
    checker: ReplicationChecker,
    metrics: Option<Arc<DrMetrics>>,
    verbose: bool,
}

impl HealthRouter {
    pub fn new(checker: ReplicationChecker) -> Self {
        Self {
            checker,
            metrics: None,
            verbose: false,
        }
    }

    /// Record every standby verdict in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<DrMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Log every response body at debug level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = HealthState {
            checker: self.checker,
            metrics: self.metrics,
            verbose: self.verbose,
        };

        Router::new()
            .route("/healthz", get(dr_health))
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[derive(Clone)]
struct HealthState {
    checker: ReplicationChecker,
    metrics: Option<Arc<DrMetrics>>,
    verbose: bool,
}

// =============================================================================
// Handlers
// =============================================================================

async fn dr_health(State(state): State<HealthState>, Query(query): Query<HealthQuery>) -> impl IntoResponse {
    let (code, body) = evaluate(&state, query.mode.as_deref()).await;
    if state.verbose {
        debug!("DR health response [{}]: {:?}", code, body);
    }
    (code, Json(body))
}

async fn evaluate(state: &HealthState, mode: Option<&str>) -> (StatusCode, HealthResponse) {
    let down = (StatusCode::INTERNAL_SERVER_ERROR, HealthResponse::new("down"));
    let mode = match mode.and_then(DrMode::parse) {
        Some(mode) => mode,
        None => {
            error!("DR health requested with missing or unknown mode: {:?}", mode);
            return down;
        }
    };

    match mode {
        DrMode::Active | DrMode::Disable => (StatusCode::OK, HealthResponse::new("up")),
        DrMode::Standby => match state.checker.check_replication().await {
            Ok(verdict) => {
                if let Some(metrics) = &state.metrics {
                    metrics.set_verdict(verdict);
                }
                (StatusCode::OK, HealthResponse::new(verdict.as_str()))
            }
            Err(e) => {
                error!("Replication status cannot be checked: {}", e);
                down
            }
        },
    }
}
