//! Operational metrics: signal latency, signal traces, classification counters.
//!
//! All views are read-only. Expired signals are swept before each snapshot.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{SuppressSignalsResponse, SuppressionDebugResponse};
use crate::app_state::AppState;
use crate::metrics::{ClassificationCounts, LatencySummary, group_by_email};
use crate::signals::SignalSnapshot;

fn fresh_snapshot(state: &AppState) -> SignalSnapshot {
    let now = state.clock.now();
    state.signals.cleanup(now);
    state.signals.snapshot(now)
}

/// `GET /metrics/gmail-proxy-latency` — Signal-to-hit latency percentiles.
#[utoipa::path(
    get,
    path = "/metrics/gmail-proxy-latency",
    tag = "Metrics",
    summary = "Signal-to-hit latency",
    description = "Min, max, average, and nearest-rank percentiles over the \
                   retained signal-to-hit latency samples.",
    responses(
        (status = 200, description = "Latency summary", body = LatencySummary),
    )
)]
pub async fn proxy_latency_handler(State(state): State<AppState>) -> Json<LatencySummary> {
    let snapshot = fresh_snapshot(&state);
    Json(LatencySummary::from_samples(&snapshot.latency_samples))
}

/// `GET /metrics/suppress-signals` — Signal counters and recent events.
#[utoipa::path(
    get,
    path = "/metrics/suppress-signals",
    tag = "Metrics",
    summary = "Sender-signal counters",
    responses(
        (status = 200, description = "Signal counters", body = SuppressSignalsResponse),
    )
)]
pub async fn suppress_signals_handler(
    State(state): State<AppState>,
) -> Json<SuppressSignalsResponse> {
    let snapshot = fresh_snapshot(&state);
    Json(SuppressSignalsResponse {
        mode: snapshot.mode,
        count: snapshot.count,
        active_email_ids: snapshot.active_email_ids,
        ttl_ms: snapshot.ttl_ms,
        recent: snapshot.recent,
    })
}

/// `GET /metrics/suppression-debug` — Signal traces grouped per message.
#[utoipa::path(
    get,
    path = "/metrics/suppression-debug",
    tag = "Metrics",
    summary = "Per-message signal timelines",
    responses(
        (status = 200, description = "Debug traces", body = SuppressionDebugResponse),
    )
)]
pub async fn suppression_debug_handler(
    State(state): State<AppState>,
) -> Json<SuppressionDebugResponse> {
    let snapshot = fresh_snapshot(&state);
    let by_email = group_by_email(&snapshot.recent);
    Json(SuppressionDebugResponse {
        mode: snapshot.mode,
        active_email_ids: snapshot.active_email_ids,
        ttl_ms: snapshot.ttl_ms,
        recent_events: snapshot.recent,
        by_email,
    })
}

/// `GET /metrics/classifications` — Recorder outcome counters.
#[utoipa::path(
    get,
    path = "/metrics/classifications",
    tag = "Metrics",
    summary = "Classification counters",
    description = "Hits, genuine opens, duplicates, and suppressions by reason \
                   since process start.",
    responses(
        (status = 200, description = "Counters", body = ClassificationCounts),
    )
)]
pub async fn classifications_handler(State(state): State<AppState>) -> Json<ClassificationCounts> {
    Json(state.stats.snapshot())
}

/// Metrics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/metrics/gmail-proxy-latency", get(proxy_latency_handler))
        .route("/metrics/suppress-signals", get(suppress_signals_handler))
        .route("/metrics/suppression-debug", get(suppression_debug_handler))
        .route("/metrics/classifications", get(classifications_handler))
}
