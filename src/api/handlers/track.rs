//! Pixel, heartbeat, and sender-signal endpoints.
//!
//! The pixel routes answer with the same static GIF no matter what happens
//! behind them. Recording runs on a detached task, so neither latency nor
//! status code reveals the classification.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::client::ClientMeta;
use crate::api::dto::{MarkSuppressNextRequest, MarkSuppressNextResponse};
use crate::api::pixel::{pixel_response, token_from_file};
use crate::app_state::AppState;
use crate::domain::{EmailId, TrackingPayload, token};
use crate::error::{ErrorResponse, TrackerError};
use crate::service::PixelHit;

fn decode_or_log(state: &AppState, file: &str, route: &'static str) -> Option<TrackingPayload> {
    match token::decode(token_from_file(file)) {
        Ok(payload) => Some(payload),
        Err(e) => {
            state.stats.observe_invalid_token();
            tracing::warn!(route, error = %e, "dropping pixel request with invalid token");
            None
        }
    }
}

/// `GET /t/{token}.gif` — Tracking pixel.
#[utoipa::path(
    get,
    path = "/t/{file}",
    tag = "Tracking",
    summary = "Tracking pixel",
    description = "Records an open attempt and returns a 1x1 transparent GIF. \
                   The response is identical for valid, invalid, and failed hits.",
    params(("file" = String, Path, description = "Pixel token, optionally suffixed with `.gif`")),
    responses(
        (status = 200, description = "Transparent GIF", content_type = "image/gif"),
    )
)]
pub async fn pixel_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    client: ClientMeta,
) -> Response {
    if let Some(payload) = decode_or_log(&state, &file, "pixel") {
        let hit = PixelHit {
            payload,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            opened_at: state.clock.now(),
        };
        let recorder = Arc::clone(&state.recorder);
        tokio::spawn(async move {
            // Failures are counted and logged by the recorder.
            let _ = recorder.record(hit).await;
        });
    }
    pixel_response()
}

/// `GET /h/{token}.gif` — Sender heartbeat pixel.
#[utoipa::path(
    get,
    path = "/h/{file}",
    tag = "Tracking",
    summary = "Sender heartbeat",
    description = "Records that the sender's own client rendered the message. \
                   Always returns the transparent GIF.",
    params(("file" = String, Path, description = "Pixel token, optionally suffixed with `.gif`")),
    responses(
        (status = 200, description = "Transparent GIF", content_type = "image/gif"),
    )
)]
pub async fn heartbeat_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    client: ClientMeta,
) -> Response {
    if let Some(payload) = decode_or_log(&state, &file, "heartbeat") {
        let source = state
            .recorder
            .fingerprint(client.ip_address, client.user_agent);
        let seen_at = state.clock.now();
        let recorder = Arc::clone(&state.recorder);
        tokio::spawn(async move {
            if let Err(e) = recorder.record_heartbeat(&payload, &source, seen_at).await {
                tracing::debug!(email_id = %payload.email_id, error = %e, "heartbeat ignored");
            }
        });
    }
    pixel_response()
}

/// `POST /mark-suppress-next` — Flag the next pixel hit as the sender's.
#[utoipa::path(
    post,
    path = "/mark-suppress-next",
    tag = "Tracking",
    summary = "Mark the next hit as sender-originated",
    description = "Records a consume-once suppression signal for `email_id`. \
                   Available when the explicit signal channel is active.",
    request_body = MarkSuppressNextRequest,
    responses(
        (status = 200, description = "Signal recorded", body = MarkSuppressNextResponse),
        (status = 400, description = "Missing email_id", body = ErrorResponse),
        (status = 409, description = "Explicit channel not active", body = ErrorResponse),
    )
)]
pub async fn mark_suppress_next_handler(
    State(state): State<AppState>,
    client: ClientMeta,
    body: Bytes,
) -> Result<Json<MarkSuppressNextResponse>, TrackerError> {
    let request: MarkSuppressNextRequest = serde_json::from_slice(&body).unwrap_or_default();
    let email_id = EmailId::parse(request.email_id.as_deref().unwrap_or_default())?;

    let source = state
        .recorder
        .fingerprint(client.ip_address, client.user_agent);
    let recorded_at = state
        .signals
        .mark_suppress_next(&email_id, &source, state.clock.now())?;

    Ok(Json(MarkSuppressNextResponse {
        ok: true,
        email_id: email_id.as_str().to_string(),
        recorded_at,
        recorded_at_ms: recorded_at.timestamp_millis(),
    }))
}

/// Pixel routes. Mounted without the request timeout.
pub fn pixel_routes() -> Router<AppState> {
    Router::new()
        .route("/t/{file}", get(pixel_handler))
        .route("/h/{file}", get(heartbeat_handler))
}

/// Sender-signal routes.
pub fn signal_routes() -> Router<AppState> {
    Router::new().route("/mark-suppress-next", post(mark_suppress_next_handler))
}
