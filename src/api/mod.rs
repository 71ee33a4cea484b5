//! HTTP layer: route handlers, DTOs, extractors, and router composition.
//!
//! The pixel routes are mounted outside the request timeout so their
//! response never depends on how long anything takes. The JSON API
//! (`/api/v1`, signals, metrics, dashboard, health) runs under it.

pub mod client;
pub mod dto;
pub mod handlers;
pub mod openapi;
pub mod pixel;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tower_http::timeout::TimeoutLayer;

use crate::app_state::AppState;

/// Builds the complete router with every endpoint.
pub fn build_router(request_timeout: Duration) -> Router<AppState> {
    let json_api = Router::new()
        .merge(handlers::routes())
        .merge(handlers::system::routes())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::SERVICE_UNAVAILABLE,
            request_timeout,
        ));

    Router::new()
        .merge(handlers::track::pixel_routes())
        .merge(json_api)
}
