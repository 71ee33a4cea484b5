//! HTTP endpoint handlers organized by resource.

pub mod dashboard;
pub mod metrics;
pub mod pixels;
pub mod system;
pub mod track;

use axum::Router;

use crate::app_state::AppState;

/// Composes the JSON API: `/api/v1`, signals, metrics, dashboard.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", pixels::routes())
        .merge(track::signal_routes())
        .merge(metrics::routes())
        .merge(dashboard::routes())
}
