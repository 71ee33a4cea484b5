//! Dashboard read API, guarded by the `X-Tracker-Token` header.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{
    DashboardEmail, EmailListResponse, OpenEventListResponse, OpenEventsQuery,
};
use crate::app_state::AppState;
use crate::domain::EmailId;
use crate::error::{ErrorResponse, TrackerError};

/// Header carrying the dashboard shared secret.
pub const TOKEN_HEADER: &str = "x-tracker-token";

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), TrackerError> {
    let Some(expected) = state.dashboard_token.as_deref() else {
        return Err(TrackerError::Unauthorized);
    };
    let presented = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(TrackerError::Unauthorized),
    }
}

/// `GET /dashboard/api/emails` — Tracked messages.
#[utoipa::path(
    get,
    path = "/dashboard/api/emails",
    tag = "Dashboard",
    summary = "List tracked messages",
    params(("X-Tracker-Token" = String, Header, description = "Dashboard secret")),
    responses(
        (status = 200, description = "Tracked messages, newest first", body = EmailListResponse),
        (status = 401, description = "Missing or wrong token", body = ErrorResponse),
    )
)]
pub async fn list_emails_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EmailListResponse>, TrackerError> {
    authorize(&state, &headers)?;
    let items = state
        .store
        .list_emails()
        .await?
        .into_iter()
        .map(DashboardEmail::from)
        .collect();
    Ok(Json(EmailListResponse { ok: true, items }))
}

/// `GET /dashboard/api/open-events` — Recorded pixel hits.
#[utoipa::path(
    get,
    path = "/dashboard/api/open-events",
    tag = "Dashboard",
    summary = "List open events",
    params(
        ("X-Tracker-Token" = String, Header, description = "Dashboard secret"),
        OpenEventsQuery,
    ),
    responses(
        (status = 200, description = "Open events, newest first", body = OpenEventListResponse),
        (status = 401, description = "Missing or wrong token", body = ErrorResponse),
    )
)]
pub async fn list_open_events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OpenEventsQuery>,
) -> Result<Json<OpenEventListResponse>, TrackerError> {
    authorize(&state, &headers)?;
    let filter = query
        .email_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(EmailId::parse)
        .transpose()?;
    let items = state.store.list_open_events(filter.as_ref()).await?;
    Ok(Json(OpenEventListResponse { ok: true, items }))
}

/// Dashboard routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard/api/emails", get(list_emails_handler))
        .route("/dashboard/api/open-events", get(list_open_events_handler))
}
