//! Compose-time API: issue pixels and read aggregated open counts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{IssuePixelRequest, MAX_COUNT_IDS, OpenCountsRequest, OpenCountsResponse};
use crate::app_state::AppState;
use crate::domain::EmailId;
use crate::error::{ErrorResponse, TrackerError};
use crate::service::IssuedPixel;

/// `POST /api/v1/pixels` — Issue a tracking pixel.
#[utoipa::path(
    post,
    path = "/api/v1/pixels",
    tag = "Pixels",
    summary = "Issue a tracking pixel",
    description = "Mints a message id and token, registers the message, and returns \
                   the tracking and heartbeat pixel URLs.",
    request_body = IssuePixelRequest,
    responses(
        (status = 201, description = "Pixel issued", body = IssuedPixel),
        (status = 400, description = "Missing user_id", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse),
    )
)]
pub async fn issue_pixel_handler(
    State(state): State<AppState>,
    Json(req): Json<IssuePixelRequest>,
) -> Result<impl IntoResponse, TrackerError> {
    let issued = state
        .issuer
        .issue(
            &req.user_id,
            req.recipient.as_deref(),
            req.sender_email.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// `POST /api/v1/opens/counts` — Aggregated open counts.
#[utoipa::path(
    post,
    path = "/api/v1/opens/counts",
    tag = "Pixels",
    summary = "Aggregated open counts",
    description = "Returns genuine open counts and first/last genuine open times for \
                   each requested message. Unknown ids report zeros.",
    request_body = OpenCountsRequest,
    responses(
        (status = 200, description = "Per-message summaries", body = OpenCountsResponse),
        (status = 400, description = "Too many or blank ids", body = ErrorResponse),
    )
)]
pub async fn open_counts_handler(
    State(state): State<AppState>,
    Json(req): Json<OpenCountsRequest>,
) -> Result<Json<OpenCountsResponse>, TrackerError> {
    if req.email_ids.len() > MAX_COUNT_IDS {
        return Err(TrackerError::InvalidRequest(format!(
            "at most {MAX_COUNT_IDS} email_ids per request"
        )));
    }
    let ids = req
        .email_ids
        .iter()
        .map(|raw| EmailId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let items = state.store.aggregated_counts(&ids).await?;
    Ok(Json(OpenCountsResponse { ok: true, items }))
}

/// Routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/pixels", post(issue_pixel_handler))
        .route("/opens/counts", post(open_counts_handler))
}
