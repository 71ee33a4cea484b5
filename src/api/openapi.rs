//! OpenAPI document for every HTTP endpoint.

use utoipa::OpenApi;

use crate::api::dto::{
    DashboardEmail, EmailListResponse, IssuePixelRequest, MarkSuppressNextRequest,
    MarkSuppressNextResponse, OpenCountsRequest, OpenCountsResponse, OpenEventListResponse,
    SuppressSignalsResponse, SuppressionDebugResponse,
};
use crate::api::handlers::{dashboard, metrics, pixels, system, track};
use crate::domain::{DeviceType, GeoDetails, SuppressionReason};
use crate::error::{ErrorBody, ErrorResponse};
use crate::metrics::{ClassificationCounts, EmailTimeline, LatencySummary};
use crate::persistence::{EmailOpenSummary, OpenEvent, TrackedEmail};
use crate::service::IssuedPixel;
use crate::signals::{SignalDebugEvent, SignalDebugKind, SignalMode};

/// Generated API description served by Swagger UI.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "open-tracker",
        description = "Email open-tracking pixel server with sender suppression and \
                       duplicate filtering."
    ),
    paths(
        track::pixel_handler,
        track::heartbeat_handler,
        track::mark_suppress_next_handler,
        pixels::issue_pixel_handler,
        pixels::open_counts_handler,
        metrics::proxy_latency_handler,
        metrics::suppress_signals_handler,
        metrics::suppression_debug_handler,
        metrics::classifications_handler,
        dashboard::list_emails_handler,
        dashboard::list_open_events_handler,
        system::health_handler,
    ),
    components(schemas(
        ErrorResponse,
        ErrorBody,
        MarkSuppressNextRequest,
        MarkSuppressNextResponse,
        IssuePixelRequest,
        IssuedPixel,
        OpenCountsRequest,
        OpenCountsResponse,
        EmailOpenSummary,
        DashboardEmail,
        EmailListResponse,
        OpenEventListResponse,
        TrackedEmail,
        OpenEvent,
        GeoDetails,
        DeviceType,
        SuppressionReason,
        LatencySummary,
        SuppressSignalsResponse,
        SuppressionDebugResponse,
        SignalDebugEvent,
        SignalDebugKind,
        SignalMode,
        EmailTimeline,
        ClassificationCounts,
        system::HealthResponse,
    )),
    tags(
        (name = "Tracking", description = "Pixel, heartbeat, and sender signals"),
        (name = "Pixels", description = "Compose-time issuing and open counts"),
        (name = "Metrics", description = "Operational views"),
        (name = "Dashboard", description = "Token-guarded read API"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;
