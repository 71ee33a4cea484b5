//! DTOs for the sender-signal endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /mark-suppress-next`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct MarkSuppressNextRequest {
    /// Message whose next pixel hit is the sender's.
    #[serde(default)]
    pub email_id: Option<String>,
}

/// Acknowledgement of a recorded signal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarkSuppressNextResponse {
    /// Always `true`.
    pub ok: bool,
    /// Message the signal applies to.
    pub email_id: String,
    /// When the signal was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Same instant, Unix milliseconds.
    pub recorded_at_ms: i64,
}
