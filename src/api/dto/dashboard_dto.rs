//! DTOs for the dashboard API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::persistence::{OpenEvent, TrackedEmail};

/// One row of `GET /dashboard/api/emails`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardEmail {
    /// Message id.
    pub email_id: String,
    /// Sending user.
    pub user_id: String,
    /// Recipient as issued.
    pub recipient: String,
    /// Sender mailbox, when known.
    pub sender_email: Option<String>,
    /// Send time.
    pub sent_at: DateTime<Utc>,
    /// Genuine opens.
    pub open_count: i64,
    /// `open_count > 0`.
    pub opened: bool,
    /// First time the row was written.
    pub created_at: DateTime<Utc>,
}

impl From<TrackedEmail> for DashboardEmail {
    fn from(row: TrackedEmail) -> Self {
        Self {
            opened: row.open_count > 0,
            email_id: row.email_id,
            user_id: row.user_id,
            recipient: row.recipient,
            sender_email: row.sender_email,
            sent_at: row.sent_at,
            open_count: row.open_count,
            created_at: row.created_at,
        }
    }
}

/// Query of `GET /dashboard/api/open-events`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OpenEventsQuery {
    /// Restrict to one message; blank means all.
    #[serde(default)]
    pub email_id: Option<String>,
}

/// `GET /dashboard/api/emails` body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmailListResponse {
    /// Always `true`.
    pub ok: bool,
    /// Most recently created first.
    pub items: Vec<DashboardEmail>,
}

/// `GET /dashboard/api/open-events` body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenEventListResponse {
    /// Always `true`.
    pub ok: bool,
    /// Most recent first.
    pub items: Vec<OpenEvent>,
}
