//! DTOs for compose-time issuing and open counts.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::persistence::EmailOpenSummary;

/// Most ids accepted by one counts request.
pub const MAX_COUNT_IDS: usize = 500;

/// Body of `POST /api/v1/pixels`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IssuePixelRequest {
    /// Sending user.
    pub user_id: String,
    /// Recipient address; `unknown` when absent.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Sender mailbox, when the client knows it.
    #[serde(default)]
    pub sender_email: Option<String>,
}

/// Body of `POST /api/v1/opens/counts`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OpenCountsRequest {
    /// Messages to summarize, at most [`MAX_COUNT_IDS`].
    pub email_ids: Vec<String>,
}

/// `POST /api/v1/opens/counts` body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenCountsResponse {
    /// Always `true`.
    pub ok: bool,
    /// One summary per distinct requested id, in request order.
    pub items: Vec<EmailOpenSummary>,
}
