//! Identity payload carried inside a pixel token.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

use super::EmailId;

/// Decoded pixel-token identity.
///
/// Ephemeral: built by the issuer, transported inside the token, and decoded
/// again on every pixel hit. `sent_at` carries millisecond precision, which
/// is what the wire format preserves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingPayload {
    /// Sender account identifier.
    pub user_id: String,
    /// Tracked message identifier.
    pub email_id: EmailId,
    /// Recipient address as typed by the sender.
    pub recipient: String,
    /// Sender address, when the client knew it.
    pub sender_email: Option<String>,
    /// Send timestamp.
    pub sent_at: DateTime<Utc>,
}

impl TrackingPayload {
    /// Builds a payload, truncating `sent_at` to whole milliseconds and
    /// dropping a blank `sender_email`.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        email_id: EmailId,
        recipient: impl Into<String>,
        sender_email: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email_id,
            recipient: recipient.into(),
            sender_email: sender_email
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            sent_at: truncate_millis(sent_at),
        }
    }
}

/// Drops sub-millisecond precision.
#[must_use]
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(at)
}
