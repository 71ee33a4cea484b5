//! Row models for the tracking tables.
//!
//! Rows store timestamps as Unix milliseconds; the models carry
//! `DateTime<Utc>` and convert at the boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Classification, DeviceType, GeoDetails, SuppressionReason, TrackingPayload};

/// Converts a stored millisecond column back to a timestamp.
#[must_use]
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// A `tracked_emails` row.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrackedEmail {
    /// Message id.
    pub email_id: String,
    /// Sending user.
    pub user_id: String,
    /// Recipient address as issued.
    pub recipient: String,
    /// Sender mailbox, when known.
    pub sender_email: Option<String>,
    /// Send time.
    pub sent_at: DateTime<Utc>,
    /// Genuine opens so far.
    pub open_count: i64,
    /// First time the row was written.
    pub created_at: DateTime<Utc>,
}

/// Raw column tuple of `tracked_emails`.
pub(crate) type TrackedEmailRow = (String, String, String, Option<String>, i64, i64, i64);

impl From<TrackedEmailRow> for TrackedEmail {
    fn from(row: TrackedEmailRow) -> Self {
        let (email_id, user_id, recipient, sender_email, sent_at_ms, open_count, created_at_ms) =
            row;
        Self {
            email_id,
            user_id,
            recipient,
            sender_email,
            sent_at: from_millis(sent_at_ms),
            open_count,
            created_at: from_millis(created_at_ms),
        }
    }
}

/// An `open_events` row.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OpenEvent {
    /// Row id.
    pub id: i64,
    /// Message id.
    pub email_id: String,
    /// Sending user.
    pub user_id: String,
    /// Recipient address as issued.
    pub recipient: String,
    /// Fetch time.
    pub opened_at: DateTime<Utc>,
    /// Client address.
    pub ip_address: Option<String>,
    /// Client agent.
    pub user_agent: Option<String>,
    /// Country.
    pub geo_country: Option<String>,
    /// Region.
    pub geo_region: Option<String>,
    /// City.
    pub geo_city: Option<String>,
    /// Latitude.
    pub latitude: Option<f64>,
    /// Longitude.
    pub longitude: Option<f64>,
    /// Device class.
    pub device_type: DeviceType,
    /// Matched an earlier fetch.
    pub is_duplicate: bool,
    /// Attributed to the sender.
    pub is_sender_suppressed: bool,
    /// Why the fetch did not count, if it did not.
    pub suppression_reason: Option<SuppressionReason>,
}

/// Column list shared by every `open_events` read.
pub(crate) const OPEN_EVENT_COLUMNS: &str = "id, email_id, user_id, recipient, opened_at_ms, \
     ip_address, user_agent, geo_country, geo_region, geo_city, latitude, longitude, \
     device_type, is_duplicate, is_sender_suppressed, suppression_reason";

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for OpenEvent {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let device_type: String = row.try_get("device_type")?;
        let reason: Option<String> = row.try_get("suppression_reason")?;
        Ok(Self {
            id: row.try_get("id")?,
            email_id: row.try_get("email_id")?,
            user_id: row.try_get("user_id")?,
            recipient: row.try_get("recipient")?,
            opened_at: from_millis(row.try_get("opened_at_ms")?),
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            geo_country: row.try_get("geo_country")?,
            geo_region: row.try_get("geo_region")?,
            geo_city: row.try_get("geo_city")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            device_type: DeviceType::from_column(&device_type),
            is_duplicate: row.try_get("is_duplicate")?,
            is_sender_suppressed: row.try_get("is_sender_suppressed")?,
            suppression_reason: reason.as_deref().and_then(SuppressionReason::from_column),
        })
    }
}

/// Values for one `open_events` insert.
#[derive(Debug, Clone)]
pub struct NewOpenEvent<'a> {
    /// Decoded token.
    pub payload: &'a TrackingPayload,
    /// Fetch time.
    pub opened_at: DateTime<Utc>,
    /// Client address.
    pub ip_address: Option<&'a str>,
    /// Client agent.
    pub user_agent: Option<&'a str>,
    /// Best-effort location.
    pub geo: GeoDetails,
    /// Device class.
    pub device_type: DeviceType,
    /// Final verdict.
    pub classification: Classification,
}

/// Values for one `sender_heartbeats` insert.
#[derive(Debug, Clone)]
pub struct NewHeartbeat<'a> {
    /// Decoded token.
    pub payload: &'a TrackingPayload,
    /// When the heartbeat arrived.
    pub seen_at: DateTime<Utc>,
    /// Client address.
    pub ip_address: Option<&'a str>,
    /// Client agent.
    pub user_agent: Option<&'a str>,
}

/// Open totals for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EmailOpenSummary {
    /// Message id.
    pub email_id: String,
    /// Genuine opens.
    pub open_count: i64,
    /// `open_count > 0`.
    pub opened: bool,
    /// Every recorded fetch, genuine or not.
    pub total_hits: i64,
    /// First genuine open.
    pub first_opened_at: Option<DateTime<Utc>>,
    /// Latest genuine open.
    pub last_opened_at: Option<DateTime<Utc>>,
}

impl EmailOpenSummary {
    /// Summary for a message the store has never seen.
    #[must_use]
    pub fn unknown(email_id: String) -> Self {
        Self {
            email_id,
            open_count: 0,
            opened: false,
            total_hits: 0,
            first_opened_at: None,
            last_opened_at: None,
        }
    }
}
