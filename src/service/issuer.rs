//! Compose-time pixel issuing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Clock, EmailId, TrackingPayload, token};
use crate::error::TrackerError;
use crate::persistence::SqliteStore;

/// Recipient recorded when the client could not read one.
pub const UNKNOWN_RECIPIENT: &str = "unknown";

/// A freshly minted tracking pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IssuedPixel {
    /// Opaque token embedded in both URLs.
    pub token: String,
    /// Tracking pixel to embed in the message body.
    pub pixel_url: String,
    /// Heartbeat pixel for the sender's own client.
    pub heartbeat_url: String,
    /// New message id.
    #[schema(value_type = String)]
    pub email_id: EmailId,
    /// Send time baked into the token.
    pub sent_at: DateTime<Utc>,
}

/// Mints payloads, encodes tokens, and registers the message row.
#[derive(Debug, Clone)]
pub struct PixelIssuer {
    store: SqliteStore,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl PixelIssuer {
    /// Creates an issuer building URLs under `base_url`.
    #[must_use]
    pub fn new(store: SqliteStore, clock: Arc<dyn Clock>, base_url: &str) -> Self {
        Self {
            store,
            clock,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Issues a pixel for one outgoing message.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidRequest`] for a blank `user_id` and
    /// [`TrackerError::PersistenceFailure`] if registration fails.
    pub async fn issue(
        &self,
        user_id: &str,
        recipient: Option<&str>,
        sender_email: Option<&str>,
    ) -> Result<IssuedPixel, TrackerError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(TrackerError::InvalidRequest("user_id is required".into()));
        }
        let recipient = recipient
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(UNKNOWN_RECIPIENT);

        let now = self.clock.now();
        let payload = TrackingPayload::new(
            user_id,
            EmailId::generate(),
            recipient,
            sender_email.map(str::to_string),
            now,
        );
        self.store.register(&payload, now).await?;

        let token = token::encode(&payload);
        tracing::info!(email_id = %payload.email_id, "pixel issued");
        Ok(IssuedPixel {
            pixel_url: format!("{}/t/{token}.gif", self.base_url),
            heartbeat_url: format!("{}/h/{token}.gif", self.base_url),
            token,
            email_id: payload.email_id,
            sent_at: payload.sent_at,
        })
    }
}
