//! DTOs for the operational metrics endpoints.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::metrics::EmailTimeline;
use crate::signals::{SignalDebugEvent, SignalMode};

/// `GET /metrics/suppress-signals`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuppressSignalsResponse {
    /// Active channel.
    pub mode: SignalMode,
    /// Signals received since startup.
    pub count: u64,
    /// Message ids currently holding a signal.
    pub active_email_ids: usize,
    /// Signal lifetime in milliseconds.
    pub ttl_ms: i64,
    /// Debug ring, oldest first.
    pub recent: Vec<SignalDebugEvent>,
}

/// `GET /metrics/suppression-debug`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuppressionDebugResponse {
    /// Active channel.
    pub mode: SignalMode,
    /// Message ids currently holding a signal.
    pub active_email_ids: usize,
    /// Signal lifetime in milliseconds.
    pub ttl_ms: i64,
    /// Debug ring, oldest first.
    pub recent_events: Vec<SignalDebugEvent>,
    /// Debug ring grouped per message.
    pub by_email: BTreeMap<String, EmailTimeline>,
}
