//! Capped observability buffers shared by both signal channels.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{EmailId, HitFingerprint};

/// What happened to a sender signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalDebugKind {
    /// An explicit suppress-next signal was recorded.
    MarkSuppressNext,
    /// A proxy fetched the pixel.
    GoogleProxyHit,
    /// A pixel hit consumed a pending suppression.
    SuppressionConsumed,
    /// A pending suppression aged out unconsumed.
    SuppressionExpired,
    /// The sender's client pinged the heartbeat pixel.
    SenderHeartbeat,
    /// A pixel hit matched a recent heartbeat.
    HeartbeatMatched,
    /// Heartbeats for a message aged out.
    HeartbeatExpired,
}

/// One entry of the debug ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SignalDebugEvent {
    /// Event kind.
    pub event: SignalDebugKind,
    /// Message the event concerns.
    pub email_id: String,
    /// Event time, Unix milliseconds.
    pub at_ms: i64,
    /// Normalized client address, empty when unknown.
    pub ip: String,
    /// Client agent, empty when unknown.
    pub user_agent: String,
    /// Signal-to-hit delta, when one was measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_ms: Option<i64>,
    /// Whether a suppression was pending when a proxy hit arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_suppression: Option<bool>,
}

impl SignalDebugEvent {
    /// Event attributed to a client.
    #[must_use]
    pub fn from_client(
        event: SignalDebugKind,
        email_id: &EmailId,
        at: DateTime<Utc>,
        client: &HitFingerprint,
    ) -> Self {
        Self {
            event,
            email_id: email_id.to_string(),
            at_ms: at.timestamp_millis(),
            ip: client.normalized_ip(),
            user_agent: client.user_agent.clone().unwrap_or_default(),
            delta_ms: None,
            pending_suppression: None,
        }
    }

    /// Event produced by housekeeping, with no client attached.
    #[must_use]
    pub fn housekeeping(event: SignalDebugKind, email_id: &EmailId, at: DateTime<Utc>) -> Self {
        Self {
            event,
            email_id: email_id.to_string(),
            at_ms: at.timestamp_millis(),
            ip: String::new(),
            user_agent: String::new(),
            delta_ms: None,
            pending_suppression: None,
        }
    }

    /// Attaches a measured delta.
    #[must_use]
    pub fn with_delta(mut self, delta_ms: Option<i64>) -> Self {
        self.delta_ms = delta_ms;
        self
    }

    /// Attaches the pending-suppression flag.
    #[must_use]
    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending_suppression = Some(pending);
        self
    }
}

/// Debug ring, latency samples, and the lifetime signal counter.
#[derive(Debug)]
pub struct SignalDiagnostics {
    events: VecDeque<SignalDebugEvent>,
    event_limit: usize,
    latency: VecDeque<i64>,
    latency_limit: usize,
    signal_count: u64,
}

impl SignalDiagnostics {
    /// Creates empty buffers with the given caps (minimum 1 each).
    #[must_use]
    pub fn new(event_limit: usize, latency_limit: usize) -> Self {
        Self {
            events: VecDeque::new(),
            event_limit: event_limit.max(1),
            latency: VecDeque::new(),
            latency_limit: latency_limit.max(1),
            signal_count: 0,
        }
    }

    /// Appends an event, dropping the oldest past the cap.
    pub fn push_event(&mut self, event: SignalDebugEvent) {
        self.events.push_back(event);
        while self.events.len() > self.event_limit {
            self.events.pop_front();
        }
    }

    /// Appends a latency sample, dropping the oldest past the cap.
    pub fn push_latency(&mut self, delta_ms: i64) {
        self.latency.push_back(delta_ms);
        while self.latency.len() > self.latency_limit {
            self.latency.pop_front();
        }
    }

    /// Counts one received signal.
    pub fn count_signal(&mut self) {
        self.signal_count = self.signal_count.saturating_add(1);
    }

    /// Signals received since startup.
    #[must_use]
    pub fn signal_count(&self) -> u64 {
        self.signal_count
    }

    /// Copy of the debug ring, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SignalDebugEvent> {
        self.events.iter().cloned().collect()
    }

    /// Copy of the latency samples, oldest first.
    #[must_use]
    pub fn latency_samples(&self) -> Vec<i64> {
        self.latency.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> SignalDebugEvent {
        SignalDebugEvent {
            event: SignalDebugKind::MarkSuppressNext,
            email_id: "e".to_string(),
            at_ms: n,
            ip: String::new(),
            user_agent: String::new(),
            delta_ms: None,
            pending_suppression: None,
        }
    }

    #[test]
    fn rings_are_capped() {
        let mut diag = SignalDiagnostics::new(2, 3);
        for n in 0..5 {
            diag.push_event(event(n));
            diag.push_latency(n);
        }
        let at: Vec<i64> = diag.events().iter().map(|e| e.at_ms).collect();
        assert_eq!(at, vec![3, 4]);
        assert_eq!(diag.latency_samples(), vec![2, 3, 4]);
    }

    #[test]
    fn optional_fields_are_skipped_in_json() {
        let json = serde_json::to_value(event(1)).unwrap_or_default();
        assert!(json.get("delta_ms").is_none());
        assert_eq!(
            json.get("event").and_then(|v| v.as_str()),
            Some("mark_suppress_next")
        );
    }
}
