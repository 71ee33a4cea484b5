//! Per-message grouping of the signal debug ring.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::signals::{SignalDebugEvent, SignalDebugKind};

/// Event timestamps for one message, bucketed by kind. Unix milliseconds,
/// oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct EmailTimeline {
    /// Explicit suppress-next signals.
    pub marks: Vec<i64>,
    /// Proxy fetches.
    pub google_proxy_hits: Vec<i64>,
    /// Consumed suppressions.
    pub consumed: Vec<i64>,
    /// Suppressions or heartbeats that aged out.
    pub expired: Vec<i64>,
    /// Heartbeats received.
    pub heartbeats: Vec<i64>,
    /// Pixel hits matched to a heartbeat.
    pub heartbeat_matches: Vec<i64>,
}

impl EmailTimeline {
    fn push(&mut self, event: &SignalDebugEvent) {
        let bucket = match event.event {
            SignalDebugKind::MarkSuppressNext => &mut self.marks,
            SignalDebugKind::GoogleProxyHit => &mut self.google_proxy_hits,
            SignalDebugKind::SuppressionConsumed => &mut self.consumed,
            SignalDebugKind::SuppressionExpired | SignalDebugKind::HeartbeatExpired => {
                &mut self.expired
            }
            SignalDebugKind::SenderHeartbeat => &mut self.heartbeats,
            SignalDebugKind::HeartbeatMatched => &mut self.heartbeat_matches,
        };
        bucket.push(event.at_ms);
    }
}

/// Groups `events` by `email_id`, keyed in lexical order.
#[must_use]
pub fn group_by_email(events: &[SignalDebugEvent]) -> BTreeMap<String, EmailTimeline> {
    let mut by_email: BTreeMap<String, EmailTimeline> = BTreeMap::new();
    for event in events {
        by_email
            .entry(event.email_id.clone())
            .or_default()
            .push(event);
    }
    by_email
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn event(kind: SignalDebugKind, email_id: &str, at_ms: i64) -> SignalDebugEvent {
        SignalDebugEvent {
            event: kind,
            email_id: email_id.to_string(),
            at_ms,
            ip: String::new(),
            user_agent: String::new(),
            delta_ms: None,
            pending_suppression: None,
        }
    }

    #[test]
    fn groups_and_buckets_events() {
        let events = vec![
            event(SignalDebugKind::MarkSuppressNext, "a", 1),
            event(SignalDebugKind::MarkSuppressNext, "b", 2),
            event(SignalDebugKind::GoogleProxyHit, "a", 3),
            event(SignalDebugKind::SuppressionConsumed, "a", 3),
            event(SignalDebugKind::SuppressionExpired, "b", 20),
            event(SignalDebugKind::SenderHeartbeat, "c", 5),
            event(SignalDebugKind::HeartbeatMatched, "c", 6),
        ];
        let grouped = group_by_email(&events);
        assert_eq!(grouped.len(), 3);

        let Some(a) = grouped.get("a") else {
            panic!("missing timeline for a");
        };
        assert_eq!(a.marks, vec![1]);
        assert_eq!(a.google_proxy_hits, vec![3]);
        assert_eq!(a.consumed, vec![3]);
        assert!(a.expired.is_empty());

        assert_eq!(grouped.get("b").map(|b| b.expired.clone()), Some(vec![20]));
        assert_eq!(
            grouped.get("c").map(|c| (c.heartbeats.clone(), c.heartbeat_matches.clone())),
            Some((vec![5], vec![6]))
        );
    }
}
