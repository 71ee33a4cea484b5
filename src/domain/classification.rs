//! Final classification of a pixel hit.
//!
//! [`Classification::decide`] is the pure "decide" step of the recorder: it
//! folds the duplicate match and the sender evidence into the immutable
//! flags persisted on the `open_events` row.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::dedup::DuplicateMatch;

/// Why a hit did not count as a genuine open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Repeat of a fetch inside the duplicate window.
    Duplicate,
    /// Fetched within the guard window after send.
    SenderGuardWindow,
    /// Same client that fetched during the guard window.
    SenderFingerprint,
    /// Matches a recent heartbeat from the sender's client.
    SenderHeartbeat,
    /// Consumed an explicit suppress-next signal.
    MarkSuppressNext,
}

impl SuppressionReason {
    /// Every reason, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Duplicate,
        Self::SenderGuardWindow,
        Self::SenderFingerprint,
        Self::SenderHeartbeat,
        Self::MarkSuppressNext,
    ];

    /// Position in [`Self::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Column value stored in `open_events.suppression_reason`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::SenderGuardWindow => "sender_guard_window",
            Self::SenderFingerprint => "sender_fingerprint",
            Self::SenderHeartbeat => "sender_heartbeat",
            Self::MarkSuppressNext => "mark_suppress_next",
        }
    }

    /// Parses a stored column value.
    #[must_use]
    pub fn from_column(raw: &str) -> Option<Self> {
        match raw {
            "duplicate" => Some(Self::Duplicate),
            "sender_guard_window" => Some(Self::SenderGuardWindow),
            "sender_fingerprint" => Some(Self::SenderFingerprint),
            "sender_heartbeat" => Some(Self::SenderHeartbeat),
            "mark_suppress_next" => Some(Self::MarkSuppressNext),
            _ => None,
        }
    }
}

/// Short window after `sent_at` in which any fetch is the sender's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderGuard {
    /// Window length.
    pub window: TimeDelta,
}

impl SenderGuard {
    /// Last instant still covered by the guard.
    #[must_use]
    pub fn boundary(&self, sent_at: DateTime<Utc>) -> DateTime<Utc> {
        sent_at + self.window
    }

    /// Fetches stamped before `sent_at` (client clock skew) are covered too.
    #[must_use]
    pub fn covers(&self, sent_at: DateTime<Utc>, opened_at: DateTime<Utc>) -> bool {
        opened_at <= self.boundary(sent_at)
    }
}

/// Evidence that a hit came from the sender rather than the recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderEvidence {
    /// The hit itself falls inside the guard window.
    pub within_guard_window: bool,
    /// An earlier fetch with this exact fingerprint fell inside it.
    pub fingerprint_seen_in_guard: bool,
    /// Reason reported by the sender-signal store, if it matched.
    pub signal: Option<SuppressionReason>,
}

impl SenderEvidence {
    /// Strongest sender reason: explicit signals first, then the guard
    /// window, then the fingerprint repeat.
    #[must_use]
    pub fn reason(&self) -> Option<SuppressionReason> {
        self.signal
            .or(self
                .within_guard_window
                .then_some(SuppressionReason::SenderGuardWindow))
            .or(self
                .fingerprint_seen_in_guard
                .then_some(SuppressionReason::SenderFingerprint))
    }
}

/// Immutable verdict for one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Matched an earlier fetch inside the duplicate window.
    pub is_duplicate: bool,
    /// Attributed to the sender.
    pub is_sender_suppressed: bool,
    /// Single reason for the audit row; sender reasons outrank duplicates.
    pub reason: Option<SuppressionReason>,
}

impl Classification {
    /// Combines the duplicate verdict and the sender evidence.
    #[must_use]
    pub fn decide(duplicate: Option<&DuplicateMatch>, sender: &SenderEvidence) -> Self {
        let sender_reason = sender.reason();
        let is_duplicate = duplicate.is_some();
        Self {
            is_duplicate,
            is_sender_suppressed: sender_reason.is_some(),
            reason: sender_reason.or(is_duplicate.then_some(SuppressionReason::Duplicate)),
        }
    }

    /// Counts toward `open_count`.
    #[must_use]
    pub const fn is_genuine(&self) -> bool {
        !self.is_duplicate && !self.is_sender_suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dedup::DuplicateStrategy;

    fn dup() -> DuplicateMatch {
        DuplicateMatch {
            strategy: DuplicateStrategy::ExactFingerprint,
            prior_id: 9,
        }
    }

    #[test]
    fn nothing_is_genuine() {
        let c = Classification::decide(None, &SenderEvidence::default());
        assert!(c.is_genuine());
        assert_eq!(c.reason, None);
    }

    #[test]
    fn duplicate_only() {
        let c = Classification::decide(Some(&dup()), &SenderEvidence::default());
        assert!(c.is_duplicate);
        assert!(!c.is_sender_suppressed);
        assert_eq!(c.reason, Some(SuppressionReason::Duplicate));
    }

    #[test]
    fn signal_outranks_guard_and_duplicate() {
        let evidence = SenderEvidence {
            within_guard_window: true,
            fingerprint_seen_in_guard: true,
            signal: Some(SuppressionReason::MarkSuppressNext),
        };
        let c = Classification::decide(Some(&dup()), &evidence);
        assert!(c.is_duplicate);
        assert!(c.is_sender_suppressed);
        assert_eq!(c.reason, Some(SuppressionReason::MarkSuppressNext));
    }

    #[test]
    fn guard_outranks_fingerprint() {
        let evidence = SenderEvidence {
            within_guard_window: true,
            fingerprint_seen_in_guard: true,
            signal: None,
        };
        assert_eq!(evidence.reason(), Some(SuppressionReason::SenderGuardWindow));
    }

    #[test]
    fn guard_covers_skewed_and_boundary_hits() {
        let guard = SenderGuard {
            window: TimeDelta::seconds(10),
        };
        let sent = DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap_or_default();
        assert!(guard.covers(sent, sent - TimeDelta::seconds(3)));
        assert!(guard.covers(sent, sent + TimeDelta::seconds(10)));
        assert!(!guard.covers(sent, sent + TimeDelta::milliseconds(10_001)));
    }

    #[test]
    fn reason_column_round_trip() {
        for reason in [
            SuppressionReason::Duplicate,
            SuppressionReason::SenderGuardWindow,
            SuppressionReason::SenderFingerprint,
            SuppressionReason::SenderHeartbeat,
            SuppressionReason::MarkSuppressNext,
        ] {
            assert_eq!(SuppressionReason::from_column(reason.as_str()), Some(reason));
        }
        assert_eq!(SuppressionReason::from_column("nope"), None);
    }
}
