//! Read-only operational views: latency percentiles, per-message signal
//! timelines, and in-process classification counters.
//!
//! Nothing here feeds back into classification.

pub mod latency;
pub mod timeline;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Classification, SuppressionReason};

pub use latency::LatencySummary;
pub use timeline::{EmailTimeline, group_by_email};

/// Running totals of recorder outcomes since startup.
#[derive(Debug, Default)]
pub struct ClassificationStats {
    hits: AtomicU64,
    genuine: AtomicU64,
    duplicates: AtomicU64,
    sender_suppressed: AtomicU64,
    by_reason: [AtomicU64; SuppressionReason::ALL.len()],
    invalid_tokens: AtomicU64,
    failures: AtomicU64,
}

/// Serializable copy of [`ClassificationStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ClassificationCounts {
    /// Hits that reached the recorder and were persisted.
    pub hits: u64,
    /// Hits counted as genuine opens.
    pub genuine: u64,
    /// Hits that matched an earlier fetch.
    pub duplicates: u64,
    /// Hits attributed to the sender.
    pub sender_suppressed: u64,
    /// Persisted reason per hit, keyed by reason label.
    pub by_reason: std::collections::BTreeMap<String, u64>,
    /// Pixel requests whose token could not be decoded.
    pub invalid_tokens: u64,
    /// Hits lost to persistence failures or timeouts.
    pub failures: u64,
}

impl ClassificationStats {
    /// Counts one persisted classification.
    pub fn observe(&self, classification: &Classification) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if classification.is_genuine() {
            self.genuine.fetch_add(1, Ordering::Relaxed);
        }
        if classification.is_duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        if classification.is_sender_suppressed {
            self.sender_suppressed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(counter) = classification
            .reason
            .and_then(|reason| self.by_reason.get(reason.index()))
        {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts one undecodable token.
    pub fn observe_invalid_token(&self) {
        self.invalid_tokens.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one hit lost to the store.
    pub fn observe_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals.
    #[must_use]
    pub fn snapshot(&self) -> ClassificationCounts {
        let by_reason = SuppressionReason::ALL
            .iter()
            .zip(self.by_reason.iter())
            .map(|(reason, counter)| {
                (reason.as_str().to_string(), counter.load(Ordering::Relaxed))
            })
            .collect();
        ClassificationCounts {
            hits: self.hits.load(Ordering::Relaxed),
            genuine: self.genuine.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            sender_suppressed: self.sender_suppressed.load(Ordering::Relaxed),
            by_reason,
            invalid_tokens: self.invalid_tokens.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_outcome_and_reason() {
        let stats = ClassificationStats::default();
        stats.observe(&Classification {
            is_duplicate: false,
            is_sender_suppressed: false,
            reason: None,
        });
        stats.observe(&Classification {
            is_duplicate: true,
            is_sender_suppressed: true,
            reason: Some(SuppressionReason::SenderHeartbeat),
        });
        stats.observe(&Classification {
            is_duplicate: true,
            is_sender_suppressed: false,
            reason: Some(SuppressionReason::Duplicate),
        });
        stats.observe_invalid_token();

        let counts = stats.snapshot();
        assert_eq!(counts.hits, 3);
        assert_eq!(counts.genuine, 1);
        assert_eq!(counts.duplicates, 2);
        assert_eq!(counts.sender_suppressed, 1);
        assert_eq!(counts.invalid_tokens, 1);
        assert_eq!(counts.by_reason.get("sender_heartbeat"), Some(&1));
        assert_eq!(counts.by_reason.get("duplicate"), Some(&1));
        assert_eq!(counts.by_reason.get("mark_suppress_next"), Some(&0));
    }
}
