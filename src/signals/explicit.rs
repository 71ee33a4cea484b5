//! Consume-once `mark-suppress-next` signals.
//!
//! The sender's client announces "the next fetch of this message is mine"
//! right before sending. The next pixel hit for that `email_id` consumes
//! the entry exactly once, however long it took to arrive, as long as the
//! entry has not aged past the TTL. The TTL only bounds stale entries.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use super::bounded::BoundedMap;
use super::diagnostics::{SignalDebugEvent, SignalDebugKind, SignalDiagnostics};
use super::{SenderSignalStore, SignalLimits, SignalMode, SignalSnapshot, SignalVerdict};
use crate::domain::{EmailId, HitFingerprint, SuppressionReason};
use crate::error::TrackerError;

#[derive(Debug, Clone, Copy)]
struct PendingSuppression {
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    pending: BoundedMap<EmailId, PendingSuppression>,
    diagnostics: SignalDiagnostics,
}

/// Explicit signal channel.
#[derive(Debug)]
pub struct SuppressNextStore {
    ttl: TimeDelta,
    inner: Mutex<Inner>,
}

impl SuppressNextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(limits: SignalLimits) -> Self {
        Self {
            ttl: limits.ttl,
            inner: Mutex::new(Inner {
                pending: BoundedMap::new(limits.map_limit),
                diagnostics: SignalDiagnostics::new(
                    limits.debug_event_limit,
                    limits.latency_sample_limit,
                ),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let ttl = self.ttl;
        let expired = inner
            .pending
            .retain(|_, entry| now - entry.created_at <= ttl);
        for email_id in expired {
            tracing::debug!(%email_id, "suppression expired unconsumed");
            inner
                .diagnostics
                .push_event(SignalDebugEvent::housekeeping(
                    SignalDebugKind::SuppressionExpired,
                    &email_id,
                    now,
                ));
        }
    }

    /// Consumes a pending signal for `email_id`, if one is alive.
    ///
    /// Proxy fetches are traced whether or not a signal was pending; a
    /// consumed signal on a proxy fetch also yields a latency sample.
    pub fn check_and_consume(
        &self,
        email_id: &EmailId,
        hit: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> SignalVerdict {
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        let pending = inner.pending.remove(email_id);
        let delta_ms = pending.map(|p| (now - p.created_at).num_milliseconds().max(0));

        if pending.is_some() {
            inner.diagnostics.push_event(
                SignalDebugEvent::from_client(
                    SignalDebugKind::SuppressionConsumed,
                    email_id,
                    now,
                    hit,
                )
                .with_delta(delta_ms),
            );
            tracing::info!(
                event = "suppression_consumed",
                %email_id,
                delta_ms,
                "suppression consumed"
            );
        }

        if hit.proxied {
            inner.diagnostics.push_event(
                SignalDebugEvent::from_client(SignalDebugKind::GoogleProxyHit, email_id, now, hit)
                    .with_pending(pending.is_some())
                    .with_delta(delta_ms),
            );
            if let Some(delta) = delta_ms {
                inner.diagnostics.push_latency(delta);
                tracing::info!(
                    event = "gmail_proxy_latency_sample",
                    %email_id,
                    delta_ms = delta,
                    ip = %hit.normalized_ip(),
                    "proxy latency sample"
                );
            }
        }

        SignalVerdict {
            reason: pending.map(|_| SuppressionReason::MarkSuppressNext),
            delta_ms,
            consumed_at: pending.map(|p| p.created_at),
        }
    }

    /// Number of message ids holding a live signal.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

impl SenderSignalStore for SuppressNextStore {
    fn mode(&self) -> SignalMode {
        SignalMode::Explicit
    }

    fn mark_suppress_next(
        &self,
        email_id: &EmailId,
        source: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TrackerError> {
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        let evicted = inner
            .pending
            .insert(email_id.clone(), PendingSuppression { created_at: now });
        if !evicted.is_empty() {
            tracing::warn!(evicted = evicted.len(), "suppression map full, evicted oldest");
        }
        inner.diagnostics.count_signal();
        inner.diagnostics.push_event(SignalDebugEvent::from_client(
            SignalDebugKind::MarkSuppressNext,
            email_id,
            now,
            source,
        ));

        tracing::info!(
            event = "suppress_signal_received",
            %email_id,
            at_ms = now.timestamp_millis(),
            map_size = inner.pending.len(),
            "suppress-next signal recorded"
        );
        Ok(now)
    }

    fn evaluate(
        &self,
        email_id: &EmailId,
        hit: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> SignalVerdict {
        self.check_and_consume(email_id, hit, now)
    }

    fn reinstate(&self, email_id: &EmailId, signaled_at: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.pending.get(email_id).is_some() {
            return;
        }
        inner
            .pending
            .insert(email_id.clone(), PendingSuppression { created_at: signaled_at });
        tracing::warn!(%email_id, "suppression reinstated after failed hit");
    }

    fn cleanup(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
    }

    fn snapshot(&self, now: DateTime<Utc>) -> SignalSnapshot {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
        SignalSnapshot {
            mode: SignalMode::Explicit,
            count: inner.diagnostics.signal_count(),
            active_email_ids: inner.pending.len(),
            ttl_ms: self.ttl.num_milliseconds(),
            recent: inner.diagnostics.events(),
            latency_samples: inner.diagnostics.latency_samples(),
        }
    }
}
