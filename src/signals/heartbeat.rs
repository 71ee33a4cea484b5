//! Heartbeat-based sender detection.
//!
//! While the sender views the message they just sent, their client fetches
//! a secondary heartbeat pixel carrying the same token. A tracking-pixel hit
//! whose (IP, agent) fingerprint matches a heartbeat for the same message
//! inside the look-back window is the sender's own. Heartbeats are not
//! consumed: every matching fetch in the window is suppressed.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use super::bounded::BoundedMap;
use super::diagnostics::{SignalDebugEvent, SignalDebugKind, SignalDiagnostics};
use super::{SenderSignalStore, SignalLimits, SignalMode, SignalSnapshot, SignalVerdict};
use crate::domain::{EmailId, HitFingerprint, SuppressionReason};
use crate::error::TrackerError;

/// Heartbeats retained per message; older ones add no information.
const PER_EMAIL_LIMIT: usize = 16;

#[derive(Debug, Clone)]
struct Heartbeat {
    ip_address: Option<String>,
    user_agent: Option<String>,
    seen_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    beats: BoundedMap<EmailId, VecDeque<Heartbeat>>,
    diagnostics: SignalDiagnostics,
}

/// Heartbeat signal channel.
#[derive(Debug)]
pub struct HeartbeatStore {
    lookback: TimeDelta,
    inner: Mutex<Inner>,
}

impl HeartbeatStore {
    /// Creates an empty store; `limits.ttl` is the look-back window.
    #[must_use]
    pub fn new(limits: SignalLimits) -> Self {
        Self {
            lookback: limits.ttl,
            inner: Mutex::new(Inner {
                beats: BoundedMap::new(limits.map_limit),
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
        let oldest = now - self.lookback;
        let emptied = inner.beats.retain(|_, beats| {
            beats.retain(|beat| beat.seen_at >= oldest);
            !beats.is_empty()
        });
        for email_id in emptied {
            inner.diagnostics.push_event(SignalDebugEvent::housekeeping(
                SignalDebugKind::HeartbeatExpired,
                &email_id,
                now,
            ));
        }
    }

    /// Latest heartbeat for `email_id` matching the hit's fingerprint inside
    /// `[now - lookback, now]`.
    fn latest_match(
        inner: &Inner,
        email_id: &EmailId,
        hit: &HitFingerprint,
        oldest: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !hit.is_identifiable() {
            return None;
        }
        inner
            .beats
            .get(email_id)?
            .iter()
            .filter(|beat| beat.seen_at >= oldest && beat.seen_at <= now)
            .filter(|beat| {
                hit.same_client(beat.ip_address.as_deref(), beat.user_agent.as_deref())
            })
            .map(|beat| beat.seen_at)
            .max()
    }

    /// Returns `true` when a matching heartbeat precedes the hit within the
    /// look-back window. Does not touch the diagnostics.
    pub fn has_recent_heartbeat(
        &self,
        email_id: &EmailId,
        hit: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
        Self::latest_match(&inner, email_id, hit, now - self.lookback, now).is_some()
    }

    /// Message ids currently holding heartbeats.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.lock().beats.len()
    }
}

impl SenderSignalStore for HeartbeatStore {
    fn mode(&self) -> SignalMode {
        SignalMode::Heartbeat
    }

    fn record_heartbeat(
        &self,
        email_id: &EmailId,
        source: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        let beat = Heartbeat {
            ip_address: source.ip_address.clone(),
            user_agent: source.user_agent.clone(),
            seen_at: now,
        };
        if let Some(beats) = inner.beats.get_mut(email_id) {
            beats.push_back(beat);
            while beats.len() > PER_EMAIL_LIMIT {
                beats.pop_front();
            }
        } else {
            let evicted = inner.beats.insert(email_id.clone(), VecDeque::from([beat]));
            if !evicted.is_empty() {
                tracing::warn!(evicted = evicted.len(), "heartbeat map full, evicted oldest");
            }
        }

        inner.diagnostics.count_signal();
        inner.diagnostics.push_event(SignalDebugEvent::from_client(
            SignalDebugKind::SenderHeartbeat,
            email_id,
            now,
            source,
        ));
        tracing::debug!(%email_id, map_size = inner.beats.len(), "sender heartbeat recorded");
        Ok(())
    }

    fn evaluate(
        &self,
        email_id: &EmailId,
        hit: &HitFingerprint,
        now: DateTime<Utc>,
    ) -> SignalVerdict {
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        let matched = Self::latest_match(&inner, email_id, hit, now - self.lookback, now);
        let delta_ms = matched.map(|seen_at| (now - seen_at).num_milliseconds().max(0));

        if let Some(delta) = delta_ms {
            inner.diagnostics.push_event(
                SignalDebugEvent::from_client(SignalDebugKind::HeartbeatMatched, email_id, now, hit)
                    .with_delta(delta_ms),
            );
            inner.diagnostics.push_latency(delta);
            tracing::info!(%email_id, delta_ms = delta, "hit matched sender heartbeat");
        }
        if hit.proxied {
            let pending = inner.beats.get(email_id).is_some();
            inner.diagnostics.push_event(
                SignalDebugEvent::from_client(SignalDebugKind::GoogleProxyHit, email_id, now, hit)
                    .with_pending(pending)
                    .with_delta(delta_ms),
            );
        }

        SignalVerdict {
            reason: matched.map(|_| SuppressionReason::SenderHeartbeat),
            delta_ms,
            consumed_at: None,
        }
    }

    fn cleanup(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
    }

    fn snapshot(&self, now: DateTime<Utc>) -> SignalSnapshot {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
        SignalSnapshot {
            mode: SignalMode::Heartbeat,
            count: inner.diagnostics.signal_count(),
            active_email_ids: inner.beats.len(),
            ttl_ms: self.lookback.num_milliseconds(),
            recent: inner.diagnostics.events(),
            latency_samples: inner.diagnostics.latency_samples(),
        }
    }
}
