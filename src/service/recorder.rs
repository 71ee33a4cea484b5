//! Open event recorder: the per-hit classification transaction.
//!
//! Every pixel hit runs, under the message's lock and inside one SQLite
//! transaction:
//!
//! 1. upsert the `tracked_emails` identity row;
//! 2. scan the duplicate window and apply the [`DuplicatePolicy`];
//! 3. gather sender evidence (guard window, fingerprint repeat, signal store);
//! 4. resolve geo best-effort;
//! 5. insert the `open_events` row unconditionally;
//! 6. bump `open_count` only for genuine opens;
//! 7. read back the counter and commit.
//!
//! The outcome is for logs and tests only. The HTTP layer never sees it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::key_lock::KeyedLocks;
use crate::domain::{
    Classification, DuplicateMatch, DuplicatePolicy, GeoDetails, GeoResolver, HitFingerprint,
    SenderEvidence, SenderGuard, TrackingPayload,
};
use crate::error::TrackerError;
use crate::metrics::ClassificationStats;
use crate::persistence::sqlite::{
    fingerprint_seen_at_or_before, hits_since, increment_open_count, insert_open_event,
    open_count, upsert_tracked_email,
};
use crate::persistence::{NewHeartbeat, NewOpenEvent, SqliteStore};
use crate::signals::SenderSignalStore;

/// One pixel fetch as seen by the server.
#[derive(Debug, Clone)]
pub struct PixelHit {
    /// Decoded token.
    pub payload: TrackingPayload,
    /// Client address, if known.
    pub ip_address: Option<String>,
    /// Client agent, if sent.
    pub user_agent: Option<String>,
    /// Server receive time.
    pub opened_at: DateTime<Utc>,
}

/// What the recorder decided and persisted for one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Inserted `open_events.id`.
    pub event_id: i64,
    /// Persisted verdict.
    pub classification: Classification,
    /// Earlier fetch the hit duplicated, if any.
    pub duplicate: Option<DuplicateMatch>,
    /// Counter after this hit.
    pub open_count: i64,
    /// Signal-to-hit delta when the signal store matched.
    pub signal_delta_ms: Option<i64>,
}

/// Tunables of the classification policy.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Duplicate window, strategies, and proxy recognition.
    pub dedup: DuplicatePolicy,
    /// Guard window after `sent_at`.
    pub guard: SenderGuard,
    /// Upper bound on one hit's lock wait plus transaction.
    pub store_timeout: Duration,
}

/// Records pixel hits and heartbeats.
#[derive(Debug)]
pub struct OpenRecorder {
    store: SqliteStore,
    signals: Arc<dyn SenderSignalStore>,
    geo: Arc<dyn GeoResolver>,
    settings: RecorderSettings,
    locks: KeyedLocks,
    stats: Arc<ClassificationStats>,
}

impl OpenRecorder {
    /// Creates a recorder over the given collaborators.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        signals: Arc<dyn SenderSignalStore>,
        geo: Arc<dyn GeoResolver>,
        settings: RecorderSettings,
        stats: Arc<ClassificationStats>,
    ) -> Self {
        Self {
            store,
            signals,
            geo,
            settings,
            locks: KeyedLocks::new(),
            stats,
        }
    }

    /// Fingerprint of a client under this recorder's proxy rules.
    #[must_use]
    pub fn fingerprint(
        &self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> HitFingerprint {
        HitFingerprint::new(ip_address, user_agent, &self.settings.dedup.proxy)
    }

    /// Classifies and persists one pixel hit.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] if the transaction
    /// fails and [`TrackerError::Timeout`] if it exceeds the store timeout.
    /// Nothing is written in either case, and a signal the hit consumed is
    /// reinstated.
    pub async fn record(&self, hit: PixelHit) -> Result<RecordOutcome, TrackerError> {
        let fingerprint = self.fingerprint(hit.ip_address.clone(), hit.user_agent.clone());
        let mut consumed = None;

        let attempt = async {
            let _guard = self.locks.lock(&hit.payload.email_id).await;
            let mut tx = self.store.begin().await?;
            let outcome = self
                .classify_and_persist(&mut tx, &hit, &fingerprint, &mut consumed)
                .await?;
            tx.commit().await?;
            Ok::<_, TrackerError>(outcome)
        };

        let result = tokio::time::timeout(self.settings.store_timeout, attempt)
            .await
            .unwrap_or_else(|_| Err(TrackerError::Timeout("open event transaction")));

        match &result {
            Ok(outcome) => {
                self.stats.observe(&outcome.classification);
                tracing::info!(
                    event = "pixel_hit",
                    email_id = %hit.payload.email_id,
                    duplicate = outcome.classification.is_duplicate,
                    duplicate_strategy = outcome.duplicate.map(|d| d.strategy.as_str()),
                    sender_suppressed = outcome.classification.is_sender_suppressed,
                    reason = outcome.classification.reason.map(|r| r.as_str()),
                    counted = outcome.classification.is_genuine(),
                    open_count = outcome.open_count,
                    ip = %fingerprint.normalized_ip(),
                    "pixel hit recorded"
                );
            }
            Err(e) => {
                self.stats.observe_failure();
                tracing::error!(email_id = %hit.payload.email_id, error = %e, "pixel hit lost");
                if let Some(signaled_at) = consumed {
                    self.signals.reinstate(&hit.payload.email_id, signaled_at);
                }
            }
        }
        result
    }

    async fn classify_and_persist(
        &self,
        conn: &mut SqliteConnection,
        hit: &PixelHit,
        fingerprint: &HitFingerprint,
        consumed: &mut Option<DateTime<Utc>>,
    ) -> Result<RecordOutcome, TrackerError> {
        let payload = &hit.payload;
        let email_id = &payload.email_id;
        let opened_at = hit.opened_at;
        let policy = &self.settings.dedup;
        let guard = &self.settings.guard;

        upsert_tracked_email(conn, payload, opened_at).await?;

        let prior = hits_since(conn, email_id, policy.window_start(opened_at)).await?;
        let duplicate = policy.detect(fingerprint, opened_at, &prior);

        let fingerprint_seen_in_guard = fingerprint.is_identifiable()
            && fingerprint_seen_at_or_before(
                conn,
                email_id,
                fingerprint,
                guard.boundary(payload.sent_at),
            )
            .await?;
        let verdict = self.signals.evaluate(email_id, fingerprint, opened_at);
        *consumed = verdict.consumed_at;
        let evidence = SenderEvidence {
            within_guard_window: guard.covers(payload.sent_at, opened_at),
            fingerprint_seen_in_guard,
            signal: verdict.reason,
        };
        let classification = Classification::decide(duplicate.as_ref(), &evidence);

        let event = NewOpenEvent {
            payload,
            opened_at,
            ip_address: fingerprint.ip_address.as_deref(),
            user_agent: fingerprint.user_agent.as_deref(),
            geo: self.resolve_geo(fingerprint),
            device_type: fingerprint.device_type(),
            classification,
        };
        let event_id = insert_open_event(conn, &event).await?;
        if classification.is_genuine() {
            increment_open_count(conn, email_id).await?;
        }
        let open_count = open_count(conn, email_id).await?;

        Ok(RecordOutcome {
            event_id,
            classification,
            duplicate,
            open_count,
            signal_delta_ms: verdict.delta_ms,
        })
    }

    fn resolve_geo(&self, fingerprint: &HitFingerprint) -> GeoDetails {
        let ip = fingerprint.normalized_ip();
        if ip.is_empty() {
            return GeoDetails::default();
        }
        self.geo.resolve(&ip).unwrap_or_else(|e| {
            tracing::warn!(ip = %ip, error = %e, "geo lookup failed");
            GeoDetails::default()
        })
    }

    /// Records a heartbeat from the sender's client: in the signal store for
    /// matching, and in `sender_heartbeats` for the audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SignalChannelDisabled`] when the heartbeat
    /// channel is inactive. A failed audit insert is logged, not returned.
    pub async fn record_heartbeat(
        &self,
        payload: &TrackingPayload,
        source: &HitFingerprint,
        seen_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.signals
            .record_heartbeat(&payload.email_id, source, seen_at)?;

        let beat = NewHeartbeat {
            payload,
            seen_at,
            ip_address: source.ip_address.as_deref(),
            user_agent: source.user_agent.as_deref(),
        };
        if let Err(e) = self.store.insert_heartbeat(&beat).await {
            tracing::error!(email_id = %payload.email_id, error = %e, "heartbeat audit insert failed");
        }
        Ok(())
    }

    /// Store the recorder writes to.
    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}
