//! Sender-signal store: evidence that a pixel fetch is the sender's own.
//!
//! Two channels exist and exactly one is active per deployment:
//!
//! - [`HeartbeatStore`]: the sender's client pings `/h/{token}.gif`; a pixel
//!   hit with the same (IP, agent) fingerprint inside the look-back window
//!   is the sender's.
//! - [`SuppressNextStore`]: the client calls `POST /mark-suppress-next` at
//!   send time; the next pixel hit for that message consumes the signal.
//!
//! Both are process-local, capped, and cleaned up on the request path. They
//! are owned by the application and injected into the recorder.

pub mod bounded;
pub mod diagnostics;
pub mod explicit;
pub mod heartbeat;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{EmailId, HitFingerprint, SuppressionReason};
use crate::error::TrackerError;

pub use bounded::BoundedMap;
pub use diagnostics::{SignalDebugEvent, SignalDebugKind, SignalDiagnostics};
pub use explicit::SuppressNextStore;
pub use heartbeat::HeartbeatStore;

/// Which sender-signal channel is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Heartbeat pixel with fingerprint matching.
    Heartbeat,
    /// Consume-once `mark-suppress-next` signals.
    Explicit,
}

impl SignalMode {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heartbeat" => Ok(Self::Heartbeat),
            "explicit" | "mark_suppress_next" | "mark-suppress-next" => Ok(Self::Explicit),
            other => Err(format!("unknown signal mode: {other}")),
        }
    }
}

/// Caps and time bounds for a signal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalLimits {
    /// Explicit channel: how long an unconsumed signal survives. Heartbeat
    /// channel: the look-back window.
    pub ttl: TimeDelta,
    /// Maximum tracked message ids.
    pub map_limit: usize,
    /// Debug ring capacity.
    pub debug_event_limit: usize,
    /// Latency sample capacity.
    pub latency_sample_limit: usize,
}

impl Default for SignalLimits {
    fn default() -> Self {
        Self {
            ttl: TimeDelta::seconds(10),
            map_limit: 10_000,
            debug_event_limit: 5_000,
            latency_sample_limit: 1_000,
        }
    }
}

/// Outcome of consulting the store for one pixel hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalVerdict {
    /// Set when the hit is attributed to the sender.
    pub reason: Option<SuppressionReason>,
    /// Signal-to-hit delta, when a signal matched.
    pub delta_ms: Option<i64>,
    /// Creation time of a signal this evaluation consumed.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl SignalVerdict {
    /// Returns `true` when the hit is the sender's.
    #[must_use]
    pub const fn suppressed(&self) -> bool {
        self.reason.is_some()
    }
}

/// Read-only view for the metrics endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SignalSnapshot {
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
    /// Latency samples, oldest first.
    pub latency_samples: Vec<i64>,
}

/// The store the recorder consults on every pixel hit.
pub trait SenderSignalStore: Send + Sync + fmt::Debug {
    /// Active channel.
    fn mode(&self) -> SignalMode;

    /// Records an explicit suppress-next signal and returns its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SignalChannelDisabled`] unless the explicit
    /// channel is active.
    fn mark_suppress_next(
        &self,
        _email_id: &EmailId,
        _source: &HitFingerprint,
        _now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TrackerError> {
        Err(TrackerError::SignalChannelDisabled("mark-suppress-next"))
    }

    /// Records a heartbeat from the sender's client.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SignalChannelDisabled`] unless the heartbeat
    /// channel is active.
    fn record_heartbeat(
        &self,
        _email_id: &EmailId,
        _source: &HitFingerprint,
        _now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        Err(TrackerError::SignalChannelDisabled("heartbeat"))
    }

    /// Decides whether a pixel hit is the sender's. May consume state.
    fn evaluate(&self, email_id: &EmailId, hit: &HitFingerprint, now: DateTime<Utc>)
    -> SignalVerdict;

    /// Puts back a signal consumed by a hit whose transaction did not
    /// commit. Stores that consume nothing ignore it.
    fn reinstate(&self, _email_id: &EmailId, _signaled_at: DateTime<Utc>) {}

    /// Drops expired entries.
    fn cleanup(&self, now: DateTime<Utc>);

    /// Current counters and buffers.
    fn snapshot(&self, now: DateTime<Utc>) -> SignalSnapshot;
}

/// Builds the store for `mode`.
#[must_use]
pub fn build_store(mode: SignalMode, limits: SignalLimits) -> Arc<dyn SenderSignalStore> {
    match mode {
        SignalMode::Heartbeat => Arc::new(HeartbeatStore::new(limits)),
        SignalMode::Explicit => Arc::new(SuppressNextStore::new(limits)),
    }
}
