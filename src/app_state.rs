//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::domain::{Clock, GeoResolver, SystemClock};
use crate::metrics::ClassificationStats;
use crate::persistence::SqliteStore;
use crate::service::{OpenRecorder, PixelIssuer};
use crate::signals::{SenderSignalStore, build_store};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Per-hit classification and persistence.
    pub recorder: Arc<OpenRecorder>,
    /// Compose-time pixel issuing.
    pub issuer: Arc<PixelIssuer>,
    /// Active sender-signal channel.
    pub signals: Arc<dyn SenderSignalStore>,
    /// Store for read-only API queries.
    pub store: SqliteStore,
    /// Recorder outcome counters.
    pub stats: Arc<ClassificationStats>,
    /// Source of "now".
    pub clock: Arc<dyn Clock>,
    /// Expected `X-Tracker-Token`; `None` closes the dashboard.
    pub dashboard_token: Option<Arc<str>>,
}

impl AppState {
    /// Wires every collaborator from `config` around an opened store.
    #[must_use]
    pub fn build(
        config: &TrackerConfig,
        store: SqliteStore,
        geo: Arc<dyn GeoResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signals = build_store(config.signal_mode, config.signal_limits());
        let stats = Arc::new(ClassificationStats::default());
        let recorder = Arc::new(OpenRecorder::new(
            store.clone(),
            Arc::clone(&signals),
            geo,
            config.recorder_settings(),
            Arc::clone(&stats),
        ));
        let issuer = Arc::new(PixelIssuer::new(
            store.clone(),
            Arc::clone(&clock),
            &config.public_base_url,
        ));
        Self {
            recorder,
            issuer,
            signals,
            store,
            stats,
            clock,
            dashboard_token: config.dashboard_token.as_deref().map(Arc::from),
        }
    }

    /// Same as [`AppState::build`] with the system clock.
    #[must_use]
    pub fn with_system_clock(
        config: &TrackerConfig,
        store: SqliteStore,
        geo: Arc<dyn GeoResolver>,
    ) -> Self {
        Self::build(config, store, geo, Arc::new(SystemClock))
    }
}
