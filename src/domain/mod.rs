//! Domain layer: identities, the token codec, and the pure pieces of the
//! open-classification policy.
//!
//! Nothing in here performs I/O. The recorder in [`crate::service`] feeds
//! stored history and signal verdicts into these types and persists what
//! they decide.

pub mod classification;
pub mod clock;
pub mod dedup;
pub mod email_id;
pub mod fingerprint;
pub mod geo;
pub mod payload;
pub mod token;

pub use classification::{Classification, SenderEvidence, SenderGuard, SuppressionReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DuplicateMatch, DuplicatePolicy, DuplicateStrategy, PriorHit};
pub use email_id::EmailId;
pub use fingerprint::{DeviceType, HitFingerprint, ProxyRules};
pub use geo::{
    GeoDetails, GeoRangeEntry, GeoResolver, MaxMindGeoResolver, NoopGeoResolver,
    RangeGeoResolver, open_geo_resolver,
};
pub use payload::TrackingPayload;
