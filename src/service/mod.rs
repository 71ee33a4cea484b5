//! Service layer: orchestration over the domain, signal, and persistence
//! layers.
//!
//! [`OpenRecorder`] runs the per-hit classification transaction and
//! [`PixelIssuer`] mints pixels at compose time.

pub mod issuer;
pub mod key_lock;
pub mod recorder;

pub use issuer::{IssuedPixel, PixelIssuer};
pub use key_lock::KeyedLocks;
pub use recorder::{OpenRecorder, PixelHit, RecordOutcome, RecorderSettings};
