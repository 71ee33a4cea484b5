//! # open-tracker
//!
//! Email open-tracking pixel server.
//!
//! Every fetch of a tracking pixel is recorded, then classified as a genuine
//! recipient open, a duplicate (image-proxy refetch or repeat render), or a
//! sender-originated fetch. Only genuine opens increment a message's
//! `open_count`. The fetching client always receives the same 1x1 GIF.
//!
//! ## Architecture
//!
//! ```text
//! Mail clients / image proxies          Sender's client
//!     │  GET /t/{token}.gif                 │  GET /h/{token}.gif
//!     │                                     │  POST /mark-suppress-next
//!     ├── HTTP handlers (api/)  ────────────┤
//!     │                                     │
//!     ├── OpenRecorder (service/) ◄── SenderSignalStore (signals/)
//!     │     per-message lock + transaction
//!     │     DuplicatePolicy, SenderGuard (domain/)
//!     │     GeoResolver (domain/)
//!     │
//!     ├── SQLite persistence (persistence/)
//!     │
//!     └── Metrics views (metrics/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod service;
pub mod signals;
