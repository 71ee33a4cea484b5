//! Data Transfer Objects for request/response serialization.

pub mod dashboard_dto;
pub mod metrics_dto;
pub mod pixel_dto;
pub mod track_dto;

pub use dashboard_dto::*;
pub use metrics_dto::*;
pub use pixel_dto::*;
pub use track_dto::*;
