//! The static image served by every pixel route.
//!
//! The response is built without looking at the request outcome, so
//! status, headers, and body are identical for genuine opens, suppressed or
//! duplicate hits, and undecodable tokens alike.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// 1x1 transparent GIF89a.
pub const TRANSPARENT_GIF: [u8; 34] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x4c,
    0x00, 0x3b,
];

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Always `200 OK` with [`TRANSPARENT_GIF`] and no-cache headers.
#[must_use]
pub fn pixel_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/gif")),
            (header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE)),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
        ],
        TRANSPARENT_GIF.as_slice(),
    )
        .into_response()
}

/// Token part of a `{token}.gif` path segment.
#[must_use]
pub fn token_from_file(file: &str) -> &str {
    file.strip_suffix(".gif").unwrap_or(file)
}
