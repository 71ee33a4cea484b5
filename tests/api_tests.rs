//! HTTP-level tests: the full router driven with `tower::ServiceExt::oneshot`
//! over an in-memory SQLite store and a manually advanced clock.
//!
//! Pixel hits are recorded on a detached task, so tests that inspect stored
//! events poll until the expected number of rows is visible.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use open_tracker::api;
use open_tracker::api::pixel::TRANSPARENT_GIF;
use open_tracker::app_state::AppState;
use open_tracker::config::TrackerConfig;
use open_tracker::domain::{Clock, EmailId, ManualClock, NoopGeoResolver};
use open_tracker::persistence::{OpenEvent, SqliteStore};
use open_tracker::signals::SignalMode;

const DASHBOARD_TOKEN: &str = "dash-secret";
const SENDER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Chrome/126.0 Safari/537.36";
const PROXY_UA: &str =
    "Mozilla/5.0 (Windows NT 5.1; rv:11.0) Gecko Firefox/11.0 (via ggpht.com GoogleImageProxy)";
const THUNDERBIRD_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Thunderbird/128.0";
const OUTLOOK_UA: &str = "Microsoft Office/16.0 (Windows NT 10.0; Microsoft Outlook 16.0)";

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap_or_default()
}

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    store: SqliteStore,
}

async fn harness_with(config: TrackerConfig) -> Harness {
    let Ok(store) = SqliteStore::in_memory().await else {
        panic!("in-memory store");
    };
    let clock = Arc::new(ManualClock::new(t0()));
    let shared: Arc<dyn Clock> = Arc::<ManualClock>::clone(&clock);
    let state = AppState::build(&config, store.clone(), Arc::new(NoopGeoResolver), shared);
    let app = api::build_router(config.request_timeout()).with_state(state);
    Harness { app, clock, store }
}

async fn harness(mode: SignalMode) -> Harness {
    harness_with(TrackerConfig {
        signal_mode: mode,
        dashboard_token: Some(DASHBOARD_TOKEN.to_string()),
        ..TrackerConfig::default()
    })
    .await
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(u64::MAX)
}

fn items(value: &Value) -> Vec<Value> {
    value
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let Ok(response) = self.app.clone().oneshot(request).await;
        let status = response.status();
        let headers = response.headers().clone();
        let Ok(body) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        (status, headers, body)
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(request).await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let Ok(request) = Request::builder().uri(uri).body(Body::empty()) else {
            panic!("request");
        };
        self.json(request).await
    }

    async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let Ok(request) = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
        else {
            panic!("request");
        };
        self.json(request).await
    }

    async fn dashboard(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-tracker-token", token);
        }
        let Ok(request) = builder.body(Body::empty()) else {
            panic!("request");
        };
        self.json(request).await
    }

    async fn fetch(&self, path: &str, ip: &str, user_agent: &str) -> (StatusCode, HeaderMap, Bytes) {
        let Ok(request) = Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .header(header::USER_AGENT, user_agent)
            .body(Body::empty())
        else {
            panic!("request");
        };
        self.send(request).await
    }

    /// Issues a pixel and returns `(email_id, token)`.
    async fn issue(&self) -> (String, String) {
        let (status, body) = self
            .post_json(
                "/api/v1/pixels",
                &json!({
                    "user_id": "user-1",
                    "recipient": "bob@example.com",
                    "sender_email": "alice@example.com",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            str_field(&body, "email_id").to_string(),
            str_field(&body, "token").to_string(),
        )
    }

    async fn wait_for_events(&self, email_id: &str, expected: usize) -> Vec<OpenEvent> {
        let Ok(id) = EmailId::parse(email_id) else {
            panic!("email id");
        };
        for _ in 0..200 {
            if let Ok(events) = self.store.list_open_events(Some(&id)).await {
                if events.len() >= expected {
                    return events;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} open events for {email_id}");
    }

    async fn wait_for_signal_count(&self, expected: u64) {
        for _ in 0..200 {
            let (_, body) = self.get_json("/metrics/suppress-signals").await;
            if u64_field(&body, "count") == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} sender signals");
    }
}

fn assert_pixel(status: StatusCode, headers: &HeaderMap, body: &Bytes) {
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/gif")
    );
    let cache = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cache.contains("no-store"));
    assert_eq!(body.as_ref(), TRANSPARENT_GIF.as_slice());
}

#[tokio::test]
async fn sender_render_then_recipient_then_proxy_refetch() {
    let h = harness(SignalMode::Heartbeat).await;
    let (email_id, token) = h.issue().await;
    let pixel = format!("/t/{token}.gif");

    h.clock.advance(TimeDelta::seconds(1));
    let (status, headers, body) = h.fetch(&pixel, "203.0.113.7", SENDER_UA).await;
    assert_pixel(status, &headers, &body);
    h.wait_for_events(&email_id, 1).await;

    h.clock.advance(TimeDelta::seconds(59));
    let (status, headers, body) = h.fetch(&pixel, "66.249.84.1", PROXY_UA).await;
    assert_pixel(status, &headers, &body);
    h.wait_for_events(&email_id, 2).await;

    h.clock.advance(TimeDelta::seconds(1));
    let (status, headers, body) = h.fetch(&pixel, "66.249.84.20", PROXY_UA).await;
    assert_pixel(status, &headers, &body);
    let events = h.wait_for_events(&email_id, 3).await;

    let reasons: Vec<Option<&str>> = events
        .iter()
        .map(|e| e.suppression_reason.map(|r| r.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![Some("duplicate"), None, Some("sender_guard_window")]
    );

    let (status, body) = h
        .post_json(
            "/api/v1/opens/counts",
            &json!({ "email_ids": [email_id, "never-issued"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let summaries = items(&body);
    let Some(known) = summaries.first() else {
        panic!("missing summary");
    };
    assert_eq!(u64_field(known, "open_count"), 1);
    assert_eq!(u64_field(known, "total_hits"), 3);
    assert_eq!(known.get("opened"), Some(&Value::Bool(true)));
    let Some(unknown) = summaries.get(1) else {
        panic!("missing unknown summary");
    };
    assert_eq!(u64_field(unknown, "open_count"), 0);
    assert_eq!(unknown.get("opened"), Some(&Value::Bool(false)));

    let (_, counts) = h.get_json("/metrics/classifications").await;
    assert_eq!(u64_field(&counts, "hits"), 3);
    assert_eq!(u64_field(&counts, "genuine"), 1);
    assert_eq!(u64_field(&counts, "duplicates"), 1);
    assert_eq!(u64_field(&counts, "sender_suppressed"), 1);
}

#[tokio::test]
async fn garbage_token_still_serves_pixel_and_writes_nothing() {
    let h = harness(SignalMode::Heartbeat).await;

    let (status, headers, body) = h.fetch("/t/xyz.gif", "192.0.2.1", OUTLOOK_UA).await;
    assert_pixel(status, &headers, &body);
    let (status, headers, body) = h.fetch("/h/not-a-token.gif", "192.0.2.1", OUTLOOK_UA).await;
    assert_pixel(status, &headers, &body);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let Ok(events) = h.store.list_open_events(None).await else {
        panic!("list events");
    };
    assert!(events.is_empty());
    let Ok(emails) = h.store.list_emails().await else {
        panic!("list emails");
    };
    assert!(emails.is_empty());

    let (_, counts) = h.get_json("/metrics/classifications").await;
    assert_eq!(u64_field(&counts, "invalid_tokens"), 2);
    assert_eq!(u64_field(&counts, "hits"), 0);
}

#[tokio::test]
async fn mark_suppress_next_without_email_id_is_rejected() {
    let h = harness(SignalMode::Explicit).await;

    let Ok(request) = Request::builder()
        .method("POST")
        .uri("/mark-suppress-next")
        .body(Body::empty())
    else {
        panic!("request");
    };
    let (status, body) = h.json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("ok"), Some(&Value::Bool(false)));

    let (status, body) = h
        .post_json("/mark-suppress-next", &json!({ "email_id": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("ok"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn explicit_signal_suppresses_exactly_one_hit() {
    let h = harness(SignalMode::Explicit).await;
    let (email_id, token) = h.issue().await;
    let pixel = format!("/t/{token}.gif");

    h.clock.advance(TimeDelta::seconds(30));
    let (status, body) = h
        .post_json("/mark-suppress-next", &json!({ "email_id": email_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("ok"), Some(&Value::Bool(true)));
    assert_eq!(str_field(&body, "email_id"), email_id);
    let marked_at = (t0() + TimeDelta::seconds(30)).timestamp_millis();
    assert_eq!(
        body.get("recorded_at_ms").and_then(Value::as_i64),
        Some(marked_at)
    );

    h.clock.advance(TimeDelta::seconds(2));
    h.fetch(&pixel, "66.249.84.1", PROXY_UA).await;
    let events = h.wait_for_events(&email_id, 1).await;
    let Some(first) = events.first() else {
        panic!("no event");
    };
    assert!(first.is_sender_suppressed);
    assert_eq!(
        first.suppression_reason.map(|r| r.as_str()),
        Some("mark_suppress_next")
    );

    // Signal is gone: the recipient's own client counts.
    h.clock.advance(TimeDelta::seconds(60));
    h.fetch(&pixel, "192.0.2.55", OUTLOOK_UA).await;
    let events = h.wait_for_events(&email_id, 2).await;
    let Some(latest) = events.first() else {
        panic!("no event");
    };
    assert!(latest.suppression_reason.is_none());

    let (_, latency) = h.get_json("/metrics/gmail-proxy-latency").await;
    assert_eq!(u64_field(&latency, "count"), 1);
    assert_eq!(latency.get("p50").and_then(Value::as_i64), Some(2_000));

    let (_, debug) = h.get_json("/metrics/suppression-debug").await;
    assert_eq!(str_field(&debug, "mode"), "explicit");
    let timeline = debug
        .get("by_email")
        .and_then(|m| m.get(email_id.as_str()))
        .cloned()
        .unwrap_or(Value::Null);
    let len = |key: &str| {
        timeline
            .get(key)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    };
    assert_eq!(len("marks"), 1);
    assert_eq!(len("consumed"), 1);
    assert_eq!(len("google_proxy_hits"), 1);
}

#[tokio::test]
async fn heartbeat_from_sender_client_suppresses_matching_hit() {
    let h = harness(SignalMode::Heartbeat).await;
    let (email_id, token) = h.issue().await;

    h.clock.advance(TimeDelta::seconds(30));
    let (status, headers, body) = h
        .fetch(&format!("/h/{token}.gif"), "198.51.100.4", THUNDERBIRD_UA)
        .await;
    assert_pixel(status, &headers, &body);
    h.wait_for_signal_count(1).await;

    h.clock.advance(TimeDelta::seconds(5));
    h.fetch(&format!("/t/{token}"), "198.51.100.4", THUNDERBIRD_UA)
        .await;
    let events = h.wait_for_events(&email_id, 1).await;
    let Some(sender) = events.first() else {
        panic!("no event");
    };
    assert_eq!(
        sender.suppression_reason.map(|r| r.as_str()),
        Some("sender_heartbeat")
    );

    h.fetch(&format!("/t/{token}.gif"), "192.0.2.55", OUTLOOK_UA)
        .await;
    let events = h.wait_for_events(&email_id, 2).await;
    let Some(recipient) = events.first() else {
        panic!("no event");
    };
    assert!(recipient.suppression_reason.is_none());

    let (_, signals) = h.get_json("/metrics/suppress-signals").await;
    assert_eq!(str_field(&signals, "mode"), "heartbeat");
    assert_eq!(u64_field(&signals, "active_email_ids"), 1);
}

#[tokio::test]
async fn mark_suppress_next_conflicts_in_heartbeat_mode() {
    let h = harness(SignalMode::Heartbeat).await;
    let (email_id, _) = h.issue().await;

    let (status, body) = h
        .post_json("/mark-suppress-next", &json!({ "email_id": email_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.get("ok"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn dashboard_requires_matching_token() {
    let h = harness(SignalMode::Heartbeat).await;
    let (email_id, _) = h.issue().await;

    let (status, _) = h.dashboard("/dashboard/api/emails", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = h.dashboard("/dashboard/api/emails", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = h
        .dashboard("/dashboard/api/emails", Some(DASHBOARD_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = items(&body);
    assert_eq!(rows.len(), 1);
    let Some(row) = rows.first() else {
        panic!("no row");
    };
    assert_eq!(str_field(row, "email_id"), email_id);
    assert_eq!(str_field(row, "recipient"), "bob@example.com");
    assert_eq!(row.get("opened"), Some(&Value::Bool(false)));

    let (status, body) = h
        .dashboard(
            &format!("/dashboard/api/open-events?email_id={email_id}"),
            Some(DASHBOARD_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(items(&body).is_empty());
}

#[tokio::test]
async fn dashboard_is_closed_without_configured_token() {
    let h = harness_with(TrackerConfig {
        dashboard_token: None,
        ..TrackerConfig::default()
    })
    .await;

    let (status, body) = h.dashboard("/dashboard/api/emails", Some("")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body.get("ok"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn issuing_requires_user_id_and_defaults_recipient() {
    let h = harness(SignalMode::Heartbeat).await;

    let (status, _) = h
        .post_json("/api/v1/pixels", &json!({ "user_id": " " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .post_json("/api/v1/pixels", &json!({ "user_id": "user-9" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let pixel_url = str_field(&body, "pixel_url");
    assert!(pixel_url.ends_with(".gif"));
    assert!(pixel_url.contains("/t/"));
    assert!(str_field(&body, "heartbeat_url").contains("/h/"));

    let Ok(id) = EmailId::parse(str_field(&body, "email_id")) else {
        panic!("email id");
    };
    let Ok(Some(row)) = h.store.find_email(&id).await else {
        panic!("registered row");
    };
    assert_eq!(row.recipient, "unknown");
}

#[tokio::test]
async fn counts_rejects_oversized_requests() {
    let h = harness(SignalMode::Heartbeat).await;
    let ids: Vec<String> = (0..501).map(|n| format!("id-{n}")).collect();

    let (status, body) = h
        .post_json("/api/v1/opens/counts", &json!({ "email_ids": ids }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("ok"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn health_reports_mode_and_database() {
    let h = harness(SignalMode::Explicit).await;

    let (status, body) = h.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(str_field(&body, "status"), "healthy");
    assert_eq!(str_field(&body, "signal_mode"), "explicit");
    assert_eq!(str_field(&body, "database"), "ok");
}
