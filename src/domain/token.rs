//! Pixel token codec.
//!
//! A token is the URL-safe, unpadded base64 of a compact JSON array
//! `[user_id, email_id, recipient, sent_at, sender_email?]`. The trailing
//! sender address is omitted when absent. Tokens issued before the compact
//! format carry a JSON object keyed by field name instead; decoding accepts
//! both shapes.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{EmailId, TrackingPayload};
use crate::error::TrackerError;

/// URL-safe alphabet, no padding on encode, padding tolerated on decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encodes a payload into the compact positional token form.
#[must_use]
pub fn encode(payload: &TrackingPayload) -> String {
    let mut fields = vec![
        Value::String(payload.user_id.clone()),
        Value::String(payload.email_id.to_string()),
        Value::String(payload.recipient.clone()),
        Value::String(format_sent_at(payload.sent_at)),
    ];
    if let Some(sender) = &payload.sender_email {
        fields.push(Value::String(sender.clone()));
    }
    TOKEN_ENGINE.encode(Value::Array(fields).to_string())
}

/// Encodes a payload into the older key-value object form.
///
/// Only kept so that tooling and tests can mint tokens in the shape older
/// clients still embed in sent mail.
#[must_use]
pub fn encode_legacy(payload: &TrackingPayload) -> String {
    let mut object = Map::new();
    object.insert("user_id".into(), Value::String(payload.user_id.clone()));
    object.insert("email_id".into(), Value::String(payload.email_id.to_string()));
    object.insert("recipient".into(), Value::String(payload.recipient.clone()));
    if let Some(sender) = &payload.sender_email {
        object.insert("sender_email".into(), Value::String(sender.clone()));
    }
    object.insert(
        "sent_at".into(),
        Value::String(format_sent_at(payload.sent_at)),
    );
    TOKEN_ENGINE.encode(Value::Object(object).to_string())
}

/// Decodes a token in either the positional or the legacy object form.
///
/// # Errors
///
/// Returns [`TrackerError::InvalidToken`] when the wrapper cannot be
/// reversed, the body is not JSON of a supported shape, or any of
/// `user_id`, `email_id`, `recipient`, `sent_at` is missing or empty.
pub fn decode(token: &str) -> Result<TrackingPayload, TrackerError> {
    let bytes = TOKEN_ENGINE
        .decode(token.trim())
        .map_err(|e| TrackerError::InvalidToken(format!("not base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| TrackerError::InvalidToken(format!("not json: {e}")))?;

    match value {
        Value::Array(fields) => decode_positional(&fields),
        Value::Object(object) => decode_object(&object),
        _ => Err(TrackerError::InvalidToken(
            "unsupported token shape".to_string(),
        )),
    }
}

fn decode_positional(fields: &[Value]) -> Result<TrackingPayload, TrackerError> {
    let field = |index: usize| fields.get(index);
    build(
        field(0),
        field(1),
        field(2),
        field(3),
        field(4),
    )
}

fn decode_object(object: &Map<String, Value>) -> Result<TrackingPayload, TrackerError> {
    build(
        object.get("user_id"),
        object.get("email_id"),
        object.get("recipient"),
        object.get("sent_at"),
        object.get("sender_email"),
    )
}

fn build(
    user_id: Option<&Value>,
    email_id: Option<&Value>,
    recipient: Option<&Value>,
    sent_at: Option<&Value>,
    sender_email: Option<&Value>,
) -> Result<TrackingPayload, TrackerError> {
    let user_id = required_str(user_id, "user_id")?;
    let email_id = EmailId::parse(required_str(email_id, "email_id")?)
        .map_err(|_| missing("email_id"))?;
    let recipient = required_str(recipient, "recipient")?;
    let sent_at = parse_sent_at(sent_at)?;
    let sender_email = sender_email.and_then(Value::as_str).map(str::to_string);

    Ok(TrackingPayload::new(
        user_id,
        email_id,
        recipient,
        sender_email,
        sent_at,
    ))
}

fn required_str<'a>(value: Option<&'a Value>, name: &str) -> Result<&'a str, TrackerError> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| missing(name))
}

fn parse_sent_at(value: Option<&Value>) -> Result<DateTime<Utc>, TrackerError> {
    match value {
        Some(Value::String(raw)) if !raw.trim().is_empty() => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TrackerError::InvalidToken(format!("bad sent_at {raw:?}: {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| TrackerError::InvalidToken(format!("bad sent_at {n}"))),
        _ => Err(missing("sent_at")),
    }
}

fn format_sent_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn missing(name: &str) -> TrackerError {
    TrackerError::InvalidToken(format!("missing required field {name}"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn sample(sender: Option<&str>) -> TrackingPayload {
        let sent_at = DateTime::<Utc>::from_timestamp_millis(1_760_000_000_123).unwrap_or_default();
        TrackingPayload::new(
            "user-7",
            EmailId::generate(),
            "Ana <ana@example.com>",
            sender.map(str::to_string),
            sent_at,
        )
    }

    fn raw_token(json: &str) -> String {
        TOKEN_ENGINE.encode(json)
    }

    #[test]
    fn positional_round_trip_with_and_without_sender() {
        for payload in [sample(None), sample(Some("me@example.com"))] {
            let token = encode(&payload);
            let Ok(decoded) = decode(&token) else {
                panic!("token should decode");
            };
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn legacy_round_trip() {
        let payload = sample(Some("me@example.com"));
        let Ok(decoded) = decode(&encode_legacy(&payload)) else {
            panic!("legacy token should decode");
        };
        assert_eq!(decoded, payload);
    }

    #[test]
    fn token_is_url_safe_and_unpadded() {
        let token = encode(&sample(Some("x+y/z@example.com")));
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn compact_form_omits_absent_sender() {
        let payload = sample(None);
        let Ok(bytes) = TOKEN_ENGINE.decode(encode(&payload)) else {
            panic!("wrapper should reverse");
        };
        let Ok(Value::Array(fields)) = serde_json::from_slice::<Value>(&bytes) else {
            panic!("expected array body");
        };
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn padded_tokens_are_accepted() {
        let payload = sample(None);
        let mut token = encode(&payload);
        while token.len() % 4 != 0 {
            token.push('=');
        }
        assert!(decode(&token).is_ok());
    }

    #[test]
    fn missing_required_fields_fail() {
        let cases = [
            r#"["u","e","r"]"#,
            r#"["","e","r","2026-01-01T00:00:00.000Z"]"#,
            r#"{"user_id":"u","recipient":"r","sent_at":"2026-01-01T00:00:00.000Z"}"#,
            r#"{"user_id":"u","email_id":"e","sent_at":"2026-01-01T00:00:00.000Z"}"#,
            r#"{"user_id":"u","email_id":"e","recipient":"r"}"#,
            r#"{"user_id":"u","email_id":"  ","recipient":"r","sent_at":"2026-01-01T00:00:00.000Z"}"#,
        ];
        for json in cases {
            assert!(
                matches!(decode(&raw_token(json)), Err(TrackerError::InvalidToken(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn garbage_fails() {
        assert!(matches!(decode("xyz"), Err(TrackerError::InvalidToken(_))));
        assert!(matches!(decode("!!!"), Err(TrackerError::InvalidToken(_))));
        assert!(decode(&raw_token("42")).is_err());
        assert!(decode(&raw_token(r#"["u","e","r","yesterday"]"#)).is_err());
    }

    #[test]
    fn numeric_sent_at_is_epoch_millis() {
        let Ok(payload) = decode(&raw_token(r#"["u","e","r",1760000000123]"#)) else {
            panic!("numeric sent_at should decode");
        };
        assert_eq!(payload.sent_at.timestamp_millis(), 1_760_000_000_123);
    }
}
