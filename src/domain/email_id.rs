//! Type-safe tracked-message identifier.
//!
//! [`EmailId`] wraps the opaque string carried in every pixel token. Issued
//! ids are UUID v4 strings, but ids minted by older clients are accepted as
//! long as they are non-empty after trimming.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Unique identifier for one outgoing tracked message.
///
/// Generated once at compose time and immutable thereafter. Used as the
/// primary key of `tracked_emails`, the signal cache key, and the per-message
/// lock key in the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(String);

impl EmailId {
    /// Creates a new random `EmailId` (hyphenated UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validates and wraps a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::MissingIdentifier`] when the value is empty
    /// after trimming.
    pub fn parse(raw: &str) -> Result<Self, TrackerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackerError::MissingIdentifier(
                "email_id is required".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_uuid_shaped_and_unique() {
        let a = EmailId::generate();
        let b = EmailId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn parse_trims_whitespace() {
        let Ok(id) = EmailId::parse("  abc-123 \n") else {
            panic!("expected valid id");
        };
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!(matches!(
            EmailId::parse("   "),
            Err(TrackerError::MissingIdentifier(_))
        ));
        assert!(EmailId::parse("").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let Ok(id) = EmailId::parse("msg-1") else {
            panic!("expected valid id");
        };
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"msg-1\"");
    }
}
