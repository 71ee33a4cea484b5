//! Client identity extractor for pixel and signal routes.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

/// Address and agent of the requesting client.
///
/// The address is the first `X-Forwarded-For` entry when present, else the
/// socket peer. Never rejects: missing values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    /// Client address.
    pub ip_address: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
}

impl ClientMeta {
    /// Reads the client identity from request parts.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            ip_address: forwarded.or_else(peer),
            user_agent,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut request = Request::builder()
            .header("x-forwarded-for", " 198.51.100.4 , 10.0.0.1")
            .header(USER_AGENT, "Chrome")
            .body(())
            .unwrap_or_default();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));

        let meta = ClientMeta::from_parts(&parts(request));
        assert_eq!(meta.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(meta.user_agent.as_deref(), Some("Chrome"));
    }

    #[test]
    fn falls_back_to_peer_then_none() {
        let mut request = Request::new(());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));
        assert_eq!(
            ClientMeta::from_parts(&parts(request)).ip_address.as_deref(),
            Some("10.0.0.9")
        );

        assert_eq!(ClientMeta::from_parts(&parts(Request::new(()))), ClientMeta::default());
    }
}
