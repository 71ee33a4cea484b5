//! Client fingerprints for pixel fetches.
//!
//! A [`HitFingerprint`] is the (IP, user agent) pair of one fetch plus the
//! facts derived from it: whether the fetch came through mail-provider image
//! proxy infrastructure and which coarse device class the agent belongs to.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Recognition rules for image-proxy infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRules {
    /// Lower-case substrings that mark a proxy user agent.
    pub agent_tokens: Vec<String>,
    /// Address prefixes owned by proxy fleets.
    pub ip_prefixes: Vec<String>,
}

impl Default for ProxyRules {
    fn default() -> Self {
        Self {
            agent_tokens: vec![
                "googleimageproxy".to_string(),
                "ggpht.com".to_string(),
                "yahoomailproxy".to_string(),
            ],
            ip_prefixes: vec![
                "66.249.".to_string(),
                "64.233.".to_string(),
                "74.125.".to_string(),
            ],
        }
    }
}

impl ProxyRules {
    /// Returns `true` when the user agent names proxy infrastructure.
    #[must_use]
    pub fn is_proxy_agent(&self, user_agent: Option<&str>) -> bool {
        let Some(ua) = user_agent else {
            return false;
        };
        let ua = ua.to_lowercase();
        self.agent_tokens
            .iter()
            .any(|token| !token.is_empty() && ua.contains(token.as_str()))
    }

    /// Returns `true` when the address falls in a known proxy range.
    #[must_use]
    pub fn is_proxy_ip(&self, ip_address: Option<&str>) -> bool {
        let ip = normalize_ip(ip_address);
        !ip.is_empty()
            && self
                .ip_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && ip.starts_with(prefix.as_str()))
    }

    /// A fetch is proxy-tagged when either its agent or its address matches.
    #[must_use]
    pub fn is_proxy(&self, ip_address: Option<&str>, user_agent: Option<&str>) -> bool {
        self.is_proxy_agent(user_agent) || self.is_proxy_ip(ip_address)
    }
}

/// Coarse device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Phones and tablets.
    Phone,
    /// Desktop operating systems.
    Computer,
    /// Proxies, bots, unknown agents.
    Other,
}

impl DeviceType {
    /// Classifies a user agent string.
    #[must_use]
    pub fn from_user_agent(user_agent: Option<&str>, proxied: bool) -> Self {
        let Some(ua) = user_agent else {
            return Self::Other;
        };
        if proxied {
            return Self::Other;
        }
        let ua = ua.to_lowercase();
        if ["iphone", "ipad", "android", "mobile"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            Self::Phone
        } else if ["windows", "macintosh", "mac os x", "x11", "linux", "cros"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            Self::Computer
        } else {
            Self::Other
        }
    }

    /// Column value stored in `open_events.device_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Computer => "computer",
            Self::Other => "other",
        }
    }

    /// Parses a stored column value, defaulting to [`DeviceType::Other`].
    #[must_use]
    pub fn from_column(raw: &str) -> Self {
        match raw {
            "phone" => Self::Phone,
            "computer" => Self::Computer,
            _ => Self::Other,
        }
    }
}

/// One fetch's client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitFingerprint {
    /// Client address as reported by the edge, if any.
    pub ip_address: Option<String>,
    /// Raw `User-Agent` header, if any.
    pub user_agent: Option<String>,
    /// Proxy infrastructure fetched this pixel.
    pub proxied: bool,
    /// The agent alone names proxy infrastructure.
    pub proxy_agent: bool,
}

impl HitFingerprint {
    /// Builds a fingerprint, dropping blank header values.
    #[must_use]
    pub fn new(ip_address: Option<String>, user_agent: Option<String>, rules: &ProxyRules) -> Self {
        let ip_address = ip_address
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let user_agent = user_agent
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let proxy_agent = rules.is_proxy_agent(user_agent.as_deref());
        let proxied = proxy_agent || rules.is_proxy_ip(ip_address.as_deref());
        Self {
            ip_address,
            user_agent,
            proxied,
            proxy_agent,
        }
    }

    /// Exact (IP, agent) equality with absent values compared as empty.
    #[must_use]
    pub fn same_client(&self, ip_address: Option<&str>, user_agent: Option<&str>) -> bool {
        self.ip_address.as_deref().unwrap_or("") == ip_address.unwrap_or("")
            && self.user_agent.as_deref().unwrap_or("") == user_agent.unwrap_or("")
    }

    /// `false` when neither address nor agent is known; such a fetch cannot
    /// be attributed to anyone by fingerprint.
    #[must_use]
    pub fn is_identifiable(&self) -> bool {
        self.ip_address.is_some() || self.user_agent.is_some()
    }

    /// Device class of this fetch.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        DeviceType::from_user_agent(self.user_agent.as_deref(), self.proxied)
    }

    /// Address normalized for lookups.
    #[must_use]
    pub fn normalized_ip(&self) -> String {
        normalize_ip(self.ip_address.as_deref())
    }
}

/// Lower-cases, trims, and unwraps IPv4-mapped IPv6 addresses.
#[must_use]
pub fn normalize_ip(ip_address: Option<&str>) -> String {
    let raw = ip_address.unwrap_or("").trim().to_lowercase();
    match raw.strip_prefix("::ffff:") {
        Some(v4) if v4.contains('.') => v4.to_string(),
        _ => raw,
    }
}
