//! Duplicate-fetch detection.
//!
//! A hit is a duplicate when any earlier fetch of the same message inside
//! the trailing window matches it under one of the [`DuplicateStrategy`]
//! predicates. Strategies are independent; the first one that matches is
//! reported, but evaluation order never changes the verdict.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::fingerprint::{HitFingerprint, ProxyRules};

/// An earlier recorded fetch considered by the duplicate window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorHit {
    /// `open_events.id` of the earlier fetch.
    pub id: i64,
    /// When the earlier fetch was recorded.
    pub opened_at: DateTime<Utc>,
    /// Its client address.
    pub ip_address: Option<String>,
    /// Its user agent.
    pub user_agent: Option<String>,
}

/// One duplicate-match predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    /// Same address and same agent.
    ExactFingerprint,
    /// Proxy agent, same agent string; the proxy rotates addresses.
    ProxyAgent,
    /// Proxy-tagged fetch after any proxy-tagged fetch; the proxy varies
    /// both address and agent between refetches of one image.
    ProxyWindow,
}

impl DuplicateStrategy {
    /// Every strategy, in reporting order.
    pub const ALL: [Self; 3] = [Self::ExactFingerprint, Self::ProxyAgent, Self::ProxyWindow];

    /// Evaluates this predicate for one earlier fetch.
    #[must_use]
    pub fn matches(self, hit: &HitFingerprint, prior: &PriorHit, rules: &ProxyRules) -> bool {
        match self {
            Self::ExactFingerprint => {
                hit.same_client(prior.ip_address.as_deref(), prior.user_agent.as_deref())
            }
            Self::ProxyAgent => {
                hit.proxy_agent
                    && hit.user_agent.is_some()
                    && hit.user_agent.as_deref() == prior.user_agent.as_deref()
            }
            Self::ProxyWindow => {
                hit.proxied
                    && rules.is_proxy(prior.ip_address.as_deref(), prior.user_agent.as_deref())
            }
        }
    }

    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExactFingerprint => "exact_fingerprint",
            Self::ProxyAgent => "proxy_agent",
            Self::ProxyWindow => "proxy_window",
        }
    }
}

/// The earlier fetch a duplicate was matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateMatch {
    /// Predicate that fired.
    pub strategy: DuplicateStrategy,
    /// Row id of the matched fetch.
    pub prior_id: i64,
}

/// Window length, active predicates, and proxy recognition.
#[derive(Debug, Clone)]
pub struct DuplicatePolicy {
    /// Trailing window length.
    pub window: TimeDelta,
    /// Predicates, OR-ed.
    pub strategies: Vec<DuplicateStrategy>,
    /// Proxy recognition shared with fingerprinting.
    pub proxy: ProxyRules,
}

impl DuplicatePolicy {
    /// Policy with every strategy enabled.
    #[must_use]
    pub fn new(window: TimeDelta, proxy: ProxyRules) -> Self {
        Self {
            window,
            strategies: DuplicateStrategy::ALL.to_vec(),
            proxy,
        }
    }

    /// Oldest instant still inside the window for a fetch at `opened_at`.
    #[must_use]
    pub fn window_start(&self, opened_at: DateTime<Utc>) -> DateTime<Utc> {
        opened_at - self.window
    }

    /// Returns the first match among `prior` fetches, if any.
    ///
    /// Fetches older than `opened_at - window` are ignored even if the caller
    /// passed them in. Later-stamped fetches count: under concurrency a hit
    /// stamped after this one may have been recorded first.
    #[must_use]
    pub fn detect(
        &self,
        hit: &HitFingerprint,
        opened_at: DateTime<Utc>,
        prior: &[PriorHit],
    ) -> Option<DuplicateMatch> {
        let start = self.window_start(opened_at);
        let in_window = || {
            prior
                .iter()
                .filter(move |p| p.opened_at >= start)
        };

        self.strategies.iter().find_map(|&strategy| {
            in_window()
                .find(|p| strategy.matches(hit, p, &self.proxy))
                .map(|p| DuplicateMatch {
                    strategy,
                    prior_id: p.id,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GMAIL_UA: &str =
        "Mozilla/5.0 (Windows NT 5.1; rv:11.0) Gecko Firefox/11.0 (via ggpht.com GoogleImageProxy)";

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_000 + secs, 0).unwrap_or_default()
    }

    fn prior(id: i64, secs: i64, ip: &str, ua: &str) -> PriorHit {
        PriorHit {
            id,
            opened_at: at(secs),
            ip_address: Some(ip.to_string()),
            user_agent: Some(ua.to_string()),
        }
    }

    fn policy() -> DuplicatePolicy {
        DuplicatePolicy::new(TimeDelta::seconds(10), ProxyRules::default())
    }

    fn hit(ip: &str, ua: &str) -> HitFingerprint {
        HitFingerprint::new(Some(ip.into()), Some(ua.into()), &ProxyRules::default())
    }

    #[test]
    fn exact_fingerprint_inside_window() {
        let history = [prior(1, 0, "203.0.113.5", "Agent/1")];
        let found = policy().detect(&hit("203.0.113.5", "Agent/1"), at(4), &history);
        assert_eq!(
            found,
            Some(DuplicateMatch {
                strategy: DuplicateStrategy::ExactFingerprint,
                prior_id: 1
            })
        );
    }

    #[test]
    fn exact_fingerprint_outside_window_is_fresh() {
        let history = [prior(1, 0, "203.0.113.5", "Agent/1")];
        assert!(
            policy()
                .detect(&hit("203.0.113.5", "Agent/1"), at(11), &history)
                .is_none()
        );
    }

    #[test]
    fn window_edge_is_inclusive() {
        let history = [prior(1, 0, "203.0.113.5", "Agent/1")];
        assert!(
            policy()
                .detect(&hit("203.0.113.5", "Agent/1"), at(10), &history)
                .is_some()
        );
    }

    #[test]
    fn later_stamped_fetch_recorded_first_is_prior() {
        let history = [prior(1, 5, "203.0.113.5", "Agent/1")];
        let found = policy().detect(&hit("203.0.113.5", "Agent/1"), at(4), &history);
        assert_eq!(found.map(|m| m.prior_id), Some(1));
    }

    #[test]
    fn proxy_agent_matches_across_rotating_ips() {
        let history = [prior(3, 0, "66.249.84.1", GMAIL_UA)];
        let found = policy().detect(&hit("66.249.84.7", GMAIL_UA), at(2), &history);
        assert_eq!(found.map(|m| m.strategy), Some(DuplicateStrategy::ProxyAgent));
    }

    #[test]
    fn proxy_window_ignores_agent_drift() {
        let history = [prior(3, 0, "66.249.84.1", "GoogleImageProxy/1.0")];
        let found = policy().detect(&hit("74.125.9.9", "Mozilla/5.0 GoogleImageProxy"), at(3), &history);
        assert_eq!(found.map(|m| m.strategy), Some(DuplicateStrategy::ProxyWindow));
    }

    #[test]
    fn different_plain_clients_are_not_duplicates() {
        let history = [prior(1, 0, "203.0.113.5", "Agent/1")];
        assert!(
            policy()
                .detect(&hit("198.51.100.2", "Agent/2"), at(1), &history)
                .is_none()
        );
    }

    #[test]
    fn plain_client_after_proxy_is_not_a_duplicate() {
        let history = [prior(1, 0, "66.249.84.1", GMAIL_UA)];
        assert!(
            policy()
                .detect(&hit("198.51.100.2", "Agent/2"), at(1), &history)
                .is_none()
        );
    }

    #[test]
    fn disabled_strategies_do_not_fire() {
        let mut only_exact = policy();
        only_exact.strategies = vec![DuplicateStrategy::ExactFingerprint];
        let history = [prior(3, 0, "66.249.84.1", GMAIL_UA)];
        assert!(
            only_exact
                .detect(&hit("66.249.84.7", GMAIL_UA), at(2), &history)
                .is_none()
        );
    }
}
