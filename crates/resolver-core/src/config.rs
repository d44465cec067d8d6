use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DOMAINS: &[&str] = &["embedsports.top", "embedstreams.top", "embedme.top"];

/// Configuration shared by the aggregator, the domain manager and playback sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Ordered embed domain candidates. The first healthy one is preferred.
    pub domains: Vec<String>,
    /// How long a failed domain stays excluded from selection.
    pub domain_cooldown: Duration,
    /// Maximum kickoff skew for two records to describe the same fixture.
    pub kickoff_tolerance: Duration,
    /// How long a session waits for an auto-fallback stream before giving up.
    pub watchdog_timeout: Duration,
    /// HTTP request timeout for provider, stream and viewer fetches.
    pub request_timeout: Duration,
    /// Maximum number of retries for failed fetches.
    pub max_retries: u32,
    /// Base backoff duration for retries (doubled each attempt).
    pub retry_backoff: Duration,
    /// Period of the background match refresh.
    pub refresh_interval: Duration,
    pub max_concurrent_fetches: usize,
    /// Capacity of the per-session transition history.
    pub history_limit: usize,
    /// How long after kickoff a match still counts as live.
    pub live_window: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            domains: DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
            domain_cooldown: Duration::from_secs(300),
            kickoff_tolerance: Duration::from_secs(30 * 60),
            watchdog_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            refresh_interval: Duration::from_secs(60),
            max_concurrent_fetches: 4,
            history_limit: 100,
            live_window: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl ResolverConfig {
    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domain_cooldown(mut self, ms: u64) -> Self {
        self.domain_cooldown = Duration::from_millis(ms);
        self
    }

    pub fn with_kickoff_tolerance(mut self, ms: u64) -> Self {
        self.kickoff_tolerance = Duration::from_millis(ms);
        self
    }

    pub fn with_watchdog_timeout(mut self, ms: u64) -> Self {
        self.watchdog_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, ms: u64) -> Self {
        self.retry_backoff = Duration::from_millis(ms);
        self
    }

    pub fn with_refresh_interval(mut self, ms: u64) -> Self {
        self.refresh_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_live_window(mut self, ms: u64) -> Self {
        self.live_window = Duration::from_millis(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = ResolverConfig::default();
        assert_eq!(c.domains.len(), 3);
        assert_eq!(c.watchdog_timeout, Duration::from_secs(5));
        assert_eq!(c.kickoff_tolerance, Duration::from_secs(1800));
    }

    #[test]
    fn builder_clamps_zero_values() {
        let c = ResolverConfig::default()
            .with_max_concurrent_fetches(0)
            .with_history_limit(0)
            .with_refresh_interval(0);
        assert_eq!(c.max_concurrent_fetches, 1);
        assert_eq!(c.history_limit, 1);
        assert_eq!(c.refresh_interval, Duration::from_millis(1));
    }

    #[test]
    fn with_domains_replaces_list() {
        let c = ResolverConfig::default().with_domains(["a.example", "b.example"]);
        assert_eq!(c.domains, vec!["a.example", "b.example"]);
    }
}
