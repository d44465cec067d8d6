//! Embed CDN domain selection with process-wide failure tracking.
//!
//! One [`EmbedDomainManager`] is shared by every playback session: an outage
//! seen by one viewer is skipped by all of them. All state lives behind a
//! single lock, so the reset that happens when every domain has failed is
//! observed atomically.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ResolverConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid embed domain '{domain}': {reason}")]
    Invalid { domain: String, reason: String },
    #[error("No embed domains configured")]
    Empty,
}

/// A CDN origin able to serve `/embed/{source}/{id}/{streamNo}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbedDomain {
    origin: Url,
}

impl EmbedDomain {
    /// Accepts a bare hostname (`embed.example`) or an http(s) origin.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let invalid = |reason: &str| DomainError::Invalid {
            domain: raw.to_string(),
            reason: reason.to_string(),
        };
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        let url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("domain must not carry a path, query or fragment"));
        }
        Ok(Self { origin: url })
    }

    pub fn host(&self) -> &str {
        self.origin.host_str().unwrap_or_default()
    }

    pub fn origin(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// `{origin}/embed/{source}/{id}/{streamNo}`, with each segment percent-encoded.
    pub fn embed_url(&self, source: &str, id: &str, stream_no: u32) -> String {
        let mut url = self.origin.clone();
        let stream_no = stream_no.to_string();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .clear()
                .extend(["embed", source, id, stream_no.as_str()]);
        }
        url.to_string()
    }
}

impl fmt::Display for EmbedDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host())
    }
}

impl Serialize for EmbedDomain {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.host())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub domain: EmbedDomain,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct EmbedDomainManager {
    domains: Vec<EmbedDomain>,
    cooldown: Duration,
    failed: Mutex<HashMap<EmbedDomain, DateTime<Utc>>>,
}

impl EmbedDomainManager {
    pub fn new(domains: Vec<EmbedDomain>, cooldown: Duration) -> Result<Self, DomainError> {
        if domains.is_empty() {
            return Err(DomainError::Empty);
        }
        let mut unique: Vec<EmbedDomain> = Vec::with_capacity(domains.len());
        for d in domains {
            if !unique.contains(&d) {
                unique.push(d);
            }
        }
        Ok(Self {
            domains: unique,
            cooldown,
            failed: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, DomainError> {
        let domains = config
            .domains
            .iter()
            .map(|d| EmbedDomain::parse(d))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(domains, config.domain_cooldown)
    }

    pub fn domains(&self) -> &[EmbedDomain] {
        &self.domains
    }

    /// Pure URL template; identical inputs always give an identical string.
    pub fn build_embed_url(domain: &EmbedDomain, source: &str, id: &str, stream_no: u32) -> String {
        domain.embed_url(source, id, stream_no)
    }

    pub fn current_domain(&self) -> EmbedDomain {
        self.current_domain_at(Utc::now())
    }

    /// First domain not in the failed set. When every domain has failed the
    /// set is cleared and the first domain is returned.
    pub fn current_domain_at(&self, now: DateTime<Utc>) -> EmbedDomain {
        let mut failed = self.lock_failed();
        self.prune(&mut failed, now);
        if let Some(d) = self.domains.iter().find(|d| !failed.contains_key(*d)) {
            return d.clone();
        }
        warn!(count = self.domains.len(), "All embed domains failed, resetting failure set");
        failed.clear();
        self.domains[0].clone()
    }

    pub fn mark_failed(&self, domain: &EmbedDomain) {
        self.mark_failed_at(domain, Utc::now());
    }

    pub fn mark_failed_at(&self, domain: &EmbedDomain, now: DateTime<Utc>) {
        if !self.domains.contains(domain) {
            debug!(%domain, "Ignoring failure for unknown domain");
            return;
        }
        let mut failed = self.lock_failed();
        if !failed.contains_key(domain) {
            info!(%domain, "Marking embed domain failed");
            failed.insert(domain.clone(), now);
        }
    }

    pub fn is_failed(&self, domain: &EmbedDomain) -> bool {
        let mut failed = self.lock_failed();
        self.prune(&mut failed, Utc::now());
        failed.contains_key(domain)
    }

    pub fn fallback_domain(&self, failed_domain: &EmbedDomain) -> Option<EmbedDomain> {
        self.fallback_domain_where(failed_domain, Utc::now(), |_| true)
    }

    /// Next domain after `failed_domain` in configured order that is neither
    /// `failed_domain`, currently failed, nor rejected by `accept`.
    pub fn fallback_domain_where<F>(
        &self,
        failed_domain: &EmbedDomain,
        now: DateTime<Utc>,
        accept: F,
    ) -> Option<EmbedDomain>
    where
        F: Fn(&EmbedDomain) -> bool,
    {
        let mut failed = self.lock_failed();
        self.prune(&mut failed, now);
        let start = self
            .domains
            .iter()
            .position(|d| d == failed_domain)
            .map(|i| i + 1)
            .unwrap_or(0);
        let n = self.domains.len();
        (0..n)
            .map(|k| &self.domains[(start + k) % n])
            .find(|d| *d != failed_domain && !failed.contains_key(*d) && accept(d))
            .cloned()
    }

    pub fn has_fallback_available(&self, domain: &EmbedDomain) -> bool {
        self.fallback_domain(domain).is_some()
    }

    pub fn reset(&self) {
        self.lock_failed().clear();
    }

    pub fn failed_count(&self) -> usize {
        let mut failed = self.lock_failed();
        self.prune(&mut failed, Utc::now());
        failed.len()
    }

    pub fn status(&self) -> Vec<DomainStatus> {
        let mut failed = self.lock_failed();
        self.prune(&mut failed, Utc::now());
        self.domains
            .iter()
            .map(|d| {
                let failed_at = failed.get(d).copied();
                DomainStatus {
                    domain: d.clone(),
                    available: failed_at.is_none(),
                    failed_at,
                }
            })
            .collect()
    }

    fn lock_failed(&self) -> MutexGuard<'_, HashMap<EmbedDomain, DateTime<Utc>>> {
        self.failed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(&self, failed: &mut HashMap<EmbedDomain, DateTime<Utc>>, now: DateTime<Utc>) {
        let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX);
        failed.retain(|domain, at| {
            let keep = now.signed_duration_since(*at) < cooldown;
            if !keep {
                debug!(%domain, "Embed domain cooldown elapsed");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(cooldown: Duration) -> (EmbedDomainManager, EmbedDomain, EmbedDomain, EmbedDomain) {
        let d1 = EmbedDomain::parse("d1.example").unwrap();
        let d2 = EmbedDomain::parse("d2.example").unwrap();
        let d3 = EmbedDomain::parse("d3.example").unwrap();
        let m = EmbedDomainManager::new(vec![d1.clone(), d2.clone(), d3.clone()], cooldown).unwrap();
        (m, d1, d2, d3)
    }

    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn parse_accepts_hosts_and_origins() {
        assert_eq!(EmbedDomain::parse("embed.example").unwrap().origin(), "https://embed.example");
        assert_eq!(
            EmbedDomain::parse("http://embed.example:8080/").unwrap().origin(),
            "http://embed.example:8080"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(EmbedDomain::parse("").is_err());
        assert!(EmbedDomain::parse("ftp://embed.example").is_err());
        assert!(EmbedDomain::parse("https://embed.example/path").is_err());
    }

    #[test]
    fn new_rejects_empty_list() {
        assert_eq!(EmbedDomainManager::new(vec![], LONG).unwrap_err(), DomainError::Empty);
    }

    #[test]
    fn embed_url_template_is_exact_and_stable() {
        let d = EmbedDomain::parse("embedsports.top").unwrap();
        let a = EmbedDomainManager::build_embed_url(&d, "alpha", "arsenal-vs-chelsea", 2);
        let b = EmbedDomainManager::build_embed_url(&d, "alpha", "arsenal-vs-chelsea", 2);
        assert_eq!(a, "https://embedsports.top/embed/alpha/arsenal-vs-chelsea/2");
        assert_eq!(a, b);
    }

    #[test]
    fn embed_url_encodes_segment_separators() {
        let d = EmbedDomain::parse("embed.example").unwrap();
        assert_eq!(d.embed_url("alpha", "a/b", 1), "https://embed.example/embed/alpha/a%2Fb/1");
    }

    #[test]
    fn current_domain_skips_failed_and_resets_when_exhausted() {
        let (m, d1, d2, d3) = manager(LONG);
        m.mark_failed(&d1);
        m.mark_failed(&d2);
        assert_eq!(m.current_domain(), d3);
        m.mark_failed(&d3);
        assert_eq!(m.current_domain(), d1);
        assert_eq!(m.failed_count(), 0);
    }

    #[test]
    fn mark_failed_is_idempotent() {
        let (m, d1, _, _) = manager(LONG);
        let t0 = Utc::now();
        m.mark_failed_at(&d1, t0);
        m.mark_failed_at(&d1, t0 + chrono::Duration::seconds(10));
        assert_eq!(m.failed_count(), 1);
        assert_eq!(m.status()[0].failed_at, Some(t0));
    }

    #[test]
    fn unknown_domains_are_ignored() {
        let (m, _, _, _) = manager(LONG);
        m.mark_failed(&EmbedDomain::parse("other.example").unwrap());
        assert_eq!(m.failed_count(), 0);
    }

    #[test]
    fn cooldown_expiry_restores_domain() {
        let (m, d1, d2, _) = manager(Duration::from_secs(60));
        let t0 = Utc::now();
        m.mark_failed_at(&d1, t0);
        assert_eq!(m.current_domain_at(t0 + chrono::Duration::seconds(30)), d2);
        assert_eq!(m.current_domain_at(t0 + chrono::Duration::seconds(61)), d1);
    }

    #[test]
    fn fallback_is_deterministic_and_distinct() {
        let (m, d1, d2, d3) = manager(LONG);
        assert_eq!(m.fallback_domain(&d1), Some(d2.clone()));
        assert_eq!(m.fallback_domain(&d3), Some(d1.clone()));
        m.mark_failed(&d1);
        assert_eq!(m.fallback_domain(&d1), Some(d2.clone()));
        m.mark_failed(&d2);
        assert_eq!(m.fallback_domain(&d2), Some(d3.clone()));
        m.mark_failed(&d3);
        assert_eq!(m.fallback_domain(&d3), None);
        assert!(!m.has_fallback_available(&d3));
    }

    #[test]
    fn fallback_respects_extra_filter() {
        let (m, d1, d2, d3) = manager(LONG);
        let got = m.fallback_domain_where(&d1, Utc::now(), |d| *d != d2);
        assert_eq!(got, Some(d3));
    }

    #[test]
    fn status_reports_availability() {
        let (m, _, d2, _) = manager(LONG);
        m.mark_failed(&d2);
        let status = m.status();
        assert!(status[0].available);
        assert!(!status[1].available);
        assert_eq!(serde_json::to_value(&status[1]).unwrap()["domain"], "d2.example");
    }
}
