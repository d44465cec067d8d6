//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [defaults]
//! domains = ["embedsports.top", "embedstreams.top"]
//! domain_cooldown_ms = 300000
//! watchdog_timeout_ms = 5000
//! refresh_interval_ms = 60000
//!
//! [[provider]]
//! name = "main"
//! url = "https://api.example.com/api/matches/live"
//!
//! [[provider]]
//! name = "fights"
//! url = "https://fights.example.com/events.json"
//! default_category = "fight"
//! qualify_ids = false
//!
//! [streams]
//! url_template = "https://api.example.com/api/stream/{source}/{id}"
//!
//! [viewers]
//! url_template = "https://api.example.com/api/viewers/{source}/{id}"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use resolver_core::{
    EmbedDomain, FeedLoader, HttpStreamLister, HttpViewerService, JsonProvider, MatchProvider,
    ProviderConfig, ResolverConfig,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub provider: Vec<ProviderConfig>,

    #[serde(default)]
    pub streams: TemplateConfig,

    #[serde(default)]
    pub viewers: TemplateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Overrides for [`ResolverConfig`]. Anything left out keeps the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    pub domain_cooldown_ms: Option<u64>,
    pub kickoff_tolerance_ms: Option<u64>,
    pub watchdog_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub refresh_interval_ms: Option<u64>,
    pub max_concurrent_fetches: Option<usize>,
    pub history_limit: Option<usize>,
    pub live_window_ms: Option<u64>,
}

impl DefaultsConfig {
    pub fn to_resolver_config(&self) -> ResolverConfig {
        let mut c = ResolverConfig::default();
        if let Some(ref domains) = self.domains {
            c = c.with_domains(domains.iter().cloned());
        }
        if let Some(v) = self.domain_cooldown_ms {
            c = c.with_domain_cooldown(v);
        }
        if let Some(v) = self.kickoff_tolerance_ms {
            c = c.with_kickoff_tolerance(v);
        }
        if let Some(v) = self.watchdog_timeout_ms {
            c = c.with_watchdog_timeout(v);
        }
        if let Some(v) = self.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        if let Some(v) = self.max_retries {
            c = c.with_max_retries(v);
        }
        if let Some(v) = self.retry_backoff_ms {
            c = c.with_retry_backoff(v);
        }
        if let Some(v) = self.refresh_interval_ms {
            c = c.with_refresh_interval(v);
        }
        if let Some(v) = self.max_concurrent_fetches {
            c = c.with_max_concurrent_fetches(v);
        }
        if let Some(v) = self.history_limit {
            c = c.with_history_limit(v);
        }
        if let Some(v) = self.live_window_ms {
            c = c.with_live_window(v);
        }
        c
    }
}

/// A `{source}`/`{id}` URL template for per-source lookups.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    pub url_template: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Add a provider given only by URL, named after its host.
    pub fn add_provider_url(&mut self, raw: &str) -> Result<(), String> {
        let parsed = parse_http_url(raw).map_err(|e| format!("Invalid provider URL {}: {}", raw, e))?;
        let host = parsed.host_str().unwrap_or("provider");
        let mut name = host.to_string();
        let mut n = 2;
        while self.provider.iter().any(|p| p.name == name) {
            name = format!("{}-{}", host, n);
            n += 1;
        }
        self.provider.push(ProviderConfig::new(name, raw));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for p in &self.provider {
            if p.name.trim().is_empty() {
                return Err("Provider name must not be empty".into());
            }
            if !names.insert(p.name.as_str()) {
                return Err(format!("Duplicate provider name: {}", p.name));
            }
            parse_http_url(&p.url)
                .map_err(|e| format!("Invalid URL for provider '{}': {} ({})", p.name, p.url, e))?;
        }

        for (section, template) in [("streams", &self.streams), ("viewers", &self.viewers)] {
            if let Some(ref t) = template.url_template {
                if !t.contains("{source}") || !t.contains("{id}") {
                    return Err(format!(
                        "[{}] url_template must contain {{source}} and {{id}}: {}",
                        section, t
                    ));
                }
            }
        }

        if let Some(ref domains) = self.defaults.domains {
            if domains.is_empty() {
                return Err("[defaults] domains must not be empty".into());
            }
            for d in domains {
                EmbedDomain::parse(d).map_err(|e| e.to_string())?;
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }

    pub fn providers(&self, loader: &Arc<dyn FeedLoader>) -> Vec<Arc<dyn MatchProvider>> {
        self.provider
            .iter()
            .map(|p| Arc::new(JsonProvider::new(p.clone(), Arc::clone(loader))) as Arc<dyn MatchProvider>)
            .collect()
    }

    pub fn stream_lister(&self, loader: &Arc<dyn FeedLoader>) -> Option<HttpStreamLister> {
        self.streams
            .url_template
            .as_ref()
            .map(|t| HttpStreamLister::new(Arc::clone(loader), t))
    }

    pub fn viewer_service(&self, loader: &Arc<dyn FeedLoader>) -> Option<HttpViewerService> {
        self.viewers
            .url_template
            .as_ref()
            .map(|t| HttpViewerService::new(Arc::clone(loader), t))
    }
}

fn parse_http_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| e.to_string())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("must use http or https".into());
    }
    Ok(parsed)
}
