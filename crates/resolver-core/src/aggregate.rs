//! Shared match snapshot: fetch every provider, consolidate, enrich, sort.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::consolidate::consolidate;
use crate::loader::LoadError;
use crate::model::Match;
use crate::provider::MatchProvider;
use crate::viewers::{enrich_matches_with_viewers, ViewerCountService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl AggregatorState {
    pub fn can_transition_to(self, target: AggregatorState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Active)
                | (Self::Active, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopping, Self::Active)
                | (Self::Stopped, Self::Active)
        )
    }
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub last_fetch: DateTime<Utc>,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderStatus {
    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}

type Providers = Arc<Vec<Arc<dyn MatchProvider>>>;

pub struct MatchAggregator {
    id: Uuid,
    config: ResolverConfig,
    providers: Providers,
    viewers: Option<Arc<dyn ViewerCountService>>,
    matches: Arc<RwLock<Vec<Match>>>,
    provider_status: Arc<RwLock<HashMap<String, ProviderStatus>>>,
    state: Arc<RwLock<AggregatorState>>,
    last_refresh: Arc<RwLock<Option<DateTime<Utc>>>>,
    loop_generation: Arc<AtomicU64>,
    created_at: DateTime<Utc>,
}

impl MatchAggregator {
    pub fn new(providers: Vec<Arc<dyn MatchProvider>>, config: ResolverConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            providers: Arc::new(providers),
            viewers: None,
            matches: Arc::new(RwLock::new(Vec::new())),
            provider_status: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(RwLock::new(AggregatorState::Idle)),
            last_refresh: Arc::new(RwLock::new(None)),
            loop_generation: Arc::new(AtomicU64::new(0)),
            created_at: Utc::now(),
        }
    }

    pub fn with_viewer_service(mut self, service: Arc<dyn ViewerCountService>) -> Self {
        self.viewers = Some(service);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn state(&self) -> AggregatorState {
        *self.state.read().await
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }

    /// Current snapshot in display order.
    pub async fn matches(&self) -> Vec<Match> {
        self.matches.read().await.clone()
    }

    pub async fn get_match(&self, id: &str) -> Option<Match> {
        self.matches.read().await.iter().find(|m| m.id == id).cloned()
    }

    /// Per-provider status, in provider order.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let status = self.provider_status.read().await;
        self.providers
            .iter()
            .filter_map(|p| status.get(p.name()).cloned())
            .collect()
    }

    /// Fetch every provider once and publish the result. Returns the number
    /// of consolidated matches.
    pub async fn refresh_once(&self) -> usize {
        refresh(
            &self.providers,
            self.viewers.as_ref(),
            &self.config,
            &self.matches,
            &self.provider_status,
            &self.last_refresh,
        )
        .await
    }

    pub async fn start(&self) -> Result<(), String> {
        {
            let mut state = self.state.write().await;
            if *state == AggregatorState::Active {
                return Ok(());
            }
            if !state.can_transition_to(AggregatorState::Active) {
                return Err(format!("Cannot start aggregator in state {}", *state));
            }
            *state = AggregatorState::Active;
        }
        let generation = self.loop_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(aggregator = %self.id, providers = self.providers.len(), "Starting match refresh");

        let state = Arc::clone(&self.state);
        let providers = Arc::clone(&self.providers);
        let viewers = self.viewers.clone();
        let config = self.config.clone();
        let matches = Arc::clone(&self.matches);
        let provider_status = Arc::clone(&self.provider_status);
        let last_refresh = Arc::clone(&self.last_refresh);
        let loop_generation = Arc::clone(&self.loop_generation);

        tokio::spawn(async move {
            loop {
                if loop_generation.load(Ordering::SeqCst) != generation {
                    debug!("Superseded refresh loop exiting");
                    break;
                }
                {
                    let mut s = state.write().await;
                    if *s != AggregatorState::Active {
                        *s = AggregatorState::Stopped;
                        info!("Match refresh stopped");
                        break;
                    }
                }

                refresh(
                    &providers,
                    viewers.as_ref(),
                    &config,
                    &matches,
                    &provider_status,
                    &last_refresh,
                )
                .await;

                tokio::time::sleep(jittered(config.refresh_interval)).await;
            }
        });

        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if state.can_transition_to(AggregatorState::Stopping) {
            *state = AggregatorState::Stopping;
            info!(aggregator = %self.id, "Stopping match refresh");
        }
    }
}

/// `base` shifted by up to ±1/7 so that many instances do not fetch in lockstep.
fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter_range = base_ms / 7;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((base_ms as i64 + jitter).max(1) as u64)
}

async fn refresh(
    providers: &Providers,
    viewers: Option<&Arc<dyn ViewerCountService>>,
    config: &ResolverConfig,
    matches: &RwLock<Vec<Match>>,
    provider_status: &RwLock<HashMap<String, ProviderStatus>>,
    last_refresh: &RwLock<Option<DateTime<Utc>>>,
) -> usize {
    let fetches: Vec<_> = providers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            async move { (p.name().to_string(), p.fetch_matches().await) }
        })
        .collect();
    let results: Vec<(String, Result<Vec<Match>, LoadError>)> = stream::iter(fetches)
        .buffered(config.max_concurrent_fetches.max(1))
        .collect()
        .await;

    let now = Utc::now();
    let mut collected = Vec::new();
    {
        let mut status = provider_status.write().await;
        for (name, result) in results {
            let entry = match result {
                Ok(items) => {
                    let item_count = items.len();
                    collected.extend(items);
                    ProviderStatus {
                        name: name.clone(),
                        last_fetch: now,
                        item_count,
                        last_error: None,
                    }
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider fetch failed, treating as no data");
                    ProviderStatus {
                        name: name.clone(),
                        last_fetch: now,
                        item_count: 0,
                        last_error: Some(e.to_string()),
                    }
                }
            };
            status.insert(name, entry);
        }
    }

    let raw = collected.len();
    let mut consolidated = consolidate(collected, config.kickoff_tolerance);
    if let Some(service) = viewers {
        consolidated =
            enrich_matches_with_viewers(consolidated, service.as_ref(), config.max_concurrent_fetches)
                .await;
    }
    sort_for_display(&mut consolidated, now, config.live_window);

    let count = consolidated.len();
    *matches.write().await = consolidated;
    *last_refresh.write().await = Some(now);
    debug!(raw, consolidated = count, "Published match snapshot");
    count
}

fn is_live(m: &Match, now_ms: i64, window_ms: i64) -> bool {
    !m.date_defaulted && m.date <= now_ms && now_ms < m.date.saturating_add(window_ms)
}

/// Live first, then viewer count descending, then popular, then kickoff ascending.
pub fn sort_for_display(matches: &mut [Match], now: DateTime<Utc>, live_window: Duration) {
    let now_ms = now.timestamp_millis();
    let window_ms = i64::try_from(live_window.as_millis()).unwrap_or(i64::MAX);
    matches.sort_by(|a, b| {
        is_live(b, now_ms, window_ms)
            .cmp(&is_live(a, now_ms, window_ms))
            .then_with(|| b.viewer_count.unwrap_or(0).cmp(&a.viewer_count.unwrap_or(0)))
            .then_with(|| b.popular.cmp(&a.popular))
            .then_with(|| a.date.cmp(&b.date))
    });
}
