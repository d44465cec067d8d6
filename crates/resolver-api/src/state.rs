use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use resolver_core::{
    DomainError, EmbedDomainManager, MatchAggregator, PlaybackMachine, SessionHandle,
    StreamLister,
};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<MatchAggregator>,
    pub machine: Arc<PlaybackMachine>,
    pub lister: Option<Arc<dyn StreamLister>>,
    pub sessions: Arc<DashMap<Uuid, SessionHandle>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the state around `aggregator`, with an embed domain manager
    /// taken from the aggregator's configuration.
    pub fn new(aggregator: Arc<MatchAggregator>) -> Result<Self, DomainError> {
        let domains = Arc::new(EmbedDomainManager::from_config(aggregator.config())?);
        Ok(Self::with_domains(aggregator, domains))
    }

    pub fn with_domains(aggregator: Arc<MatchAggregator>, domains: Arc<EmbedDomainManager>) -> Self {
        let machine = Arc::new(PlaybackMachine::from_config(domains, aggregator.config()));
        Self {
            aggregator,
            machine,
            lister: None,
            sessions: Arc::new(DashMap::new()),
            started_at: Utc::now(),
        }
    }

    pub fn with_stream_lister(mut self, lister: Arc<dyn StreamLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn domains(&self) -> &Arc<EmbedDomainManager> {
        self.machine.domains()
    }
}
