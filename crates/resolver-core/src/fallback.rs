//! Source-level fallback: choosing the next untried stream of a match.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{Match, Stream, StreamRef};

/// Streams listed under one provider key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStreams {
    pub provider: String,
    pub streams: Vec<Stream>,
}

/// Every known stream for one match, grouped by provider in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamInventory {
    groups: Vec<ProviderStreams>,
}

impl StreamInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// One synthetic first-variant stream per source of `m`.
    pub fn from_match(m: &Match) -> Self {
        let mut inventory = Self::new();
        for source in &m.sources {
            inventory.push(&source.source, vec![Stream::fallback_for(source)]);
        }
        inventory
    }

    /// Add streams under `provider`, merging with an existing group of the same key.
    pub fn push(&mut self, provider: &str, streams: Vec<Stream>) {
        let idx = match self.groups.iter().position(|g| g.provider == provider) {
            Some(i) => i,
            None => {
                self.groups.push(ProviderStreams {
                    provider: provider.to_string(),
                    streams: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[idx];
        for stream in streams {
            let r = stream.stream_ref();
            if !group.streams.iter().any(|s| s.stream_ref() == r) {
                group.streams.push(stream);
            }
        }
        // Ids keep their first-seen order; numbers ascend within each id.
        let mut ids: Vec<String> = Vec::new();
        for s in &group.streams {
            if !ids.contains(&s.id) {
                ids.push(s.id.clone());
            }
        }
        group.streams.sort_by_key(|s| {
            let rank = ids.iter().position(|id| *id == s.id).unwrap_or(ids.len());
            (rank, s.stream_no)
        });
    }

    pub fn groups(&self) -> &[ProviderStreams] {
        &self.groups
    }

    /// Flattened candidate order: provider order, then id order, then stream
    /// number ascending.
    pub fn candidates(&self) -> Vec<Stream> {
        self.groups
            .iter()
            .flat_map(|g| g.streams.iter().cloned())
            .collect()
    }

    pub fn find(&self, r: &StreamRef) -> Option<&Stream> {
        self.groups
            .iter()
            .flat_map(|g| g.streams.iter())
            .find(|s| s.source == r.source && s.id == r.id && s.stream_no == r.stream_no)
    }

    pub fn first(&self) -> Option<&Stream> {
        self.groups.iter().flat_map(|g| g.streams.iter()).next()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.streams.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackProgress {
    pub attempted_sources_count: usize,
    pub total_sources_count: usize,
}

/// Walks the flattened candidate list of a [`StreamInventory`], never offering
/// the same stream twice within one session.
#[derive(Debug, Clone)]
pub struct AutoFallbackCoordinator {
    candidates: Vec<Stream>,
    attempted: HashSet<StreamRef>,
    active: StreamRef,
}

impl AutoFallbackCoordinator {
    pub fn new(inventory: &StreamInventory, active: StreamRef) -> Self {
        let mut coordinator = Self {
            candidates: inventory.candidates(),
            attempted: HashSet::new(),
            active: active.clone(),
        };
        coordinator.anchor(active);
        coordinator
    }

    /// Select the next untried candidate after the active one and report it
    /// through `on_source_change`. Returns `false` once every candidate was tried.
    pub fn try_next_source<F>(&mut self, mut on_source_change: F) -> bool
    where
        F: FnMut(&Stream),
    {
        let n = self.candidates.len();
        let start = self
            .candidates
            .iter()
            .position(|s| s.stream_ref() == self.active)
            .map(|i| i + 1)
            .unwrap_or(0);

        let next = (0..n)
            .map(|k| &self.candidates[(start + k) % n])
            .find(|s| !self.attempted.contains(&s.stream_ref()))
            .cloned();

        match next {
            Some(stream) => {
                let r = stream.stream_ref();
                info!(
                    from = %self.active,
                    to = %r,
                    attempted = self.attempted.len() + 1,
                    total = n,
                    "Auto-fallback to next source"
                );
                self.attempted.insert(r.clone());
                self.active = r;
                on_source_change(&stream);
                true
            }
            None => {
                debug!(total = n, "Auto-fallback candidates exhausted");
                false
            }
        }
    }

    /// Forget every attempt and start over from `active`.
    pub fn reset(&mut self, active: StreamRef) {
        self.attempted.clear();
        self.anchor(active);
    }

    pub fn active(&self) -> &StreamRef {
        &self.active
    }

    pub fn attempted_sources_count(&self) -> usize {
        self.attempted.len()
    }

    pub fn total_sources_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn progress(&self) -> FallbackProgress {
        FallbackProgress {
            attempted_sources_count: self.attempted_sources_count(),
            total_sources_count: self.total_sources_count(),
        }
    }

    fn anchor(&mut self, active: StreamRef) {
        if self.candidates.iter().any(|s| s.stream_ref() == active) {
            self.attempted.insert(active.clone());
        }
        self.active = active;
    }
}
