//! Optional viewer-count enrichment. Failures never hide a match.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::loader::{load_json, FeedLoader, LoadError};
use crate::model::{Match, SourceRef};
use crate::streams::expand_template;

const COUNT_FIELDS: &[&str] = &["viewers", "viewerCount", "viewer_count", "count"];

#[async_trait]
pub trait ViewerCountService: Send + Sync {
    async fn viewer_count(&self, source: &SourceRef) -> Result<Option<u64>, LoadError>;
}

pub struct HttpViewerService {
    loader: Arc<dyn FeedLoader>,
    url_template: String,
}

impl HttpViewerService {
    pub fn new(loader: Arc<dyn FeedLoader>, url_template: impl Into<String>) -> Self {
        Self {
            loader,
            url_template: url_template.into(),
        }
    }
}

#[async_trait]
impl ViewerCountService for HttpViewerService {
    async fn viewer_count(&self, source: &SourceRef) -> Result<Option<u64>, LoadError> {
        let doc = load_json(self.loader.as_ref(), &expand_template(&self.url_template, source)).await?;
        Ok(parse_count(&doc))
    }
}

/// A bare number, or an object carrying one of the usual count fields.
pub fn parse_count(doc: &Value) -> Option<u64> {
    match doc {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(_) => COUNT_FIELDS
            .iter()
            .filter_map(|f| doc.get(*f))
            .find_map(parse_count),
        _ => None,
    }
}

/// Set each match's `viewer_count` to the maximum over its sources.
/// Matches whose sources all fail keep their previous count.
pub async fn enrich_matches_with_viewers(
    matches: Vec<Match>,
    service: &dyn ViewerCountService,
    concurrency: usize,
) -> Vec<Match> {
    let lookups: Vec<_> = matches
        .into_iter()
        .map(|mut m| async move {
            let mut best: Option<u64> = None;
            for source in &m.sources {
                match service.viewer_count(source).await {
                    Ok(Some(n)) => best = Some(best.map_or(n, |b| b.max(n))),
                    Ok(None) => {}
                    Err(e) => debug!(%source, error = %e, "Viewer count unavailable"),
                }
            }
            if best.is_some() {
                m.viewer_count = best;
            }
            m
        })
        .collect();
    stream::iter(lookups)
        .buffered(concurrency.max(1))
        .collect()
        .await
}
