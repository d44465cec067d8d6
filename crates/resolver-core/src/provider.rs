//! Upstream match-data providers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::loader::{load_json, FeedLoader, LoadError};
use crate::model::Match;
use crate::normalize::{normalize_batch, ProviderHints};

/// Keys under which providers wrap their item arrays.
const WRAPPER_KEYS: &[&str] = &["matches", "events", "data", "streams"];

/// Keys that mark an object as a fixture rather than a category group.
const ITEM_MARKERS: &[&str] = &["title", "name", "teams", "home_team", "homeTeam"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_category: Option<String>,
    #[serde(default = "default_qualify_ids")]
    pub qualify_ids: bool,
}

fn default_qualify_ids() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            default_category: None,
            qualify_ids: true,
        }
    }

    pub fn hints(&self) -> ProviderHints {
        let hints = ProviderHints::new(&self.name).with_qualified_ids(self.qualify_ids);
        match &self.default_category {
            Some(c) => hints.with_default_category(c),
            None => hints,
        }
    }
}

#[async_trait]
pub trait MatchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_matches(&self) -> Result<Vec<Match>, LoadError>;
}

/// Provider serving a JSON document of fixtures in any of the common shapes.
pub struct JsonProvider {
    config: ProviderConfig,
    loader: Arc<dyn FeedLoader>,
}

impl JsonProvider {
    pub fn new(config: ProviderConfig, loader: Arc<dyn FeedLoader>) -> Self {
        Self { config, loader }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl MatchProvider for JsonProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch_matches(&self) -> Result<Vec<Match>, LoadError> {
        let doc = load_json(self.loader.as_ref(), &self.config.url).await?;
        let matches = extract_matches(&doc, &self.config.hints());
        debug!(provider = %self.config.name, count = matches.len(), "Fetched provider feed");
        Ok(matches)
    }
}

/// Normalize every fixture found in `doc`.
///
/// Accepts a bare array, an object wrapping the array under one of the
/// common keys, and category groups (`{category, streams: [...]}`) whose
/// category becomes the default for their items.
pub fn extract_matches(doc: &Value, hints: &ProviderHints) -> Vec<Match> {
    let mut out = Vec::new();
    collect(doc, hints, &mut out);
    out
}

fn collect(doc: &Value, hints: &ProviderHints, out: &mut Vec<Match>) {
    match doc {
        Value::Array(items) => {
            let mut plain = Vec::new();
            for item in items {
                match group_items(item) {
                    Some(inner) => {
                        let hints = match item.get("category").and_then(Value::as_str) {
                            Some(c) => hints.clone().with_default_category(c),
                            None => hints.clone(),
                        };
                        collect(inner, &hints, out);
                    }
                    None => plain.push(item.clone()),
                }
            }
            out.extend(normalize_batch(&plain, hints));
        }
        Value::Object(_) => {
            if let Some(inner) = wrapped(doc) {
                collect(inner, hints, out);
            } else {
                out.extend(normalize_batch(std::slice::from_ref(doc), hints));
            }
        }
        _ => debug!(provider = %hints.provider, "Ignoring non-collection feed document"),
    }
}

fn wrapped(doc: &Value) -> Option<&Value> {
    WRAPPER_KEYS
        .iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| v.is_array() || v.is_object())
}

/// Items of a category group, or `None` when `item` is itself a fixture.
fn group_items(item: &Value) -> Option<&Value> {
    if ITEM_MARKERS.iter().any(|k| item.get(*k).is_some()) {
        return None;
    }
    WRAPPER_KEYS
        .iter()
        .filter_map(|k| item.get(*k))
        .find(|v| v.is_array())
}
