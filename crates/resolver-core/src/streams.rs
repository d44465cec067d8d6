//! Stream listings: the playable variants behind each source of a match.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::fallback::StreamInventory;
use crate::loader::{load_json, FeedLoader, LoadError};
use crate::model::{Match, SourceRef, Stream};

const STREAM_NO_FIELDS: &[&str] = &["streamNo", "stream_no", "number", "no"];
const LANGUAGE_FIELDS: &[&str] = &["language", "lang"];
const EMBED_FIELDS: &[&str] = &["embedUrl", "embed_url", "embed", "iframe"];
const HLS_FIELDS: &[&str] = &["hls", "hls_url", "hlsUrl", "m3u8", "manifest"];

#[async_trait]
pub trait StreamLister: Send + Sync {
    async fn list_streams(&self, source: &SourceRef) -> Result<Vec<Stream>, LoadError>;
}

/// Lists streams from a URL template containing `{source}` and `{id}`.
pub struct HttpStreamLister {
    loader: Arc<dyn FeedLoader>,
    url_template: String,
}

impl HttpStreamLister {
    pub fn new(loader: Arc<dyn FeedLoader>, url_template: impl Into<String>) -> Self {
        Self {
            loader,
            url_template: url_template.into(),
        }
    }

    pub fn url_for(&self, source: &SourceRef) -> String {
        expand_template(&self.url_template, source)
    }
}

#[async_trait]
impl StreamLister for HttpStreamLister {
    async fn list_streams(&self, source: &SourceRef) -> Result<Vec<Stream>, LoadError> {
        let doc = load_json(self.loader.as_ref(), &self.url_for(source)).await?;
        Ok(parse_streams(&doc, source))
    }
}

/// Substitute `{source}` and `{id}`, percent-encoding reserved characters.
pub fn expand_template(template: &str, source: &SourceRef) -> String {
    template
        .replace("{source}", &encode_segment(&source.source))
        .replace("{id}", &encode_segment(&source.id))
}

fn encode_segment(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Parse a listing body: an array of stream objects, optionally wrapped
/// under `streams` or `data`. Items missing a stream number are numbered by
/// position.
pub fn parse_streams(doc: &Value, source: &SourceRef) -> Vec<Stream> {
    let items = match doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => match ["streams", "data"]
            .iter()
            .find_map(|k| doc.get(*k).and_then(Value::as_array))
        {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_object())
        .map(|(idx, item)| {
            let stream_no = STREAM_NO_FIELDS
                .iter()
                .find_map(|f| item.get(*f).and_then(as_u32))
                .unwrap_or(idx as u32 + 1);
            Stream {
                source: source.source.clone(),
                id: source.id.clone(),
                stream_no,
                language: str_field(item, LANGUAGE_FIELDS),
                hd: item.get("hd").and_then(Value::as_bool).unwrap_or(false),
                viewers: item.get("viewers").and_then(Value::as_u64),
                embed_url: str_field(item, EMBED_FIELDS),
                hls_url: str_field(item, HLS_FIELDS).or_else(|| {
                    str_field(item, &["url", "file"]).filter(|u| u.contains(".m3u8"))
                }),
            }
        })
        .collect()
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_field(item: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| item.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build the inventory for `m`, one group per source key in source order.
///
/// Without a lister, or when a listing fails or comes back empty, the source
/// gets a single synthetic first variant so it stays playable as an embed.
pub async fn build_inventory(
    m: &Match,
    lister: Option<&dyn StreamLister>,
    concurrency: usize,
) -> StreamInventory {
    let Some(lister) = lister else {
        return StreamInventory::from_match(m);
    };

    let fetches: Vec<_> = m
        .sources
        .iter()
        .map(|source| {
            let source = source.clone();
            async move {
                let listing = lister.list_streams(&source).await;
                (source, listing)
            }
        })
        .collect();
    let listings: Vec<(SourceRef, Result<Vec<Stream>, LoadError>)> = stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut inventory = StreamInventory::new();
    for (source, listing) in listings {
        let streams = match listing {
            Ok(streams) if !streams.is_empty() => streams,
            Ok(_) => {
                debug!(%source, "Empty stream listing, using first variant");
                vec![Stream::fallback_for(&source)]
            }
            Err(e) => {
                warn!(%source, error = %e, "Stream listing failed, using first variant");
                vec![Stream::fallback_for(&source)]
            }
        };
        inventory.push(&source.source, streams);
    }
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::HttpLoader;
    use crate::model::{StreamRef, Teams};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture(sources: Vec<SourceRef>) -> Match {
        Match {
            id: "m1".into(),
            title: "Arsenal vs Chelsea".into(),
            category: "football".into(),
            date: 0,
            date_defaulted: false,
            teams: Teams::pair("Arsenal", "Chelsea"),
            sources,
            poster: None,
            popular: false,
            viewer_count: None,
        }
    }

    #[test]
    fn parses_listing_fields() {
        let source = SourceRef::new("alpha", "arsenal-chelsea");
        let doc = json!([
            {"streamNo": 2, "language": "English", "hd": true, "viewers": 120, "embedUrl": "https://e/x"},
            {"streamNo": 1, "hls": "https://cdn/live.m3u8"},
            {"language": "Spanish"},
            "junk"
        ]);
        let streams = parse_streams(&doc, &source);
        assert_eq!(streams.len(), 3);
        assert_eq!(streams[0].stream_no, 2);
        assert!(streams[0].hd);
        assert_eq!(streams[0].viewers, Some(120));
        assert_eq!(streams[1].hls_url.as_deref(), Some("https://cdn/live.m3u8"));
        assert_eq!(streams[2].stream_no, 3);
        assert_eq!(streams[2].source, "alpha");
    }

    #[test]
    fn parses_wrapped_listing_and_url_manifests() {
        let source = SourceRef::new("alpha", "1");
        let doc = json!({"streams": [{"stream_no": "4", "url": "https://cdn/a.m3u8?t=1"}, {"url": "https://page"}]});
        let streams = parse_streams(&doc, &source);
        assert_eq!(streams[0].stream_no, 4);
        assert!(streams[0].is_hls());
        assert!(!streams[1].is_hls());
        assert!(parse_streams(&json!({"error": "x"}), &source).is_empty());
    }

    #[test]
    fn template_expansion_encodes_segments() {
        let source = SourceRef::new("alpha", "a b/c");
        assert_eq!(
            expand_template("https://h/api/stream/{source}/{id}", &source),
            "https://h/api/stream/alpha/a%20b%2Fc"
        );
    }

    #[tokio::test]
    async fn inventory_without_lister_uses_first_variants() {
        let m = fixture(vec![SourceRef::new("alpha", "1"), SourceRef::new("bravo", "2")]);
        let inv = build_inventory(&m, None, 4).await;
        assert_eq!(inv.len(), 2);
    }

    #[tokio::test]
    async fn inventory_orders_streams_and_falls_back_per_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/alpha/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"streamNo": 2}, {"streamNo": 1}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/stream/bravo/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let loader = Arc::new(HttpLoader::new(Duration::from_secs(5), 0, Duration::from_millis(10)).unwrap());
        let lister = HttpStreamLister::new(loader, format!("{}/api/stream/{{source}}/{{id}}", server.uri()));
        let m = fixture(vec![SourceRef::new("alpha", "1"), SourceRef::new("bravo", "2")]);

        let inv = build_inventory(&m, Some(&lister), 2).await;
        let refs: Vec<StreamRef> = inv.candidates().iter().map(Stream::stream_ref).collect();
        assert_eq!(
            refs,
            vec![
                StreamRef::new("alpha", "1", 1),
                StreamRef::new("alpha", "1", 2),
                StreamRef::new("bravo", "2", 1),
            ]
        );
    }

    #[tokio::test]
    async fn inventory_builds_on_a_spawned_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream/alpha/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"streamNo": 1}])))
            .mount(&server)
            .await;

        let loader = Arc::new(HttpLoader::new(Duration::from_secs(5), 0, Duration::from_millis(10)).unwrap());
        let lister: Arc<dyn StreamLister> = Arc::new(HttpStreamLister::new(
            loader,
            format!("{}/api/stream/{{source}}/{{id}}", server.uri()),
        ));
        let m = fixture(vec![SourceRef::new("alpha", "1")]);

        let inv = tokio::spawn(async move { build_inventory(&m, Some(lister.as_ref()), 2).await })
            .await
            .unwrap();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv.candidates()[0].stream_ref(), StreamRef::new("alpha", "1", 1));
    }
}
