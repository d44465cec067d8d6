//! Classifies what an embed or manifest URL actually serves.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::loader::LoadError;
use crate::playback::PlaybackTech;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Hls,
    Mp4,
    Html,
}

impl MediaKind {
    /// Whether a player using `tech` can render this content.
    pub fn playable_with(self, tech: PlaybackTech) -> bool {
        match tech {
            PlaybackTech::NativeHls => matches!(self, Self::Hls | Self::Mp4),
            PlaybackTech::Iframe => true,
        }
    }
}

#[async_trait]
pub trait StreamInspector: Send + Sync {
    async fn inspect(&self, url: &str) -> Result<MediaKind, LoadError>;
}

/// Classify a response body. HLS manifests must parse as a playlist.
pub fn classify(url: &str, content_type: Option<&str>, body: &[u8]) -> Result<MediaKind, LoadError> {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    let head = String::from_utf8_lossy(&body[..body.len().min(512)]).to_ascii_lowercase();
    let trimmed = head.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with("#extm3u") || content_type.contains("mpegurl") {
        return match m3u8_rs::parse_playlist(body) {
            Ok(_) => Ok(MediaKind::Hls),
            Err(e) => Err(LoadError::parse(url, format!("invalid playlist: {e:?}"))),
        };
    }
    if content_type.starts_with("video/") {
        return Ok(MediaKind::Mp4);
    }
    if content_type.contains("html") || trimmed.starts_with("<!doctype html") || trimmed.contains("<html") {
        return Ok(MediaKind::Html);
    }
    Err(LoadError::parse(
        url,
        format!("unrecognized content type '{content_type}'"),
    ))
}

#[derive(Debug, Clone)]
pub struct HttpInspector {
    client: Client,
}

impl HttpInspector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamInspector for HttpInspector {
    async fn inspect(&self, url: &str) -> Result<MediaKind, LoadError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LoadError::Timeout {
                    url: url.to_string(),
                    is_last_retry: true,
                }
            } else {
                LoadError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                    is_last_retry: true,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
                is_last_retry: true,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Media bodies can be unbounded; the header is enough.
        if content_type.as_deref().is_some_and(|ct| ct.starts_with("video/")) {
            return Ok(MediaKind::Mp4);
        }

        let body = response.bytes().await.map_err(|e| LoadError::Network {
            url: url.to_string(),
            reason: e.to_string(),
            is_last_retry: true,
        })?;
        let kind = classify(url, content_type.as_deref(), &body)?;
        debug!(url, ?kind, "Inspected stream");
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA_PLAYLIST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:6.0,\nseg0.ts\n";

    #[test]
    fn classifies_manifests_pages_and_video() {
        assert_eq!(classify("u", None, MEDIA_PLAYLIST.as_bytes()).unwrap(), MediaKind::Hls);
        assert_eq!(
            classify("u", Some("text/html; charset=utf-8"), b"<!DOCTYPE html><iframe>").unwrap(),
            MediaKind::Html
        );
        assert_eq!(classify("u", Some("video/mp4"), b"\0\0\0 ftyp").unwrap(), MediaKind::Mp4);
        assert!(classify("u", Some("application/json"), b"{}").is_err());
    }

    #[test]
    fn native_hls_cannot_render_pages() {
        assert!(!MediaKind::Html.playable_with(PlaybackTech::NativeHls));
        assert!(MediaKind::Hls.playable_with(PlaybackTech::NativeHls));
        assert!(MediaKind::Html.playable_with(PlaybackTech::Iframe));
    }

    #[tokio::test]
    async fn http_inspector_reads_manifest_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/vnd.apple.mpegurl")
                    .set_body_string(MEDIA_PLAYLIST),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::builder().timeout(Duration::from_secs(5)).build().unwrap();
        let inspector = HttpInspector::new(client);
        assert_eq!(
            inspector.inspect(&format!("{}/live.m3u8", server.uri())).await.unwrap(),
            MediaKind::Hls
        );
        let err = inspector
            .inspect(&format!("{}/gone.m3u8", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }
}
