use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::{debug, warn};

use super::{FeedLoader, LoadError};
use crate::config::ResolverConfig;

const USER_AGENT: &str = concat!("stream-resolver/", env!("CARGO_PKG_VERSION"));

/// Pooled HTTP loader with retries and exponential backoff.
///
/// Client errors other than 429 are returned immediately; server errors,
/// timeouts and network failures are retried up to `max_retries` times.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpLoader {
    pub fn new(timeout: Duration, max_retries: u32, base_backoff: Duration) -> Result<Self, LoadError> {
        Ok(Self::with_client(Self::build_client(timeout)?, max_retries, base_backoff))
    }

    pub fn with_client(client: Client, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            client,
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, LoadError> {
        Self::new(config.request_timeout, config.max_retries, config.retry_backoff)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn build_client(timeout: Duration) -> Result<Client, LoadError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain;q=0.9, */*;q=0.8"),
        );
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(8)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| LoadError::Client(e.to_string()))
    }
}

#[async_trait]
impl FeedLoader for HttpLoader {
    async fn load(&self, uri: &str) -> Result<String, LoadError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let is_last = attempt == self.max_retries;

            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(uri, attempt, backoff_ms = backoff.as_millis(), "Retrying upstream fetch");
                tokio::time::sleep(backoff).await;
            }

            let err = match self.client.get(uri).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) => LoadError::Network {
                        url: uri.to_string(),
                        reason: e.to_string(),
                        is_last_retry: is_last,
                    },
                },
                Ok(response) => {
                    let status = response.status().as_u16();
                    let message = response
                        .status()
                        .canonical_reason()
                        .unwrap_or("Unknown")
                        .to_string();
                    warn!(uri, status, attempt, "Upstream returned error status");
                    let err = LoadError::Http {
                        url: uri.to_string(),
                        status,
                        message,
                        is_last_retry: is_last,
                    };
                    if (400..500).contains(&status) && status != 429 {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() => {
                    warn!(uri, attempt, "Upstream fetch timed out");
                    LoadError::Timeout {
                        url: uri.to_string(),
                        is_last_retry: is_last,
                    }
                }
                Err(e) => {
                    warn!(uri, attempt, error = %e, "Upstream fetch network error");
                    LoadError::Network {
                        url: uri.to_string(),
                        reason: e.to_string(),
                        is_last_retry: is_last,
                    }
                }
            };
            last_error = Some(err);
        }

        Err(last_error.unwrap_or_else(|| LoadError::Network {
            url: uri.to_string(),
            reason: "no attempt was made".to_string(),
            is_last_retry: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader(retries: u32) -> HttpLoader {
        HttpLoader::new(Duration::from_secs(5), retries, Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn load_returns_body_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"title":"A vs B"}]"#))
            .mount(&server)
            .await;

        let body = loader(0).load(&format!("{}/matches", server.uri())).await.unwrap();
        assert!(body.contains("A vs B"));
    }

    #[tokio::test]
    async fn load_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = loader(2).load(&format!("{}/missing", server.uri())).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn load_retries_rate_limits_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let body = loader(2).load(&format!("{}/feed", server.uri())).await.unwrap();
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn load_returns_error_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = loader(2).load(&format!("{}/down", server.uri())).await.unwrap_err();
        assert!(err.is_last_retry());
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn load_json_reports_parse_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = load_json(&loader(0), &format!("{}/broken", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }
}
