mod http;

pub use http::HttpLoader;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error {status} fetching {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
        is_last_retry: bool,
    },
    #[error("Network error fetching {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        is_last_retry: bool,
    },
    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },
    #[error("Timeout fetching {url}")]
    Timeout { url: String, is_last_retry: bool },
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl LoadError {
    pub fn is_last_retry(&self) -> bool {
        match self {
            Self::Http { is_last_retry, .. } => *is_last_retry,
            Self::Network { is_last_retry, .. } => *is_last_retry,
            Self::Timeout { is_last_retry, .. } => *is_last_retry,
            Self::Parse { .. } | Self::Client(_) => true,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn parse(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// Fetches raw upstream documents: provider feeds, stream listings and
/// viewer counts.
#[async_trait]
pub trait FeedLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<String, LoadError>;
}

/// Load `uri` and parse the body as JSON.
pub async fn load_json(loader: &dyn FeedLoader, uri: &str) -> Result<Value, LoadError> {
    let body = loader.load(uri).await?;
    serde_json::from_str(&body).map_err(|e| LoadError::parse(uri, e))
}
