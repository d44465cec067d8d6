use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

impl Team {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            badge: None,
        }
    }
}

/// Home/away pairing. Single-event shows carry only `home`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away: Option<Team>,
}

impl Teams {
    pub fn pair(home: impl Into<String>, away: impl Into<String>) -> Self {
        Self {
            home: Some(Team::named(home)),
            away: Some(Team::named(away)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.home.is_none() && self.away.is_none()
    }
}

/// Reference to one upstream stream backend for a match. Not a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub id: String,
}

impl SourceRef {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.id)
    }
}

/// Canonical fixture record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub title: String,
    pub category: String,
    /// Kickoff, epoch milliseconds.
    pub date: i64,
    /// Set when no provider field yielded a kickoff and `date` is the fetch time.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_defaulted: bool,
    #[serde(default, skip_serializing_if = "Teams::is_empty")]
    pub teams: Teams,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default)]
    pub popular: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u64>,
}

impl Match {
    pub fn kickoff(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.date)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_streamable(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn home_name(&self) -> Option<&str> {
        self.teams.home.as_ref().map(|t| t.name.as_str())
    }

    pub fn away_name(&self) -> Option<&str> {
        self.teams.away.as_ref().map(|t| t.name.as_str())
    }
}

/// `(source, id, stream_no)` triple addressing one playable variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamRef {
    pub source: String,
    pub id: String,
    pub stream_no: u32,
}

impl StreamRef {
    pub fn new(source: impl Into<String>, id: impl Into<String>, stream_no: u32) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
            stream_no,
        }
    }
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.id, self.stream_no)
    }
}

/// One playable variant under a source, as listed by the stream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub source: String,
    pub id: String,
    #[serde(default = "default_stream_no")]
    pub stream_no: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub hd: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_url: Option<String>,
    /// Direct HLS manifest, when the listing exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
}

fn default_stream_no() -> u32 {
    1
}

impl Stream {
    /// Synthetic first variant of a source, used when no listing is available.
    pub fn fallback_for(source: &SourceRef) -> Self {
        Self {
            source: source.source.clone(),
            id: source.id.clone(),
            stream_no: 1,
            language: None,
            hd: false,
            viewers: None,
            embed_url: None,
            hls_url: None,
        }
    }

    pub fn stream_ref(&self) -> StreamRef {
        StreamRef::new(&self.source, &self.id, self.stream_no)
    }

    pub fn is_hls(&self) -> bool {
        self.hls_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_defaults_stream_no_to_one() {
        let s: Stream = serde_json::from_str(r#"{"source":"alpha","id":"x"}"#).unwrap();
        assert_eq!(s.stream_no, 1);
        assert!(!s.is_hls());
    }

    #[test]
    fn match_serializes_without_empty_optionals() {
        let m = Match {
            id: "m1".into(),
            title: "Show".into(),
            category: "fight".into(),
            date: 0,
            date_defaulted: false,
            teams: Teams::default(),
            sources: vec![],
            poster: None,
            popular: false,
            viewer_count: None,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("teams").is_none());
        assert!(v.get("date_defaulted").is_none());
        assert_eq!(v["sources"], serde_json::json!([]));
    }

    #[test]
    fn stream_ref_display() {
        assert_eq!(StreamRef::new("alpha", "abc", 2).to_string(), "alpha/abc/2");
    }
}
