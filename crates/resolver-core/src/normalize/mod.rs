//! Normalization of heterogeneous provider payloads into canonical [`Match`] records.
//!
//! Every provider spells the same fixture differently: nested or flat team
//! objects, numeric or ISO kickoff times, `sources` or `channels`. The
//! functions here accept whatever the provider sent and either produce a
//! [`Match`] or drop the item. Nothing in this module returns an error.

pub mod category;
pub mod time;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Match, SourceRef, Team, Teams};

pub use category::{map_category, DEFAULT_CATEGORY};

const ID_FIELDS: &[&str] = &["id", "_id", "match_id", "matchId", "event_id", "slug"];
const TITLE_FIELDS: &[&str] = &["title", "name", "event", "event_name", "match"];
const CATEGORY_FIELDS: &[&str] = &["category", "sport", "sportId", "sport_id", "sport_name"];
const EMBED_FIELDS: &[&str] = &[
    "embed",
    "embedUrl",
    "embed_url",
    "iframe",
    "stream_url",
    "video_link",
    "url",
];
const BADGE_FIELDS: &[&str] = &["badge", "logo", "image"];
const POSTER_FIELDS: &[&str] = &["poster", "thumbnail", "image"];
const VIEWER_FIELDS: &[&str] = &["viewers", "viewerCount", "viewer_count"];

/// Title separators tried in order; the first one found splits the title.
const TITLE_SEPARATORS: &[&str] = &[" vs. ", " vs ", " v "];

/// What the caller knows about the provider an item came from.
#[derive(Debug, Clone, Default)]
pub struct ProviderHints {
    pub provider: String,
    pub default_category: Option<String>,
    /// Prefix ids with the provider name so ids from different feeds never collide.
    pub qualify_ids: bool,
}

impl ProviderHints {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            default_category: None,
            qualify_ids: true,
        }
    }

    pub fn with_default_category(mut self, category: impl Into<String>) -> Self {
        self.default_category = Some(category.into());
        self
    }

    pub fn with_qualified_ids(mut self, qualify: bool) -> Self {
        self.qualify_ids = qualify;
        self
    }

    fn source_key(&self) -> &str {
        if self.provider.is_empty() {
            "default"
        } else {
            &self.provider
        }
    }
}

/// Normalize one raw provider item. Returns `None` when no id or title can be derived.
pub fn normalize(raw: &Value, hints: &ProviderHints) -> Option<Match> {
    normalize_at(raw, hints, Utc::now().timestamp_millis())
}

/// Same as [`normalize`] with an explicit "now" used for the defaulted kickoff.
pub fn normalize_at(raw: &Value, hints: &ProviderHints, now_ms: i64) -> Option<Match> {
    if !raw.is_object() {
        debug!(provider = %hints.provider, "Dropping non-object item");
        return None;
    }

    let raw_title = string_field(raw, TITLE_FIELDS);
    let teams = explicit_teams(raw)
        .or_else(|| raw_title.as_deref().and_then(split_title))
        .unwrap_or_default();

    let title = raw_title.or_else(|| title_from_teams(&teams));
    let Some(title) = title else {
        debug!(provider = %hints.provider, "Dropping item without derivable title");
        return None;
    };

    let kickoff = time::extract_kickoff(raw);
    let id = string_field(raw, ID_FIELDS).or_else(|| synthesize_id(&title, kickoff));
    let Some(id) = id else {
        debug!(provider = %hints.provider, %title, "Dropping item without derivable id");
        return None;
    };
    let id = if hints.qualify_ids && !hints.provider.is_empty() {
        format!("{}:{}", hints.provider, id)
    } else {
        id
    };

    let (date, date_defaulted) = match kickoff {
        Some(ms) => (ms, false),
        None => {
            warn!(provider = %hints.provider, %id, "No parseable kickoff, defaulting to now");
            (now_ms, true)
        }
    };

    let category = string_field(raw, CATEGORY_FIELDS)
        .or_else(|| hints.default_category.clone())
        .map(|c| map_category(&c))
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    Some(Match {
        id,
        title,
        category,
        date,
        date_defaulted,
        teams,
        sources: extract_sources(raw, hints),
        poster: string_field(raw, POSTER_FIELDS),
        popular: raw.get("popular").and_then(Value::as_bool).unwrap_or(false),
        viewer_count: VIEWER_FIELDS
            .iter()
            .find_map(|f| raw.get(*f).and_then(Value::as_u64)),
    })
}

/// Normalize a whole batch, dropping malformed items.
pub fn normalize_batch(items: &[Value], hints: &ProviderHints) -> Vec<Match> {
    let now_ms = Utc::now().timestamp_millis();
    let matches: Vec<Match> = items
        .iter()
        .filter_map(|item| normalize_at(item, hints, now_ms))
        .collect();
    let dropped = items.len() - matches.len();
    if dropped > 0 {
        warn!(provider = %hints.provider, dropped, kept = matches.len(), "Dropped malformed items");
    }
    matches
}

/// Split a combined title like "Arsenal vs Chelsea" into home and away teams.
pub fn split_title(title: &str) -> Option<Teams> {
    let lowered = title.to_ascii_lowercase();
    TITLE_SEPARATORS.iter().find_map(|sep| {
        let idx = lowered.find(sep)?;
        let home = title[..idx].trim();
        let away = title[idx + sep.len()..].trim();
        if home.is_empty() || away.is_empty() {
            return None;
        }
        Some(Teams::pair(home, away))
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(item: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| item.get(*f))
        .find_map(scalar_to_string)
}

fn team_from_value(value: &Value) -> Option<Team> {
    match value {
        Value::Object(_) => {
            let name = string_field(value, &["name", "title", "team"])?;
            Some(Team {
                name,
                badge: string_field(value, BADGE_FIELDS),
            })
        }
        other => scalar_to_string(other).map(Team::named),
    }
}

fn explicit_teams(item: &Value) -> Option<Teams> {
    let nested = item.get("teams");
    let candidates: [(Option<&Value>, Option<&Value>); 4] = [
        (
            nested.and_then(|t| t.get("home")),
            nested.and_then(|t| t.get("away")),
        ),
        (item.get("home_team"), item.get("away_team")),
        (item.get("homeTeam"), item.get("awayTeam")),
        (item.get("home"), item.get("away")),
    ];

    candidates.into_iter().find_map(|(home, away)| {
        let home = home.and_then(team_from_value)?;
        Some(Teams {
            home: Some(home),
            away: away.and_then(team_from_value),
        })
    })
}

fn title_from_teams(teams: &Teams) -> Option<String> {
    match (&teams.home, &teams.away) {
        (Some(h), Some(a)) => Some(format!("{} vs {}", h.name, a.name)),
        (Some(h), None) => Some(h.name.clone()),
        _ => None,
    }
}

fn synthesize_id(title: &str, kickoff: Option<i64>) -> Option<String> {
    let slug = slugify(title);
    if slug.is_empty() {
        return None;
    }
    Some(match kickoff {
        Some(ms) => format!("{}-{}", slug, ms / 1000),
        None => slug,
    })
}

pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn extract_sources(item: &Value, hints: &ProviderHints) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut push = |src: SourceRef| {
        if !sources.contains(&src) {
            sources.push(src);
        }
    };

    if let Some(list) = item.get("sources").and_then(Value::as_array) {
        for entry in list {
            let source = entry.get("source").and_then(scalar_to_string);
            let id = entry.get("id").and_then(scalar_to_string);
            if let (Some(source), Some(id)) = (source, id) {
                push(SourceRef { source, id });
            }
        }
    }

    if let Some(list) = item.get("channels").and_then(Value::as_array) {
        for entry in list {
            let id = match entry {
                Value::Object(_) => string_field(entry, &["id", "channel", "name", "url"]),
                other => scalar_to_string(other),
            };
            if let Some(id) = id {
                push(SourceRef::new(hints.source_key(), id));
            }
        }
    }

    if item.get("sources").is_none() && item.get("channels").is_none() {
        if let Some(embed) = string_field(item, EMBED_FIELDS) {
            push(SourceRef::new(hints.source_key(), embed));
        }
    }

    sources
}
