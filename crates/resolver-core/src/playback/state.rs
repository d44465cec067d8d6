use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::EmbedDomain;
use crate::fallback::{AutoFallbackCoordinator, FallbackProgress, StreamInventory};
use crate::model::{Match, Stream, StreamRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    /// Sub-state of idle: an HLS stream whose kickoff is still in the future.
    Countdown,
    Loading,
    Playing,
    /// A new source was requested and the session waits for it to arrive.
    WaitingForFallback,
    Error,
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Countdown => write!(f, "countdown"),
            Self::Loading => write!(f, "loading"),
            Self::Playing => write!(f, "playing"),
            Self::WaitingForFallback => write!(f, "waiting_for_fallback"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl PlaybackPhase {
    pub const ALL: [PlaybackPhase; 6] = [
        Self::Idle,
        Self::Countdown,
        Self::Loading,
        Self::Playing,
        Self::WaitingForFallback,
        Self::Error,
    ];

    /// Phases in which a media element is attached and may report load results.
    pub fn has_media(self) -> bool {
        matches!(self, Self::Loading | Self::Playing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackTech {
    NativeHls,
    Iframe,
}

impl fmt::Display for PlaybackTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeHls => write!(f, "hls"),
            Self::Iframe => write!(f, "iframe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every domain and source was tried.
    Exhausted,
    /// An auto-fallback stream was promised but never arrived.
    WatchdogTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "stream unavailable: all sources exhausted"),
            Self::WatchdogTimeout => write!(f, "stream unavailable: fallback stream never arrived"),
        }
    }
}

/// Mutable state of one player instance, from selection until the viewer leaves.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub(crate) id: Uuid,
    pub(crate) match_id: String,
    pub(crate) kickoff: Option<DateTime<Utc>>,
    pub(crate) original: Stream,
    pub(crate) active: Stream,
    pub(crate) phase: PlaybackPhase,
    pub(crate) tech: Option<PlaybackTech>,
    pub(crate) domain: Option<EmbedDomain>,
    pub(crate) url: Option<String>,
    pub(crate) attempt: u64,
    pub(crate) watchdog_generation: u64,
    pub(crate) error_count: u32,
    pub(crate) hls_failed_use_iframe: bool,
    pub(crate) embed_fallback_attempted: bool,
    pub(crate) waiting_for_auto_fallback: bool,
    pub(crate) tried_domains: HashSet<EmbedDomain>,
    pub(crate) failure: Option<FailureReason>,
    pub(crate) inventory: StreamInventory,
    pub(crate) coordinator: AutoFallbackCoordinator,
}

impl PlaybackSession {
    pub fn new(m: &Match, inventory: StreamInventory, initial: Stream) -> Self {
        let coordinator = AutoFallbackCoordinator::new(&inventory, initial.stream_ref());
        Self {
            id: Uuid::new_v4(),
            match_id: m.id.clone(),
            kickoff: (!m.date_defaulted).then(|| m.kickoff()),
            original: initial.clone(),
            active: initial,
            phase: PlaybackPhase::Idle,
            tech: None,
            domain: None,
            url: None,
            attempt: 0,
            watchdog_generation: 0,
            error_count: 0,
            hls_failed_use_iframe: false,
            embed_fallback_attempted: false,
            waiting_for_auto_fallback: false,
            tried_domains: HashSet::new(),
            failure: None,
            inventory,
            coordinator,
        }
    }

    /// Start on the first stream of the inventory, if there is one.
    pub fn first_available(m: &Match, inventory: StreamInventory) -> Option<Self> {
        let initial = inventory.first()?.clone();
        Some(Self::new(m, inventory, initial))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn active(&self) -> &Stream {
        &self.active
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn tech(&self) -> Option<PlaybackTech> {
        self.tech
    }

    pub fn domain(&self) -> Option<&EmbedDomain> {
        self.domain.as_ref()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    pub fn inventory(&self) -> &StreamInventory {
        &self.inventory
    }

    pub fn is_waiting_for_auto_fallback(&self) -> bool {
        self.waiting_for_auto_fallback
    }

    pub fn progress(&self) -> FallbackProgress {
        self.coordinator.progress()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            match_id: self.match_id.clone(),
            phase: self.phase,
            active: self.active.stream_ref(),
            tech: self.tech,
            domain: self.domain.as_ref().map(|d| d.host().to_string()),
            url: self.url.clone(),
            attempt: self.attempt,
            error_count: self.error_count,
            hls_failed_use_iframe: self.hls_failed_use_iframe,
            embed_fallback_attempted: self.embed_fallback_attempted,
            waiting_for_auto_fallback: self.waiting_for_auto_fallback,
            progress: self.coordinator.progress(),
            failure: self.failure,
            kickoff: self.kickoff,
        }
    }
}

/// Serializable view of a [`PlaybackSession`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub match_id: String,
    pub phase: PlaybackPhase,
    pub active: StreamRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tech: Option<PlaybackTech>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub attempt: u64,
    pub error_count: u32,
    pub hls_failed_use_iframe: bool,
    pub embed_fallback_attempted: bool,
    pub waiting_for_auto_fallback: bool,
    pub progress: FallbackProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kickoff: Option<DateTime<Utc>>,
}
