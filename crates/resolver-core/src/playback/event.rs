use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{FailureReason, PlaybackPhase, PlaybackTech};
use crate::model::{Stream, StreamRef};

/// Inputs to [`PlaybackMachine::step`](super::PlaybackMachine::step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// The viewer opened the player.
    Start {
        #[serde(default = "Utc::now")]
        now: DateTime<Utc>,
    },
    /// Clock tick while counting down to kickoff.
    Tick {
        #[serde(default = "Utc::now")]
        now: DateTime<Utc>,
    },
    /// The media element for `attempt` reported ready.
    Loaded { attempt: u64 },
    /// The media element for `attempt` reported an error.
    LoadFailed {
        attempt: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The host delivered the stream requested by a `ChangeSource` effect.
    StreamArrived { stream: Stream },
    WatchdogFired { generation: u64 },
    Retry {
        #[serde(default = "Utc::now")]
        now: DateTime<Utc>,
    },
    /// The viewer picked a different stream of the same match.
    SelectStream {
        stream: Stream,
        #[serde(default = "Utc::now")]
        now: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Tick { .. } => "tick",
            Self::Loaded { .. } => "loaded",
            Self::LoadFailed { .. } => "load_failed",
            Self::StreamArrived { .. } => "stream_arrived",
            Self::WatchdogFired { .. } => "watchdog_fired",
            Self::Retry { .. } => "retry",
            Self::SelectStream { .. } => "select_stream",
        }
    }
}

/// Work the host must perform after a transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Attach a media element for `url`. Its result must be reported with `attempt`.
    Load {
        attempt: u64,
        url: String,
        tech: PlaybackTech,
    },
    /// Show a countdown and send `Tick` events until `kickoff`.
    AwaitKickoff { kickoff: DateTime<Utc> },
    /// Ask the host to swap the active stream, then send `StreamArrived`.
    ChangeSource { stream: StreamRef },
    ScheduleWatchdog { generation: u64, after_ms: u64 },
    CancelWatchdog,
    /// Terminal "stream unavailable" with a retry affordance.
    ShowError { reason: FailureReason },
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { attempt, url, tech } => write!(f, "load#{attempt} {tech} {url}"),
            Self::AwaitKickoff { kickoff } => write!(f, "countdown until {kickoff}"),
            Self::ChangeSource { stream } => write!(f, "change source to {stream}"),
            Self::ScheduleWatchdog { generation, after_ms } => {
                write!(f, "watchdog#{generation} in {after_ms}ms")
            }
            Self::CancelWatchdog => write!(f, "cancel watchdog"),
            Self::ShowError { reason } => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub event: String,
    pub from: PlaybackPhase,
    pub to: PlaybackPhase,
    pub effects: Vec<Effect>,
}

impl TransitionRecord {
    pub fn new(
        session_id: Uuid,
        event: impl Into<String>,
        from: PlaybackPhase,
        to: PlaybackPhase,
        effects: Vec<Effect>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id,
            event: event.into(),
            from,
            to,
            effects,
        }
    }
}

/// Bounded transition history. Oldest records are evicted first.
#[derive(Debug, Clone)]
pub struct TransitionRing {
    buffer: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl TransitionRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: TransitionRecord) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(record);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<TransitionRecord> {
        self.buffer.iter().rev().cloned().collect()
    }

    pub fn list_chronological(&self) -> Vec<TransitionRecord> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: &str, to: PlaybackPhase) -> TransitionRecord {
        TransitionRecord::new(Uuid::nil(), event, PlaybackPhase::Idle, to, Vec::new())
    }

    #[test]
    fn ring_lists_newest_first_and_evicts_oldest() {
        let mut ring = TransitionRing::new(2);
        ring.push(record("start", PlaybackPhase::Loading));
        ring.push(record("loaded", PlaybackPhase::Playing));
        ring.push(record("load_failed", PlaybackPhase::Loading));
        assert_eq!(ring.len(), 2);

        let newest = ring.list();
        assert_eq!(newest[0].event, "load_failed");
        let oldest = ring.list_chronological();
        assert_eq!(oldest[0].event, "loaded");
    }

    #[test]
    fn zero_capacity_keeps_one_record() {
        let mut ring = TransitionRing::new(0);
        ring.push(record("start", PlaybackPhase::Loading));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn events_deserialize_from_tagged_json() {
        let e: PlaybackEvent =
            serde_json::from_str(r#"{"type":"load_failed","attempt":3}"#).unwrap();
        assert_eq!(e, PlaybackEvent::LoadFailed { attempt: 3, reason: None });

        let e: PlaybackEvent = serde_json::from_str(r#"{"type":"retry"}"#).unwrap();
        assert_eq!(e.kind(), "retry");
    }

    #[test]
    fn effects_serialize_with_type_tag() {
        let json = serde_json::to_value(Effect::ChangeSource {
            stream: StreamRef::new("alpha", "1", 2),
        })
        .unwrap();
        assert_eq!(json["type"], "change_source");
        assert_eq!(json["stream"]["stream_no"], 2);
    }
}
