//! Drives a session to completion without a UI, inspecting each URL it loads.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::driver::{PlaybackError, SessionHandle};
use super::event::{Effect, PlaybackEvent};
use super::state::{FailureReason, PlaybackPhase, PlaybackTech};
use crate::model::StreamRef;
use crate::media::{MediaKind, StreamInspector};

#[derive(Debug, Clone, Serialize)]
pub struct LoadAttempt {
    pub attempt: u64,
    pub url: String,
    pub tech: PlaybackTech,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadlessOutcome {
    pub phase: PlaybackPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playing: Option<StreamRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub attempts: Vec<LoadAttempt>,
}

/// Start the session and answer every effect until none remain.
///
/// `Load` effects are answered by inspecting the URL, `ChangeSource` by
/// delivering the requested stream from the session's inventory. A countdown
/// stops the run; the outcome reports when playback would begin.
pub async fn play_headless(
    handle: &SessionHandle,
    inspector: &dyn StreamInspector,
) -> Result<HeadlessOutcome, PlaybackError> {
    let id = handle.id();
    let mut attempts = Vec::new();
    let mut countdown_until = None;
    let mut queue: VecDeque<Effect> = handle
        .dispatch(id, PlaybackEvent::Start { now: Utc::now() })?
        .into();

    while let Some(effect) = queue.pop_front() {
        match effect {
            Effect::Load { attempt, url, tech } => {
                let (event, record) = match inspector.inspect(&url).await {
                    Ok(kind) if kind.playable_with(tech) => (
                        PlaybackEvent::Loaded { attempt },
                        LoadAttempt {
                            attempt,
                            url,
                            tech,
                            kind: Some(kind),
                            error: None,
                        },
                    ),
                    Ok(kind) => {
                        let reason = format!("{kind:?} content cannot play as {tech}");
                        (
                            PlaybackEvent::LoadFailed {
                                attempt,
                                reason: Some(reason.clone()),
                            },
                            LoadAttempt {
                                attempt,
                                url,
                                tech,
                                kind: Some(kind),
                                error: Some(reason),
                            },
                        )
                    }
                    Err(e) => (
                        PlaybackEvent::LoadFailed {
                            attempt,
                            reason: Some(e.to_string()),
                        },
                        LoadAttempt {
                            attempt,
                            url,
                            tech,
                            kind: None,
                            error: Some(e.to_string()),
                        },
                    ),
                };
                attempts.push(record);
                queue.extend(handle.dispatch(id, event)?);
            }
            Effect::ChangeSource { stream } => match handle.find_stream(&stream) {
                Some(stream) => {
                    queue.extend(handle.dispatch(id, PlaybackEvent::StreamArrived { stream })?)
                }
                None => debug!(session = %id, %stream, "Requested stream missing from inventory"),
            },
            Effect::AwaitKickoff { kickoff } => countdown_until = Some(kickoff),
            Effect::ScheduleWatchdog { .. } | Effect::CancelWatchdog | Effect::ShowError { .. } => {}
        }
    }

    let snap = handle.snapshot();
    Ok(HeadlessOutcome {
        phase: snap.phase,
        playing: (snap.phase == PlaybackPhase::Playing).then(|| snap.active.clone()),
        url: snap.url,
        countdown_until,
        failure: snap.failure,
        attempts,
    })
}
