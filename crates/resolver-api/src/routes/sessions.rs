use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use resolver_core::playback::TransitionRecord;
use resolver_core::streams::build_inventory;
use resolver_core::{
    Effect, PlaybackEvent, PlaybackSession, SessionHandle, SessionSnapshot, Stream, StreamRef,
};

use super::matches::find_match;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub match_id: String,
    /// Explicit stream choice; defaults to the first stream of the inventory.
    pub source: Option<String>,
    pub id: Option<String>,
    pub stream_no: Option<u32>,
    /// Session this one supersedes. It is closed before the new one starts.
    pub replaces: Option<Uuid>,
    #[serde(default = "default_start")]
    pub start: bool,
}

fn default_start() -> bool {
    true
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session: SessionSnapshot,
    pub effects: Vec<Effect>,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub effects: Vec<Effect>,
    pub session: SessionSnapshot,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub transitions: Vec<TransitionRecord>,
}

#[derive(Serialize)]
pub struct DeleteSessionResponse {
    pub message: String,
    pub id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/events", post(post_event))
        .route("/sessions/{id}/history", get(get_history))
}

fn parse_session_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid session ID: {}", id)))
}

fn get_handle(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
    state
        .sessions
        .get(&id)
        .map(|r| r.value().clone())
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))
}

/// POST /api/v1/sessions
async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let m = find_match(&state, &body.match_id).await?;
    let inventory = build_inventory(
        &m,
        state.lister.as_deref(),
        state.aggregator.config().max_concurrent_fetches,
    )
    .await;

    let session = match (body.source, body.id) {
        (Some(source), Some(id)) => {
            let wanted = StreamRef::new(source, id, body.stream_no.unwrap_or(1));
            let initial = inventory.find(&wanted).cloned().ok_or_else(|| {
                ApiError::BadRequest(format!("Stream {} is not listed for match {}", wanted, m.id))
            })?;
            PlaybackSession::new(&m, inventory, initial)
        }
        (None, None) => PlaybackSession::first_available(&m, inventory)
            .ok_or_else(|| ApiError::Conflict(format!("Match {} has no playable streams", m.id)))?,
        _ => {
            return Err(ApiError::BadRequest(
                "source and id must be given together".into(),
            ))
        }
    };

    if let Some(previous) = body.replaces {
        if let Some((_, old)) = state.sessions.remove(&previous) {
            old.close();
        }
    }

    let handle = SessionHandle::new(
        state.machine.clone(),
        session,
        state.aggregator.config().history_limit,
    );
    let effects = if body.start {
        handle.dispatch(handle.id(), PlaybackEvent::Start { now: Utc::now() })?
    } else {
        Vec::new()
    };
    tracing::info!(session = %handle.id(), match_id = %m.id, "Playback session created");

    let snapshot = handle.snapshot();
    state.sessions.insert(handle.id(), handle);

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session: snapshot,
            effects,
        }),
    ))
}

/// GET /api/v1/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.iter().map(|e| e.value().snapshot()).collect())
}

/// GET /api/v1/sessions/:id
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let id = parse_session_id(&id)?;
    Ok(Json(get_handle(&state, id)?.snapshot()))
}

/// POST /api/v1/sessions/:id/events
async fn post_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(event): Json<PlaybackEvent>,
) -> Result<Json<EventResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let handle = get_handle(&state, id)?;

    let event = match event {
        PlaybackEvent::WatchdogFired { .. } => {
            return Err(ApiError::BadRequest(
                "watchdog events are generated by the server".to_string(),
            ));
        }
        PlaybackEvent::SelectStream { stream, now } => PlaybackEvent::SelectStream {
            stream: listed_stream(&handle, &stream)?,
            now,
        },
        PlaybackEvent::StreamArrived { stream } => PlaybackEvent::StreamArrived {
            stream: listed_stream(&handle, &stream)?,
        },
        other => other,
    };

    let effects = handle.dispatch(id, event)?;
    Ok(Json(EventResponse {
        effects,
        session: handle.snapshot(),
    }))
}

/// The session's own copy of a client-named stream. Client-supplied URLs and
/// flags are discarded.
fn listed_stream(handle: &SessionHandle, stream: &Stream) -> Result<Stream, ApiError> {
    handle.find_stream(&stream.stream_ref()).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Stream {} is not part of this session",
            stream.stream_ref()
        ))
    })
}

/// GET /api/v1/sessions/:id/history
async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let handle = get_handle(&state, id)?;
    Ok(Json(HistoryResponse {
        session_id: id,
        transitions: handle.history(),
    }))
}

/// DELETE /api/v1/sessions/:id
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let (_, handle) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))?;
    handle.close();

    Ok(Json(DeleteSessionResponse {
        message: "Session closed".into(),
        id,
    }))
}
