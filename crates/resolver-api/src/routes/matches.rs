use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use resolver_core::normalize::map_category;
use resolver_core::streams::build_inventory;
use resolver_core::{Match, ProviderStatus, ProviderStreams};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MatchesQuery {
    /// Any provider spelling; mapped onto the canonical taxonomy.
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct MatchesResponse {
    pub last_refresh: Option<String>,
    pub count: usize,
    pub matches: Vec<Match>,
}

#[derive(Serialize)]
pub struct StreamsResponse {
    pub match_id: String,
    pub total: usize,
    pub providers: Vec<ProviderStreams>,
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub state: String,
    pub last_refresh: Option<String>,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub message: String,
    pub count: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/matches", get(list_matches))
        .route("/matches/refresh", post(refresh_matches))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/streams", get(get_streams))
        .route("/providers", get(list_providers))
}

pub(crate) async fn find_match(state: &AppState, id: &str) -> Result<Match, ApiError> {
    state
        .aggregator
        .get_match(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Match {} not found", id)))
}

/// GET /api/v1/matches
async fn list_matches(
    State(state): State<AppState>,
    Query(query): Query<MatchesQuery>,
) -> Json<MatchesResponse> {
    let category = query.category.as_deref().map(map_category);
    let mut matches: Vec<Match> = state
        .aggregator
        .matches()
        .await
        .into_iter()
        .filter(|m| category.as_ref().is_none_or(|c| &m.category == c))
        .collect();
    if let Some(limit) = query.limit {
        matches.truncate(limit);
    }

    Json(MatchesResponse {
        last_refresh: state.aggregator.last_refresh().await.map(|t| t.to_rfc3339()),
        count: matches.len(),
        matches,
    })
}

/// POST /api/v1/matches/refresh
async fn refresh_matches(State(state): State<AppState>) -> Json<RefreshResponse> {
    let count = state.aggregator.refresh_once().await;
    Json(RefreshResponse {
        message: "Matches refreshed".into(),
        count,
    })
}

/// GET /api/v1/matches/:id
async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(find_match(&state, &id).await?))
}

/// GET /api/v1/matches/:id/streams
async fn get_streams(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamsResponse>, ApiError> {
    let m = find_match(&state, &id).await?;
    let inventory = build_inventory(
        &m,
        state.lister.as_deref(),
        state.aggregator.config().max_concurrent_fetches,
    )
    .await;

    Ok(Json(StreamsResponse {
        match_id: m.id,
        total: inventory.len(),
        providers: inventory.groups().to_vec(),
    }))
}

/// GET /api/v1/providers
async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        state: state.aggregator.state().await.to_string(),
        last_refresh: state.aggregator.last_refresh().await.map(|t| t.to_rfc3339()),
        providers: state.aggregator.provider_status().await,
    })
}
