use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use resolver_core::{DomainStatus, EmbedDomain, EmbedDomainManager};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct DomainsResponse {
    pub current: EmbedDomain,
    pub failed_count: usize,
    pub domains: Vec<DomainStatus>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedUrlQuery {
    pub source: String,
    pub id: String,
    #[serde(default = "default_stream_no")]
    pub stream_no: u32,
}

fn default_stream_no() -> u32 {
    1
}

#[derive(Serialize)]
pub struct EmbedUrlResponse {
    pub domain: EmbedDomain,
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/domains", get(list_domains))
        .route("/domains/reset", post(reset_domains))
        .route("/domains/embed", get(embed_url))
        .route("/domains/{domain}/fail", post(fail_domain))
}

fn domains_response(state: &AppState) -> DomainsResponse {
    let manager = state.domains();
    DomainsResponse {
        current: manager.current_domain(),
        failed_count: manager.failed_count(),
        domains: manager.status(),
    }
}

/// GET /api/v1/domains
async fn list_domains(State(state): State<AppState>) -> Json<DomainsResponse> {
    Json(domains_response(&state))
}

/// POST /api/v1/domains/reset
async fn reset_domains(State(state): State<AppState>) -> Json<DomainsResponse> {
    state.domains().reset();
    tracing::info!("Embed domain failures cleared");
    Json(domains_response(&state))
}

/// POST /api/v1/domains/:domain/fail
async fn fail_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainsResponse>, ApiError> {
    let parsed = EmbedDomain::parse(&domain).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !state.domains().domains().contains(&parsed) {
        return Err(ApiError::NotFound(format!("Domain {} is not configured", domain)));
    }
    state.domains().mark_failed(&parsed);
    Ok(Json(domains_response(&state)))
}

/// GET /api/v1/domains/embed?source=&id=&stream_no=
async fn embed_url(
    State(state): State<AppState>,
    Query(query): Query<EmbedUrlQuery>,
) -> Result<Json<EmbedUrlResponse>, ApiError> {
    if query.source.trim().is_empty() || query.id.trim().is_empty() {
        return Err(ApiError::BadRequest("source and id must not be empty".into()));
    }
    let domain = state.domains().current_domain();
    let url = EmbedDomainManager::build_embed_url(&domain, &query.source, &query.id, query.stream_no);
    Ok(Json(EmbedUrlResponse { domain, url }))
}
