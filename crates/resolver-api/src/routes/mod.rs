mod domains;
mod matches;
mod sessions;

use axum::Router;

use crate::state::AppState;

pub use domains::{DomainsResponse, EmbedUrlResponse};
pub use matches::{MatchesResponse, ProvidersResponse, StreamsResponse};
pub use sessions::{CreateSessionRequest, EventResponse, SessionResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(matches::router())
        .merge(sessions::router())
        .merge(domains::router())
}
