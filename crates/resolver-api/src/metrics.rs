use std::collections::HashMap;
use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use resolver_core::PlaybackPhase;

use crate::state::AppState;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::with_capacity(2048);
    let aggregator = &state.aggregator;

    writeln!(out, "# TYPE stream_resolver_info info").unwrap();
    writeln!(out, "# HELP stream_resolver_info Information about the stream resolver").unwrap();
    writeln!(
        out,
        "stream_resolver_info{{aggregator_id=\"{}\",created=\"{}\"}} 1",
        aggregator.id(),
        aggregator.created_at().to_rfc3339()
    )
    .unwrap();

    writeln!(out, "# TYPE stream_resolver_aggregator_state stateset").unwrap();
    writeln!(
        out,
        "# HELP stream_resolver_aggregator_state Current state of the match refresh loop"
    )
    .unwrap();
    let current = aggregator.state().await.to_string();
    for variant in &["idle", "active", "stopping", "stopped"] {
        writeln!(
            out,
            "stream_resolver_aggregator_state{{state=\"{}\"}} {}",
            variant,
            if current == *variant { 1 } else { 0 }
        )
        .unwrap();
    }

    writeln!(out, "# TYPE stream_resolver_matches gauge").unwrap();
    writeln!(out, "# HELP stream_resolver_matches Consolidated matches in the current snapshot").unwrap();
    writeln!(out, "stream_resolver_matches {}", aggregator.matches().await.len()).unwrap();

    let providers = aggregator.provider_status().await;

    writeln!(out, "# TYPE stream_resolver_provider_items gauge").unwrap();
    writeln!(
        out,
        "# HELP stream_resolver_provider_items Items normalized from the provider's last fetch"
    )
    .unwrap();
    for p in &providers {
        writeln!(
            out,
            "stream_resolver_provider_items{{provider=\"{}\"}} {}",
            p.name, p.item_count
        )
        .unwrap();
    }

    writeln!(out, "# TYPE stream_resolver_provider_up gauge").unwrap();
    writeln!(
        out,
        "# HELP stream_resolver_provider_up Whether the provider's last fetch succeeded"
    )
    .unwrap();
    for p in &providers {
        writeln!(
            out,
            "stream_resolver_provider_up{{provider=\"{}\"}} {}",
            p.name,
            if p.is_healthy() { 1 } else { 0 }
        )
        .unwrap();
    }

    if let Some(t) = aggregator.last_refresh().await {
        writeln!(out, "# TYPE stream_resolver_last_refresh_timestamp_seconds gauge").unwrap();
        writeln!(
            out,
            "# HELP stream_resolver_last_refresh_timestamp_seconds Unix timestamp of the last match refresh"
        )
        .unwrap();
        let secs = t.timestamp() as f64 + (t.timestamp_subsec_millis() as f64 / 1000.0);
        writeln!(out, "stream_resolver_last_refresh_timestamp_seconds {:.3}", secs).unwrap();
    }

    writeln!(out, "# TYPE stream_resolver_domain_available gauge").unwrap();
    writeln!(
        out,
        "# HELP stream_resolver_domain_available Whether the embed domain is outside its failure cooldown"
    )
    .unwrap();
    let domains = state.domains().status();
    for d in &domains {
        writeln!(
            out,
            "stream_resolver_domain_available{{domain=\"{}\"}} {}",
            d.domain,
            if d.available { 1 } else { 0 }
        )
        .unwrap();
    }

    writeln!(out, "# TYPE stream_resolver_failed_domains gauge").unwrap();
    writeln!(out, "# HELP stream_resolver_failed_domains Embed domains currently marked failed").unwrap();
    writeln!(
        out,
        "stream_resolver_failed_domains {}",
        domains.iter().filter(|d| !d.available).count()
    )
    .unwrap();

    writeln!(out, "# TYPE stream_resolver_sessions gauge").unwrap();
    writeln!(out, "# HELP stream_resolver_sessions Open playback sessions by phase").unwrap();
    let mut phases: HashMap<PlaybackPhase, usize> = HashMap::new();
    for entry in state.sessions.iter() {
        *phases.entry(entry.value().snapshot().phase).or_default() += 1;
    }
    for phase in PlaybackPhase::ALL {
        writeln!(
            out,
            "stream_resolver_sessions{{phase=\"{}\"}} {}",
            phase,
            phases.get(&phase).copied().unwrap_or(0)
        )
        .unwrap();
    }

    writeln!(out, "# TYPE stream_resolver_uptime_seconds gauge").unwrap();
    writeln!(out, "# HELP stream_resolver_uptime_seconds Time since the API state was created").unwrap();
    let uptime = (chrono::Utc::now() - state.started_at).num_milliseconds() as f64 / 1000.0;
    writeln!(out, "stream_resolver_uptime_seconds {:.3}", uptime).unwrap();

    writeln!(out, "# EOF").unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}
