use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use resolver_core::consolidate::same_fixture;
use resolver_core::normalize::DEFAULT_CATEGORY;
use resolver_core::{
    consolidate, normalize, play_headless, AutoFallbackCoordinator, EmbedDomain,
    EmbedDomainManager, Effect, FailureReason, LoadError, PlaybackEvent, PlaybackMachine,
    PlaybackPhase, PlaybackSession, PlaybackTech, MediaKind, ProviderHints, SessionHandle,
    SourceRef, Stream, StreamInventory, StreamInspector, StreamRef,
};

fn manager(hosts: &[&str]) -> Arc<EmbedDomainManager> {
    let domains = hosts.iter().map(|h| EmbedDomain::parse(h).unwrap()).collect();
    Arc::new(EmbedDomainManager::new(domains, Duration::from_secs(300)).unwrap())
}

fn hls_stream(source: &str, id: &str) -> Stream {
    Stream {
        hls_url: Some(format!("https://cdn.example/{source}/{id}/index.m3u8")),
        ..Stream::fallback_for(&SourceRef::new(source, id))
    }
}

fn raw(title: &str, date: &str, source: &str, id: &str) -> serde_json::Value {
    json!({"title": title, "date": date, "sources": [{"source": source, "id": id}]})
}

#[test]
fn normalizer_splits_title_and_defaults_category() {
    let m = normalize(
        &raw("Arsenal vs Chelsea", "2025-03-01T17:30:00Z", "A", "1"),
        &ProviderHints::new("feed"),
    )
    .unwrap();
    assert_eq!(m.home_name(), Some("Arsenal"));
    assert_eq!(m.away_name(), Some("Chelsea"));
    assert_eq!(m.category, DEFAULT_CATEGORY);
    assert_eq!(m.sources.len(), 1);
    assert!(!m.date_defaulted);
}

#[test]
fn consolidation_unions_sources_across_skewed_feeds() {
    let hints = ProviderHints::new("feed");
    let a = normalize(&raw("Arsenal vs Chelsea", "2025-03-01T17:30:00Z", "A", "1"), &hints).unwrap();
    let b = normalize(&raw("Arsenal vs Chelsea", "2025-03-01T17:32:00Z", "B", "2"), &hints).unwrap();

    let merged = consolidate(vec![a, b], Duration::from_secs(30 * 60));
    assert_eq!(merged.len(), 1);
    assert!(merged[0].sources.contains(&SourceRef::new("A", "1")));
    assert!(merged[0].sources.contains(&SourceRef::new("B", "2")));
}

#[test]
fn consolidated_output_has_no_duplicates() {
    let hints = ProviderHints::new("feed");
    let titles = [
        "Arsenal vs Chelsea",
        "Arsenal FC vs Chelsea FC",
        "Chelsea vs Arsenal",
        "Liverpool vs Everton",
        "Liverpool FC v Everton",
        "Real Madrid vs Barcelona",
    ];
    let times = ["2025-03-01T17:30:00Z", "2025-03-01T17:50:00Z", "2025-03-01T20:00:00Z"];
    let mut items = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        for (j, time) in times.iter().enumerate() {
            let id = format!("{i}-{j}");
            items.push(normalize(&raw(title, time, &format!("s{i}"), &id), &hints).unwrap());
        }
    }

    let tolerance = Duration::from_secs(30 * 60);
    let out = consolidate(items, tolerance);
    for (i, a) in out.iter().enumerate() {
        for b in &out[i + 1..] {
            assert!(!same_fixture(a, b, tolerance), "{} duplicates {}", a.title, b.title);
        }
    }
}

#[test]
fn domain_manager_skips_failed_and_resets_on_exhaustion() {
    let m = manager(&["d1.example", "d2.example", "d3.example"]);
    let d = |h: &str| EmbedDomain::parse(h).unwrap();

    m.mark_failed(&d("d1.example"));
    m.mark_failed(&d("d2.example"));
    assert_eq!(m.current_domain(), d("d3.example"));

    m.mark_failed(&d("d3.example"));
    assert_eq!(m.current_domain(), d("d1.example"));
    assert_eq!(m.failed_count(), 0);
}

#[test]
fn embed_url_is_positional_and_stable() {
    let d = EmbedDomain::parse("embedsports.top").unwrap();
    let first = EmbedDomainManager::build_embed_url(&d, "alpha", "arsenal-chelsea", 2);
    let second = EmbedDomainManager::build_embed_url(&d, "alpha", "arsenal-chelsea", 2);
    assert_eq!(first, "https://embedsports.top/embed/alpha/arsenal-chelsea/2");
    assert_eq!(first, second);
}

#[test]
fn coordinator_walks_providers_in_order() {
    let s = |source: &str, id: &str, n: u32| Stream {
        stream_no: n,
        ..Stream::fallback_for(&SourceRef::new(source, id))
    };
    let mut inv = StreamInventory::new();
    inv.push("p1", vec![s("p1", "a", 1), s("p1", "a", 2)]);
    inv.push("p2", vec![s("p2", "b", 1)]);

    let mut c = AutoFallbackCoordinator::new(&inv, StreamRef::new("p1", "a", 1));
    let mut picked = Vec::new();
    assert!(c.try_next_source(|st| picked.push(st.stream_ref())));
    assert!(c.try_next_source(|st| picked.push(st.stream_ref())));
    assert!(!c.try_next_source(|st| picked.push(st.stream_ref())));
    assert_eq!(picked, vec![StreamRef::new("p1", "a", 2), StreamRef::new("p2", "b", 1)]);
}

fn match_with(streams: &[Stream]) -> (resolver_core::Match, StreamInventory) {
    let m = resolver_core::Match {
        id: "m1".into(),
        title: "Arsenal vs Chelsea".into(),
        category: "football".into(),
        date: Utc::now().timestamp_millis() - 60_000,
        date_defaulted: false,
        teams: resolver_core::Teams::pair("Arsenal", "Chelsea"),
        sources: streams
            .iter()
            .map(|s| SourceRef::new(&s.source, &s.id))
            .collect(),
        poster: None,
        popular: false,
        viewer_count: None,
    };
    let mut inv = StreamInventory::new();
    for s in streams {
        inv.push(&s.source, vec![s.clone()]);
    }
    (m, inv)
}

fn load_of(effects: &[Effect]) -> Option<(String, PlaybackTech)> {
    effects.iter().find_map(|e| match e {
        Effect::Load { url, tech, .. } => Some((url.clone(), *tech)),
        _ => None,
    })
}

#[test]
fn hls_session_walks_iframe_domain_and_source_fallbacks() {
    let machine = PlaybackMachine::new(manager(&["d1.example", "d2.example"]), Duration::from_secs(5));
    let (m, inv) = match_with(&[hls_stream("alpha", "1"), hls_stream("bravo", "2")]);
    let mut s = PlaybackSession::first_available(&m, inv).unwrap();
    let fail = |s: &mut PlaybackSession| {
        let attempt = s.attempt();
        machine.step(s, PlaybackEvent::LoadFailed { attempt, reason: None })
    };

    let start = machine.step(&mut s, PlaybackEvent::Start { now: Utc::now() });
    assert_eq!(load_of(&start).map(|(_, t)| t), Some(PlaybackTech::NativeHls));

    let first = fail(&mut s);
    assert_eq!(
        load_of(&first),
        Some(("https://d1.example/embed/alpha/1/1".to_string(), PlaybackTech::Iframe))
    );

    let second = fail(&mut s);
    assert_eq!(
        load_of(&second),
        Some(("https://d2.example/embed/alpha/1/1".to_string(), PlaybackTech::Iframe))
    );

    let third = fail(&mut s);
    assert!(matches!(
        third.as_slice(),
        [Effect::ChangeSource { stream }, Effect::ScheduleWatchdog { .. }] if *stream == StreamRef::new("bravo", "2", 1)
    ));

    let arrived = machine.step(
        &mut s,
        PlaybackEvent::StreamArrived {
            stream: hls_stream("bravo", "2"),
        },
    );
    assert_eq!(load_of(&arrived).map(|(_, t)| t), Some(PlaybackTech::Iframe));

    let mut remaining = 0;
    while s.phase() != PlaybackPhase::Error {
        fail(&mut s);
        remaining += 1;
        assert!(remaining <= 3);
    }
    assert_eq!(s.failure(), Some(FailureReason::Exhausted));
}

#[test]
fn failures_alone_terminate_within_bound() {
    for domains in 1..=3usize {
        for sources in 1..=5usize {
            let hosts: Vec<String> = (0..domains).map(|i| format!("h{i}.example")).collect();
            let host_refs: Vec<&str> = hosts.iter().map(String::as_str).collect();
            let machine = PlaybackMachine::new(manager(&host_refs), Duration::from_secs(5));
            let streams: Vec<Stream> = (0..sources)
                .map(|i| hls_stream(&format!("p{i}"), &format!("{i}")))
                .collect();
            let (m, inv) = match_with(&streams);
            let mut s = PlaybackSession::first_available(&m, inv).unwrap();
            let mut effects = machine.step(&mut s, PlaybackEvent::Start { now: Utc::now() });

            let mut failures = 0;
            loop {
                if s.phase() == PlaybackPhase::Error {
                    break;
                }
                let requested = effects.iter().find_map(|e| match e {
                    Effect::ChangeSource { stream } => Some(stream.clone()),
                    _ => None,
                });
                if let Some(requested) = requested {
                    let stream = s.inventory().find(&requested).cloned().unwrap();
                    effects = machine.step(&mut s, PlaybackEvent::StreamArrived { stream });
                    continue;
                }
                failures += 1;
                assert!(failures <= 1 + domains + sources);
                let attempt = s.attempt();
                effects = machine.step(&mut s, PlaybackEvent::LoadFailed { attempt, reason: None });
            }
        }
    }
}

struct ScriptedInspector {
    responses: HashMap<String, MediaKind>,
}

#[async_trait]
impl StreamInspector for ScriptedInspector {
    async fn inspect(&self, url: &str) -> Result<MediaKind, LoadError> {
        self.responses.get(url).copied().ok_or_else(|| LoadError::Http {
            url: url.to_string(),
            status: 404,
            message: "Not Found".into(),
            is_last_retry: true,
        })
    }
}

#[tokio::test]
async fn headless_playback_finds_working_source() {
    let domains = manager(&["d1.example", "d2.example"]);
    let machine = Arc::new(PlaybackMachine::new(domains.clone(), Duration::from_secs(5)));
    let (m, inv) = match_with(&[hls_stream("alpha", "1"), Stream::fallback_for(&SourceRef::new("bravo", "2"))]);
    let handle = SessionHandle::new(machine, PlaybackSession::first_available(&m, inv).unwrap(), 50);

    let inspector = ScriptedInspector {
        responses: HashMap::from([("https://d2.example/embed/bravo/2/1".to_string(), MediaKind::Html)]),
    };
    let outcome = play_headless(&handle, &inspector).await.unwrap();

    assert_eq!(outcome.phase, PlaybackPhase::Playing);
    assert_eq!(outcome.playing, Some(StreamRef::new("bravo", "2", 1)));
    let urls: Vec<&str> = outcome.attempts.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://cdn.example/alpha/1/index.m3u8",
            "https://d1.example/embed/alpha/1/1",
            "https://d2.example/embed/alpha/1/1",
            "https://d2.example/embed/bravo/2/1",
        ]
    );
    assert!(!handle.watchdog_pending());
    assert!(domains.is_failed(&EmbedDomain::parse("d1.example").unwrap()));
}

#[tokio::test]
async fn headless_playback_reports_exhaustion() {
    let machine = Arc::new(PlaybackMachine::new(manager(&["d1.example"]), Duration::from_secs(5)));
    let (m, inv) = match_with(&[hls_stream("alpha", "1"), hls_stream("bravo", "2")]);
    let handle = SessionHandle::new(machine, PlaybackSession::first_available(&m, inv).unwrap(), 50);

    let inspector = ScriptedInspector {
        responses: HashMap::new(),
    };
    let outcome = play_headless(&handle, &inspector).await.unwrap();
    assert_eq!(outcome.phase, PlaybackPhase::Error);
    assert_eq!(outcome.failure, Some(FailureReason::Exhausted));
    assert!(outcome.playing.is_none());
    assert!(outcome.attempts.len() <= 1 + 1 + 2);
    assert!(outcome.attempts.iter().all(|a| !a.succeeded()));
}
