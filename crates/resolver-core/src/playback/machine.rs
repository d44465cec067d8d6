use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::event::{Effect, PlaybackEvent};
use super::state::{FailureReason, PlaybackPhase, PlaybackSession, PlaybackTech};
use crate::config::ResolverConfig;
use crate::domains::{EmbedDomain, EmbedDomainManager};
use crate::model::Stream;

/// Transition function for playback sessions.
///
/// The machine holds no per-session state. Every call to [`step`](Self::step)
/// mutates one session and returns the effects the host must carry out; the
/// shared [`EmbedDomainManager`] is the only state visible across sessions.
///
/// Each failure consumes a finite resource, so a session fed nothing but
/// failures reaches [`PlaybackPhase::Error`] after at most
/// `1 + domains + streams` of them.
#[derive(Debug, Clone)]
pub struct PlaybackMachine {
    domains: Arc<EmbedDomainManager>,
    watchdog_timeout: Duration,
}

impl PlaybackMachine {
    pub fn new(domains: Arc<EmbedDomainManager>, watchdog_timeout: Duration) -> Self {
        Self {
            domains,
            watchdog_timeout,
        }
    }

    pub fn from_config(domains: Arc<EmbedDomainManager>, config: &ResolverConfig) -> Self {
        Self::new(domains, config.watchdog_timeout)
    }

    pub fn domains(&self) -> &Arc<EmbedDomainManager> {
        &self.domains
    }

    pub fn watchdog_timeout(&self) -> Duration {
        self.watchdog_timeout
    }

    pub fn step(&self, s: &mut PlaybackSession, event: PlaybackEvent) -> Vec<Effect> {
        match event {
            PlaybackEvent::Start { now } => match s.phase {
                PlaybackPhase::Idle | PlaybackPhase::Countdown => self.begin(s, now),
                phase => {
                    debug!(session = %s.id, %phase, "Ignoring start on a running session");
                    Vec::new()
                }
            },
            PlaybackEvent::Tick { now } => {
                if s.phase == PlaybackPhase::Countdown && !kickoff_pending(s, now) {
                    info!(session = %s.id, "Kickoff reached, loading stream");
                    self.load_active(s)
                } else {
                    Vec::new()
                }
            }
            PlaybackEvent::Loaded { attempt } => on_loaded(s, attempt),
            PlaybackEvent::LoadFailed { attempt, reason } => {
                self.on_load_failed(s, attempt, reason.as_deref())
            }
            PlaybackEvent::StreamArrived { stream } => self.on_stream_arrived(s, stream),
            PlaybackEvent::WatchdogFired { generation } => on_watchdog(s, generation),
            PlaybackEvent::Retry { now } => {
                let original = s.original.clone();
                self.restart(s, original, now)
            }
            PlaybackEvent::SelectStream { stream, now } => {
                s.original = stream.clone();
                self.restart(s, stream, now)
            }
        }
    }

    fn begin(&self, s: &mut PlaybackSession, now: DateTime<Utc>) -> Vec<Effect> {
        match s.kickoff {
            Some(kickoff) if kickoff_pending(s, now) => {
                debug!(session = %s.id, %kickoff, "HLS stream before kickoff, counting down");
                s.phase = PlaybackPhase::Countdown;
                vec![Effect::AwaitKickoff { kickoff }]
            }
            _ => self.load_active(s),
        }
    }

    /// Load the active stream: native HLS while it has not failed in this
    /// session, otherwise an iframe embed on the current domain.
    fn load_active(&self, s: &mut PlaybackSession) -> Vec<Effect> {
        match s.active.hls_url.clone() {
            Some(hls) if !s.hls_failed_use_iframe => {
                enter_loading(s, PlaybackTech::NativeHls, hls, None)
            }
            _ => {
                let domain = self.domains.current_domain();
                s.tried_domains.insert(domain.clone());
                let url = embed_url(&domain, &s.active);
                enter_loading(s, PlaybackTech::Iframe, url, Some(domain))
            }
        }
    }

    fn on_load_failed(
        &self,
        s: &mut PlaybackSession,
        attempt: u64,
        reason: Option<&str>,
    ) -> Vec<Effect> {
        if attempt != s.attempt || !s.phase.has_media() {
            debug!(
                session = %s.id,
                attempt,
                current = s.attempt,
                phase = %s.phase,
                "Ignoring stale load failure"
            );
            return Vec::new();
        }

        s.error_count += 1;
        warn!(
            session = %s.id,
            attempt,
            url = s.url.as_deref().unwrap_or_default(),
            reason = reason.unwrap_or("unknown"),
            errors = s.error_count,
            "Playback load failed"
        );

        if s.tech == Some(PlaybackTech::NativeHls) && !s.hls_failed_use_iframe {
            info!(session = %s.id, "HLS playback failed, switching to iframe embed");
            s.hls_failed_use_iframe = true;
            return self.load_active(s);
        }

        if s.tech == Some(PlaybackTech::Iframe) && !s.embed_fallback_attempted {
            s.embed_fallback_attempted = true;
            if let Some(failed) = s.domain.clone() {
                self.domains.mark_failed(&failed);
                let tried = &s.tried_domains;
                let next =
                    self.domains
                        .fallback_domain_where(&failed, Utc::now(), |d| !tried.contains(d));
                if let Some(next) = next {
                    info!(session = %s.id, from = %failed, to = %next, "Retrying embed on fallback domain");
                    s.tried_domains.insert(next.clone());
                    let url = embed_url(&next, &s.active);
                    return enter_loading(s, PlaybackTech::Iframe, url, Some(next));
                }
            }
        }

        self.next_source(s)
    }

    fn next_source(&self, s: &mut PlaybackSession) -> Vec<Effect> {
        let mut requested = None;
        let found = s
            .coordinator
            .try_next_source(|next| requested = Some(next.stream_ref()));
        match requested {
            Some(stream) if found => {
                s.waiting_for_auto_fallback = true;
                s.phase = PlaybackPhase::WaitingForFallback;
                s.watchdog_generation += 1;
                let after_ms = u64::try_from(self.watchdog_timeout.as_millis()).unwrap_or(u64::MAX);
                vec![
                    Effect::ChangeSource { stream },
                    Effect::ScheduleWatchdog {
                        generation: s.watchdog_generation,
                        after_ms,
                    },
                ]
            }
            _ => fail(s, FailureReason::Exhausted),
        }
    }

    fn on_stream_arrived(&self, s: &mut PlaybackSession, stream: Stream) -> Vec<Effect> {
        if !s.waiting_for_auto_fallback || stream.stream_ref() != *s.coordinator.active() {
            debug!(session = %s.id, stream = %stream.stream_ref(), "Ignoring unrequested stream");
            return Vec::new();
        }
        s.waiting_for_auto_fallback = false;
        s.embed_fallback_attempted = false;
        s.active = stream;

        let mut effects = vec![Effect::CancelWatchdog];
        effects.extend(self.load_active(s));
        effects
    }

    fn restart(&self, s: &mut PlaybackSession, stream: Stream, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();
        if s.waiting_for_auto_fallback {
            effects.push(Effect::CancelWatchdog);
        }
        s.waiting_for_auto_fallback = false;
        s.watchdog_generation += 1;
        s.error_count = 0;
        s.hls_failed_use_iframe = false;
        s.embed_fallback_attempted = false;
        s.tried_domains.clear();
        s.failure = None;
        s.tech = None;
        s.domain = None;
        s.url = None;
        s.phase = PlaybackPhase::Idle;
        s.coordinator.reset(stream.stream_ref());
        s.active = stream;
        info!(session = %s.id, stream = %s.active.stream_ref(), "Restarting playback");

        effects.extend(self.begin(s, now));
        effects
    }
}

fn kickoff_pending(s: &PlaybackSession, now: DateTime<Utc>) -> bool {
    s.active.is_hls() && !s.hls_failed_use_iframe && s.kickoff.is_some_and(|k| k > now)
}

fn embed_url(domain: &EmbedDomain, stream: &Stream) -> String {
    EmbedDomainManager::build_embed_url(domain, &stream.source, &stream.id, stream.stream_no)
}

fn enter_loading(
    s: &mut PlaybackSession,
    tech: PlaybackTech,
    url: String,
    domain: Option<EmbedDomain>,
) -> Vec<Effect> {
    s.attempt += 1;
    s.phase = PlaybackPhase::Loading;
    s.tech = Some(tech);
    s.domain = domain;
    s.url = Some(url.clone());
    s.failure = None;
    debug!(session = %s.id, attempt = s.attempt, %tech, %url, "Loading stream");
    vec![Effect::Load {
        attempt: s.attempt,
        url,
        tech,
    }]
}

fn on_loaded(s: &mut PlaybackSession, attempt: u64) -> Vec<Effect> {
    let accepts = matches!(
        s.phase,
        PlaybackPhase::Loading | PlaybackPhase::Playing | PlaybackPhase::Error
    );
    if attempt != s.attempt || !accepts {
        debug!(session = %s.id, attempt, current = s.attempt, "Ignoring stale load result");
        return Vec::new();
    }
    if s.phase != PlaybackPhase::Playing {
        info!(session = %s.id, attempt, url = s.url.as_deref().unwrap_or_default(), "Playback started");
    }
    s.phase = PlaybackPhase::Playing;
    s.error_count = 0;
    s.failure = None;
    Vec::new()
}

fn on_watchdog(s: &mut PlaybackSession, generation: u64) -> Vec<Effect> {
    if !s.waiting_for_auto_fallback || generation != s.watchdog_generation {
        debug!(session = %s.id, generation, "Ignoring stale watchdog");
        return Vec::new();
    }
    s.waiting_for_auto_fallback = false;
    fail(s, FailureReason::WatchdogTimeout)
}

fn fail(s: &mut PlaybackSession, reason: FailureReason) -> Vec<Effect> {
    warn!(session = %s.id, %reason, errors = s.error_count, "Playback failed");
    s.phase = PlaybackPhase::Error;
    s.failure = Some(reason);
    vec![Effect::ShowError { reason }]
}
