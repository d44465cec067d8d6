mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use resolver_core::playback::LoadAttempt;
use resolver_core::{
    build_inventory, play_headless, EmbedDomainManager, FeedLoader, HeadlessOutcome, HttpLoader,
    HttpInspector, Match, MatchAggregator, PlaybackMachine, PlaybackPhase, PlaybackSession,
    ResolverConfig, SessionHandle, StreamRef,
};

use crate::config::AppConfig;

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Called once by clap; lives for the program's lifetime.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Live match resolver: consolidate provider feeds and play through embed fallbacks.
#[derive(Parser)]
#[command(name = "stream-resolver", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server with a background match refresh.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Fetch every provider once and print the consolidated matches.
    Matches {
        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra provider feed URL. May be repeated.
        #[arg(short, long = "provider")]
        providers: Vec<String>,

        /// Only show this category (any provider spelling).
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of matches to print.
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Play one match headlessly, inspecting each candidate URL until one plays.
    Watch {
        /// Match to play. Defaults to the first match in display order.
        match_id: Option<String>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra provider feed URL. May be repeated.
        #[arg(short, long = "provider")]
        providers: Vec<String>,

        /// Start from this source instead of the first listed stream.
        #[arg(long, requires = "id")]
        source: Option<String>,

        /// Source-specific id of the starting stream.
        #[arg(long, requires = "source")]
        id: Option<String>,

        #[arg(long, default_value_t = 1)]
        stream_no: u32,

        /// Auto-fallback watchdog in milliseconds.
        #[arg(long)]
        watchdog_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Matches {
            config,
            providers,
            category,
            limit,
            json,
        } => {
            init_quiet_tracing();
            let app_config = load_cli_config(config, &providers);
            run_matches(app_config, category, limit, json).await;
        }
        Commands::Watch {
            match_id,
            config,
            providers,
            source,
            id,
            stream_no,
            watchdog_timeout,
        } => {
            init_quiet_tracing();
            let app_config = load_cli_config(config, &providers);
            let start = source.zip(id).map(|(s, i)| StreamRef::new(s, i, stream_no));
            run_watch(app_config, match_id, start, watchdog_timeout).await;
        }
    }
}

/// Config file (optional) plus providers given on the command line.
fn load_cli_config(path: Option<PathBuf>, provider_urls: &[String]) -> AppConfig {
    let mut app_config = match path {
        Some(ref p) => AppConfig::load(p).unwrap_or_else(|e| fatal(&e)),
        None => AppConfig::default(),
    };
    for url in provider_urls {
        if let Err(e) = app_config.add_provider_url(url) {
            fatal(&e);
        }
    }
    if app_config.provider.is_empty() {
        fatal("No providers configured: pass --provider <URL> or a config file with [[provider]] entries");
    }
    app_config
}

fn fatal(message: &str) -> ! {
    eprintln!("{} {}", style("error:").red().bold(), message);
    std::process::exit(1);
}

struct Runtime {
    resolver_config: ResolverConfig,
    loader: Arc<HttpLoader>,
    aggregator: Arc<MatchAggregator>,
}

/// Shared HTTP loader, providers and aggregator for every subcommand.
fn build_runtime(app_config: &AppConfig) -> Result<Runtime, String> {
    let resolver_config = app_config.defaults.to_resolver_config();
    let loader = Arc::new(HttpLoader::from_config(&resolver_config).map_err(|e| e.to_string())?);
    let feed_loader: Arc<dyn FeedLoader> = loader.clone();

    let mut aggregator =
        MatchAggregator::new(app_config.providers(&feed_loader), resolver_config.clone());
    if let Some(service) = app_config.viewer_service(&feed_loader) {
        aggregator = aggregator.with_viewer_service(Arc::new(service));
    }

    Ok(Runtime {
        resolver_config,
        loader,
        aggregator: Arc::new(aggregator),
    })
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        AppConfig::default()
    };

    if app_config.provider.is_empty() {
        tracing::warn!("No providers configured, the match list will stay empty");
    }

    let listen = listen_override.unwrap_or(app_config.server.listen);

    let runtime = match build_runtime(&app_config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };
    let feed_loader: Arc<dyn FeedLoader> = runtime.loader.clone();

    let mut state = match resolver_api::state::AppState::new(Arc::clone(&runtime.aggregator)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Invalid embed domain configuration");
            std::process::exit(1);
        }
    };
    if let Some(lister) = app_config.stream_lister(&feed_loader) {
        state = state.with_stream_lister(Arc::new(lister));
    }

    if let Err(e) = runtime.aggregator.start().await {
        tracing::error!(error = %e, "Failed to start match refresh");
        std::process::exit(1);
    }
    tracing::info!(
        providers = ?runtime.aggregator.provider_names(),
        domains = runtime.resolver_config.domains.len(),
        "Match refresh started"
    );

    tracing::info!(%listen, "Starting stream resolver API server");
    if let Err(e) = resolver_api::serve(listen, state).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping match refresh...");
    runtime.aggregator.stop().await;
    tracing::info!("Shutdown complete");
}

async fn run_matches(app_config: AppConfig, category: Option<String>, limit: Option<usize>, json: bool) {
    let runtime = build_runtime(&app_config).unwrap_or_else(|e| fatal(&e));

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!(
        "Fetching {} provider(s)...",
        runtime.aggregator.provider_names().len()
    ));
    runtime.aggregator.refresh_once().await;
    spinner.finish_and_clear();

    let wanted = category.as_deref().map(resolver_core::normalize::map_category);
    let mut matches: Vec<Match> = runtime
        .aggregator
        .matches()
        .await
        .into_iter()
        .filter(|m| wanted.as_ref().is_none_or(|c| &m.category == c))
        .collect();
    if let Some(limit) = limit {
        matches.truncate(limit);
    }

    if json {
        match serde_json::to_string_pretty(&matches) {
            Ok(out) => println!("{}", out),
            Err(e) => fatal(&e.to_string()),
        }
        return;
    }

    for p in runtime.aggregator.provider_status().await {
        match p.last_error {
            Some(ref e) => eprintln!(
                "  {} {:<16} {}",
                style("FAIL").red().bold(),
                p.name,
                style(e).dim()
            ),
            None => eprintln!(
                "  {} {:<16} {} items",
                style(" OK ").green(),
                p.name,
                p.item_count
            ),
        }
    }
    eprintln!("{}", format_separator(&format!("{} matches", matches.len())));

    let now_ms = Utc::now().timestamp_millis();
    let window_ms = runtime.resolver_config.live_window.as_millis() as i64;
    for m in &matches {
        let live = !m.date_defaulted && m.date <= now_ms && now_ms < m.date + window_ms;
        let badge = if live {
            style("LIVE ").red().bold().to_string()
        } else {
            style("     ").to_string()
        };
        let kickoff = if m.date_defaulted {
            "--:--".to_string()
        } else {
            m.kickoff().format("%a %H:%M").to_string()
        };
        let viewers = m
            .viewer_count
            .map(|v| format!("  {} viewers", v))
            .unwrap_or_default();
        println!(
            "{} {}  {:<12} {}  {}{}",
            badge,
            style(kickoff).dim(),
            style(&m.category).cyan(),
            m.title,
            style(format!("[{} src]", m.sources.len())).dim(),
            style(viewers).dim(),
        );
        println!("      {}", style(&m.id).dim());
    }
}

async fn run_watch(
    app_config: AppConfig,
    match_id: Option<String>,
    start: Option<StreamRef>,
    watchdog_timeout: Option<u64>,
) {
    let mut app_config = app_config;
    if let Some(ms) = watchdog_timeout {
        app_config.defaults.watchdog_timeout_ms = Some(ms);
    }
    let runtime = build_runtime(&app_config).unwrap_or_else(|e| fatal(&e));
    let feed_loader: Arc<dyn FeedLoader> = runtime.loader.clone();
    let config = &runtime.resolver_config;

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    multi
        .println(format!(
            "{} {}",
            style("stream-resolver").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();

    let status = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status.enable_steady_tick(Duration::from_millis(100));
    status.set_message("Fetching matches...");
    runtime.aggregator.refresh_once().await;

    let m = match match_id {
        Some(ref id) => runtime.aggregator.get_match(id).await,
        None => runtime.aggregator.matches().await.into_iter().next(),
    };
    let Some(m) = m else {
        status.finish_and_clear();
        fatal(&match match_id {
            Some(id) => format!("Match {} not found", id),
            None => "No matches available".to_string(),
        });
    };

    status.set_message(format!("Listing streams for {}...", m.title));
    let lister = app_config.stream_lister(&feed_loader);
    let inventory = build_inventory(
        &m,
        lister.as_ref().map(|l| l as &dyn resolver_core::StreamLister),
        config.max_concurrent_fetches,
    )
    .await;

    let session = match start {
        Some(ref wanted) => match inventory.find(wanted).cloned() {
            Some(initial) => Some(PlaybackSession::new(&m, inventory.clone(), initial)),
            None => {
                status.finish_and_clear();
                fatal(&format!("Stream {} is not listed for match {}", wanted, m.id));
            }
        },
        None => PlaybackSession::first_available(&m, inventory.clone()),
    };
    let Some(session) = session else {
        status.finish_and_clear();
        fatal(&format!("Match {} has no playable streams", m.id));
    };

    let domains = match EmbedDomainManager::from_config(config) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            status.finish_and_clear();
            fatal(&e.to_string());
        }
    };

    multi
        .println(format!("  {} {}", style("match:  ").dim(), style(&m.title).bold()))
        .ok();
    multi
        .println(format!("  {} {}", style("id:     ").dim(), m.id))
        .ok();
    multi
        .println(format!(
            "  {} {} across {} provider(s)",
            style("streams:").dim(),
            inventory.len(),
            inventory.groups().len()
        ))
        .ok();
    multi
        .println(format!(
            "  {} {}",
            style("domains:").dim(),
            config.domains.join(", ")
        ))
        .ok();
    multi
        .println(format!(
            "  {} {}ms",
            style("watchdog:").dim(),
            config.watchdog_timeout.as_millis()
        ))
        .ok();
    multi.println("").ok();

    let machine = Arc::new(PlaybackMachine::from_config(domains, config));
    let handle = SessionHandle::new(machine, session, config.history_limit);
    let inspector = HttpInspector::new(runtime.loader.client().clone());

    status.set_message("Trying candidates...");
    let shutdown = resolver_api::shutdown_signal();
    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        result = play_headless(&handle, &inspector) => result,
        _ = &mut shutdown => {
            status.finish_and_clear();
            handle.close();
            multi.println(format!("\n{}", style("Watch cancelled.").dim())).ok();
            return;
        }
    };
    status.finish_and_clear();

    match outcome {
        Ok(outcome) => {
            for attempt in &outcome.attempts {
                multi.println(format_attempt(attempt)).ok();
            }
            multi.println(format_separator("result")).ok();
            multi.println(format_outcome(&outcome)).ok();
            handle.close();
            if outcome.phase == PlaybackPhase::Error {
                std::process::exit(2);
            }
        }
        Err(e) => {
            handle.close();
            fatal(&e.to_string());
        }
    }
}

fn format_attempt(a: &LoadAttempt) -> String {
    let verdict = if a.succeeded() {
        style(" OK ").green().bold()
    } else {
        style("FAIL").red().bold()
    };
    let detail = match (&a.kind, &a.error) {
        (_, Some(e)) => style(e.clone()).red().to_string(),
        (Some(kind), None) => style(format!("{:?}", kind)).dim().to_string(),
        (None, None) => String::new(),
    };
    format!(
        "  #{:<3} {} {:<6} {}  {}",
        a.attempt,
        verdict,
        style(a.tech.to_string()).dim(),
        a.url,
        detail
    )
}

fn format_outcome(o: &HeadlessOutcome) -> String {
    match o.phase {
        PlaybackPhase::Playing => format!(
            "  {} {} via {}",
            style("PLAYING").green().bold(),
            o.playing.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            o.url.as_deref().unwrap_or_default()
        ),
        PlaybackPhase::Countdown => format!(
            "  {} stream goes live at {}",
            style("COUNTDOWN").yellow().bold(),
            o.countdown_until
                .map(|k| k.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default()
        ),
        PlaybackPhase::Error => format!(
            "  {} {}",
            style("UNAVAILABLE").red().bold(),
            o.failure.map(|f| f.to_string()).unwrap_or_default()
        ),
        phase => format!("  {} {}", style("STOPPED").dim(), phase),
    }
}

fn format_separator(label: &str) -> String {
    let label = if label.is_empty() {
        String::new()
    } else {
        format!(" {} ", label)
    };
    let width = 54usize.saturating_sub(label.chars().count());
    format!(
        "{}{}{}",
        style("──").dim(),
        style(label).dim().bold(),
        style("─".repeat(width)).dim()
    )
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

fn init_quiet_tracing() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}
