#![forbid(unsafe_code)]

pub mod aggregate;
pub mod config;
pub mod consolidate;
pub mod domains;
pub mod fallback;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod playback;
pub mod media;
pub mod provider;
pub mod streams;
pub mod viewers;

pub use aggregate::{sort_for_display, AggregatorState, MatchAggregator, ProviderStatus};
pub use config::ResolverConfig;
pub use consolidate::consolidate;
pub use domains::{DomainError, DomainStatus, EmbedDomain, EmbedDomainManager};
pub use fallback::{AutoFallbackCoordinator, FallbackProgress, ProviderStreams, StreamInventory};
pub use loader::{FeedLoader, HttpLoader, LoadError};
pub use model::{Match, SourceRef, Stream, StreamRef, Team, Teams};
pub use normalize::{normalize, ProviderHints};
pub use playback::{
    play_headless, Effect, FailureReason, HeadlessOutcome, PlaybackError, PlaybackEvent,
    PlaybackMachine, PlaybackPhase, PlaybackSession, PlaybackTech, SessionHandle, SessionSnapshot,
};
pub use media::{HttpInspector, MediaKind, StreamInspector};
pub use provider::{JsonProvider, MatchProvider, ProviderConfig};
pub use streams::{build_inventory, HttpStreamLister, StreamLister};
pub use viewers::{enrich_matches_with_viewers, HttpViewerService, ViewerCountService};
