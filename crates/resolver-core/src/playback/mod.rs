//! Playback fallback state machine.
//!
//! [`PlaybackMachine::step`] is a plain `(session, event) -> effects`
//! function. [`SessionHandle`] wraps a session for concurrent use and runs
//! the watchdog timer; [`play_headless`] answers effects by inspecting URLs.

mod driver;
mod event;
mod headless;
mod machine;
mod state;

pub use driver::{PlaybackError, SessionHandle};
pub use event::{Effect, PlaybackEvent, TransitionRecord, TransitionRing};
pub use headless::{play_headless, HeadlessOutcome, LoadAttempt};
pub use machine::PlaybackMachine;
pub use state::{FailureReason, PlaybackPhase, PlaybackSession, PlaybackTech, SessionSnapshot};
