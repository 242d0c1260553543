//! Playback engine - cache, clock, presenter, session, workers
//!
//! These modules are platform-agnostic; hosts talk to [`session::PlayerSession`].

pub mod cache;
pub mod player;
pub mod presenter;
pub mod session;
pub mod workers;

pub use cache::{CacheStrategy, FrameCache};
pub use player::{PlaybackClock, DEFAULT_FPS};
pub use presenter::{DoubleBufferedPresenter, PresentPhase, RenderBuffer};
pub use session::{PlayerSession, ResumeState, SessionOptions};
pub use workers::Workers;
