//! SPLAYA - Gaussian-splat sequence player core
//!
//! Decodes numbered PLY splat frames and presents them to a render loop as
//! a continuously playable, memory-bounded animation: a streaming frame
//! decoder, a bounded/preload frame cache, a wall-clock playback clock and
//! a double-buffered presenter that never shows a torn frame.
//!
//! Hosts own a [`PlayerSession`] per capture, call `advance()` once per
//! render tick and read `active_frame()` to draw.

pub mod cli;
pub mod core;
pub mod entities;
pub mod error;
pub mod io;

// Re-export the host-facing surface.
pub use crate::core::cache::{CacheStrategy, FrameCache};
pub use crate::core::player::{PlaybackClock, DEFAULT_FPS};
pub use crate::core::presenter::{DoubleBufferedPresenter, PresentPhase, RenderBuffer};
pub use crate::core::session::{PlayerSession, ResumeState, SessionOptions};
pub use crate::entities::sequence::FrameSequence;
pub use crate::entities::splat::{DecodedFrame, PackedSplat, SplatColor, SplatPoint};
pub use crate::error::{DecodeError, Error, FormatError, InputError, ResourceError, Result};
