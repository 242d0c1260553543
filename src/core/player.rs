//! Playback clock: wall-clock autoplay and manual frame targets
//!
//! **Why**: Heavy splat frames decode slower than they play. The clock
//! advances by `floor(elapsed * fps)` so a slow consumer skips frames and
//! stays in wall-clock sync instead of degrading to a fixed +1 step.
//!
//! **Used by**: `core::session` (drives `tick()` from `advance()`)
//!
//! # Timing model
//!
//! The accumulator keeps the sub-frame remainder: after advancing N frames
//! the reference timestamp moves by exactly N frame durations, not to
//! "now". Seeking and pause/resume reset the accumulator.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::{InputError, Result};

/// Default autoplay rate. Configurable per session.
pub const DEFAULT_FPS: f32 = 30.0;

/// Playback position and autoplay timing for one sequence.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    frame_count: usize,
    current: usize,
    paused: bool,
    fps: f32,
    last_advance: Option<Instant>,
}

impl PlaybackClock {
    pub fn new(frame_count: usize, fps: f32, start_paused: bool, initial_index: usize) -> Self {
        Self {
            frame_count,
            current: initial_index.min(frame_count.saturating_sub(1)),
            paused: start_paused,
            fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
            last_advance: None,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.paused = paused;
            // Resume starts a fresh accumulator; paused time never counts.
            self.last_advance = None;
            trace!("Playback {}", if paused { "paused" } else { "resumed" });
        }
    }

    /// Autoplay step. Returns the new index when enough wall-clock time has
    /// elapsed for at least one frame. `now` is injected for testability.
    pub fn tick(&mut self, now: Instant) -> Option<usize> {
        if self.paused || self.frame_count == 0 {
            return None;
        }

        let Some(last) = self.last_advance else {
            self.last_advance = Some(now);
            return None;
        };

        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let steps = (elapsed * self.fps as f64).floor() as usize;
        if steps == 0 {
            return None;
        }

        self.current = (self.current + steps) % self.frame_count;
        // Keep the fractional remainder in the accumulator.
        self.last_advance = Some(last + Duration::from_secs_f64(steps as f64 / self.fps as f64));
        trace!("Autoplay advanced {steps} frames to {}", self.current);
        Some(self.current)
    }

    /// Move the clock to an externally chosen index (manual navigation or
    /// an unavailable-frame skip). Resets the accumulator.
    pub fn force_current(&mut self, index: usize) {
        if index < self.frame_count {
            self.current = index;
            self.last_advance = None;
        }
    }

    /// Wraparound successor of `base`.
    pub fn next_of(&self, base: usize) -> usize {
        if self.frame_count == 0 {
            return 0;
        }
        (base + 1) % self.frame_count
    }

    /// Wraparound predecessor of `base`.
    pub fn previous_of(&self, base: usize) -> usize {
        if self.frame_count == 0 {
            return 0;
        }
        (base + self.frame_count - 1) % self.frame_count
    }

    /// Validate an absolute seek target.
    pub fn checked_index(&self, index: usize) -> Result<usize> {
        if index < self.frame_count {
            Ok(index)
        } else {
            Err(InputError::IndexOutOfRange {
                index,
                frame_count: self.frame_count,
            }
            .into())
        }
    }
}
