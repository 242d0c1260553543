//! Player session: the explicit object owning one playing sequence
//!
//! **Why**: Navigation state lives in a session handle owned by the call
//! site, never in process-wide globals. The host keeps one `PlayerSession`
//! per open capture and passes it to whoever needs it.
//!
//! **Used by**: host applications (render loop + controls), `main.rs`
//!
//! # Threading
//!
//! The session thread is the serial queue: every cache-slot and playback
//! index mutation happens inside `advance()` or a navigation call. Workers
//! only decode and upload, reporting progress over a channel. The render
//! read path (`active_frame()`) is a short uncontended lock, never disk I/O
//! or decode work.

use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, MutexGuard};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::entities::sequence::FrameSequence;
use crate::entities::splat::DecodedFrame;
use crate::error::{Error, InputError, Result};
use crate::io::ply::decode_frame;

use super::cache::{CacheStrategy, FrameCache};
use super::player::{PlaybackClock, DEFAULT_FPS};
use super::presenter::{DoubleBufferedPresenter, RenderBuffer};
use super::workers::Workers;

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    pub strategy: CacheStrategy,
    /// Autoplay rate; source captures vary, so this is a parameter.
    pub fps: f32,
    pub start_paused: bool,
    /// Supports host-level "resume where I left off".
    pub initial_index: usize,
    /// Worker thread override; `None` sizes from the CPU count.
    pub worker_threads: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Bounded,
            fps: DEFAULT_FPS,
            start_paused: false,
            initial_index: 0,
            worker_threads: None,
        }
    }
}

/// Host-persisted "last viewed frame" sideband. The session neither reads
/// nor writes it on its own; the host does around session start/end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub frame_index: usize,
}

impl ResumeState {
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Progress reports from decode/upload tasks. Decode results are delivered
/// even when superseded so a newer request for the same index can join
/// them; uploads report only when they survived every checkpoint.
enum DecodeEvent {
    Decoded {
        index: usize,
        epoch: u64,
        frame: Arc<DecodedFrame>,
    },
    Uploaded {
        index: usize,
        epoch: u64,
        buffer: usize,
    },
    Failed {
        index: usize,
        epoch: u64,
        error: Error,
    },
}

/// One playing splat sequence: cache, clock, presenter and decode pool.
pub struct PlayerSession {
    cache: FrameCache,
    clock: PlaybackClock,
    presenter: DoubleBufferedPresenter,
    workers: Workers,
    events_tx: Sender<DecodeEvent>,
    events_rx: Receiver<DecodeEvent>,
    frames_presented: u64,
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("frames_presented", &self.frames_presented)
            .finish_non_exhaustive()
    }
}

impl PlayerSession {
    /// Open a frame directory and present the initial frame. Scan, preload
    /// and initial-frame errors surface here, synchronously.
    pub fn load_frames(dir: impl AsRef<Path>, options: SessionOptions) -> Result<Self> {
        let sequence = FrameSequence::scan(dir)?;
        let frame_count = sequence.len();
        if options.initial_index >= frame_count {
            return Err(InputError::IndexOutOfRange {
                index: options.initial_index,
                frame_count,
            }
            .into());
        }

        let epoch = Arc::new(AtomicU64::new(0));
        let threads = options
            .worker_threads
            .unwrap_or_else(Workers::default_threads);
        let workers = Workers::new(threads, Arc::clone(&epoch));
        let mut cache = FrameCache::new(sequence, options.strategy);

        if options.strategy == CacheStrategy::Preload {
            cache.preload_all(&workers)?;
        }

        // First frame is the "currently requested" frame: failures are the
        // caller's problem, not a background skip.
        let initial = cache.load_frame_blocking(options.initial_index)?;

        let mut presenter = DoubleBufferedPresenter::new(epoch);
        presenter.prime(&initial)?;
        cache.evict_others(options.initial_index);

        let clock = PlaybackClock::new(
            frame_count,
            options.fps,
            options.start_paused,
            options.initial_index,
        );

        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        info!(
            "Session loaded: {} frames, strategy {:?}, {:.1} fps, {} decode threads",
            frame_count,
            options.strategy,
            clock.fps(),
            workers.thread_count()
        );

        Ok(Self {
            cache,
            clock,
            presenter,
            workers,
            events_tx,
            events_rx,
            frames_presented: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.cache.frame_count()
    }

    /// Last requested playback position (autoplay advances this eagerly).
    pub fn current_frame_index(&self) -> usize {
        self.clock.current()
    }

    /// Frame the render loop currently sees.
    pub fn displayed_frame_index(&self) -> Option<usize> {
        self.presenter.applied_index()
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.clock.set_paused(paused);
    }

    pub fn fps(&self) -> f32 {
        self.clock.fps()
    }

    /// Frames actually presented (flipped) so far.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Step forward. The target is computed from the displayed frame, so a
    /// request issued while another is in flight cancels it entirely rather
    /// than stacking on top of it.
    pub fn next_frame(&mut self) -> Result<usize> {
        let base = self.manual_base();
        let target = self.clock.next_of(base);
        self.request_manual(target)
    }

    /// Step backward; same cancellation semantics as `next_frame`.
    pub fn previous_frame(&mut self) -> Result<usize> {
        let base = self.manual_base();
        let target = self.clock.previous_of(base);
        self.request_manual(target)
    }

    /// Jump to an absolute index.
    pub fn seek(&mut self, index: usize) -> Result<usize> {
        let target = self.clock.checked_index(index)?;
        self.request_manual(target)
    }

    fn manual_base(&self) -> usize {
        self.presenter
            .applied_index()
            .unwrap_or_else(|| self.clock.current())
    }

    fn request_manual(&mut self, target: usize) -> Result<usize> {
        if self.cache.is_unavailable(target) {
            return Err(InputError::FrameUnavailable {
                index: target,
                reason: "decode failed earlier this session".into(),
            }
            .into());
        }
        self.clock.force_current(target);
        self.request_frame(target);
        Ok(target)
    }

    /// Render-tick entry point: drain worker events, drive autoplay, issue
    /// the next request. Returns an error only when the frame currently
    /// requested for display failed.
    pub fn advance(&mut self) -> Result<()> {
        let mut current_failure: Option<Error> = None;

        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                DecodeEvent::Decoded {
                    index,
                    epoch,
                    frame,
                } => self.on_decoded(index, epoch, frame),
                DecodeEvent::Uploaded {
                    index,
                    epoch,
                    buffer,
                } => self.on_uploaded(index, epoch, buffer),
                DecodeEvent::Failed {
                    index,
                    epoch,
                    error,
                } => {
                    if let Some(err) = self.on_failed(index, epoch, error) {
                        current_failure = Some(err);
                    }
                }
            }
        }

        if let Some(target) = self.clock.tick(Instant::now()) {
            match self.skip_unavailable(target) {
                Some(resolved) => {
                    if resolved != target {
                        self.clock.force_current(resolved);
                    }
                    self.request_frame(resolved);
                }
                None => {
                    warn!("Every frame is unavailable; pausing playback");
                    self.clock.set_paused(true);
                }
            }
        }

        self.presenter.settle();

        match current_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read surface for the render loop: the active buffer, locked briefly.
    /// Upload tasks only write the inactive buffer, so this never waits on
    /// decode work.
    pub fn active_frame(&self) -> MutexGuard<'_, RenderBuffer> {
        self.presenter.active()
    }

    /// Scan forward (with wraparound) for the first frame not marked
    /// unavailable. `None` when the whole sequence is unavailable.
    fn skip_unavailable(&self, target: usize) -> Option<usize> {
        let n = self.frame_count();
        (0..n)
            .map(|k| (target + k) % n)
            .find(|&i| !self.cache.is_unavailable(i))
    }

    /// Issue a presentation request for `target`, superseding any in-flight
    /// request. A repeat of the pending target joins it instead.
    fn request_frame(&mut self, target: usize) {
        if self.presenter.pending_target() == Some(target) {
            return;
        }
        if self.presenter.pending_target().is_none()
            && self.presenter.applied_index() == Some(target)
        {
            return;
        }

        let epoch = self.workers.advance_epoch();
        self.presenter.begin(target, epoch);

        if let Some(frame) = self.cache.get(target) {
            self.spawn_upload(frame, epoch);
            self.presenter.note_uploading();
            return;
        }

        if self.cache.is_loading(target) {
            // An older decode for this index is still running; its Decoded
            // event will arrive and we upload from there. Joining instead
            // of double-decoding.
            debug!("Joining in-flight decode of frame {target}");
            return;
        }

        if !self.cache.claim(target) {
            // Failed slot: report through the event pump so the error is
            // attributed to this request.
            let _ = self.events_tx.send(DecodeEvent::Failed {
                index: target,
                epoch,
                error: InputError::FrameUnavailable {
                    index: target,
                    reason: "decode failed earlier this session".into(),
                }
                .into(),
            });
            return;
        }

        let path = match self.cache.sequence().frame_path(target) {
            Ok(p) => p.to_path_buf(),
            Err(err) => {
                let _ = self.events_tx.send(DecodeEvent::Failed {
                    index: target,
                    epoch,
                    error: err,
                });
                return;
            }
        };

        let tx = self.events_tx.clone();
        let shared = self.presenter.shared();
        self.workers.execute(move || {
            let frame = match decode_frame(&path, target) {
                Ok(frame) => Arc::new(frame),
                Err(error) => {
                    let _ = tx.send(DecodeEvent::Failed {
                        index: target,
                        epoch,
                        error,
                    });
                    return;
                }
            };
            // Always deliver the decode; the session decides whether it is
            // still wanted. Then continue into the upload if not superseded.
            let _ = tx.send(DecodeEvent::Decoded {
                index: target,
                epoch,
                frame: Arc::clone(&frame),
            });
            match shared.upload_inactive(&frame, epoch) {
                Ok(Some(buffer)) => {
                    let _ = tx.send(DecodeEvent::Uploaded {
                        index: target,
                        epoch,
                        buffer,
                    });
                }
                Ok(None) => {} // superseded at a checkpoint
                Err(error) => {
                    let _ = tx.send(DecodeEvent::Failed {
                        index: target,
                        epoch,
                        error: error.into(),
                    });
                }
            }
        });
    }

    /// Upload-only task for a frame already resident in the cache.
    fn spawn_upload(&self, frame: Arc<DecodedFrame>, epoch: u64) {
        let tx = self.events_tx.clone();
        let shared = self.presenter.shared();
        let index = frame.index();
        self.workers.execute_with_epoch(epoch, move || {
            match shared.upload_inactive(&frame, epoch) {
                Ok(Some(buffer)) => {
                    let _ = tx.send(DecodeEvent::Uploaded {
                        index,
                        epoch,
                        buffer,
                    });
                }
                Ok(None) => {}
                Err(error) => {
                    let _ = tx.send(DecodeEvent::Failed {
                        index,
                        epoch,
                        error: error.into(),
                    });
                }
            }
        });
    }

    fn on_decoded(&mut self, index: usize, epoch: u64, frame: Arc<DecodedFrame>) {
        let current = self.presenter.pending_epoch();
        if current == Some(epoch) {
            // The in-flight request: cache it; the task is already
            // uploading.
            self.cache.insert(index, frame);
            self.presenter.note_uploading();
            return;
        }

        // Superseded decode. If the newest request wants exactly this
        // frame, it joins the finished work: cache it and upload under the
        // new epoch.
        if self.presenter.pending_target() == Some(index) {
            self.cache.insert(index, Arc::clone(&frame));
            if let Some(new_epoch) = self.presenter.pending_epoch() {
                debug!("Reusing superseded decode of frame {index}");
                self.spawn_upload(frame, new_epoch);
                self.presenter.note_uploading();
            }
            return;
        }

        // Nobody wants it. Preload keeps decoded frames; bounded mode
        // drops them to hold the one-resident-frame invariant.
        match self.cache.strategy() {
            CacheStrategy::Preload => self.cache.insert(index, frame),
            CacheStrategy::Bounded => self.cache.release_claim(index),
        }
    }

    fn on_uploaded(&mut self, index: usize, epoch: u64, buffer: usize) {
        if self.presenter.pending_epoch() != Some(epoch) {
            // Superseded between upload completion and this pump; the flip
            // never happens for a stale epoch.
            debug!("Discarding superseded upload of frame {index}");
            return;
        }
        self.presenter.commit(index, buffer);
        self.frames_presented += 1;
        self.cache.evict_others(index);
    }

    fn on_failed(&mut self, index: usize, epoch: u64, error: Error) -> Option<Error> {
        // A corrupt frame is corrupt regardless of which request found out.
        if !matches!(
            error,
            Error::Input(InputError::FrameUnavailable { .. })
        ) {
            self.cache.mark_failed(index, error.to_string());
        }

        // Matching epoch: this is the in-flight request. Matching target:
        // the pending request joined this decode and can no longer succeed.
        if self.presenter.pending_epoch() == Some(epoch)
            || self.presenter.pending_target() == Some(index)
        {
            self.presenter.abort();
            // The frame actually requested for display: surface it.
            Some(error)
        } else {
            warn!("Background decode of frame {index} failed: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::presenter::PresentPhase;
    use crate::entities::splat::{SplatColor, SplatPoint};
    use crate::io::writer::write_frame;
    use glam::Vec3;
    use std::time::Duration;

    fn marker_point(frame: usize) -> SplatPoint {
        SplatPoint {
            position: Vec3::splat(frame as f32),
            log_scale: Vec3::ZERO,
            logit_opacity: 0.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
            color: SplatColor::Linear([frame as u8, 0, 0]),
        }
    }

    fn write_sequence(dir: &Path, frames: usize) {
        for n in 0..frames {
            let path = dir.join(format!("frame_{:06}.ply", n + 1));
            write_frame(&path, &[marker_point(n)]).unwrap();
        }
    }

    fn paused_options() -> SessionOptions {
        SessionOptions {
            start_paused: true,
            worker_threads: Some(2),
            ..Default::default()
        }
    }

    /// Pump `advance()` until the presenter shows `expected` and goes idle.
    fn pump_until_displayed(session: &mut PlayerSession, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let _ = session.advance();
            if session.displayed_frame_index() == Some(expected)
                && session.presenter.phase() == PresentPhase::Idle
                && session.presenter.pending_target().is_none()
            {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "frame {expected} was never presented"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn load_frames_presents_initial_frame() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 4);

        let session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();
        assert_eq!(session.frame_count(), 4);
        assert_eq!(session.displayed_frame_index(), Some(0));
        assert_eq!(session.current_frame_index(), 0);
        let view = session.active_frame();
        assert_eq!(view.frame_index(), Some(0));
        assert_eq!(view.points()[0].position, [0.0; 3]);
    }

    #[test]
    fn initial_index_is_honored() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 4);

        let options = SessionOptions {
            initial_index: 2,
            ..paused_options()
        };
        let session = PlayerSession::load_frames(tmp.path(), options).unwrap();
        assert_eq!(session.displayed_frame_index(), Some(2));
    }

    #[test]
    fn initial_index_out_of_range_fails() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 2);

        let options = SessionOptions {
            initial_index: 5,
            ..paused_options()
        };
        let err = PlayerSession::load_frames(tmp.path(), options).unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::IndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn next_and_seek_present_the_target() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 5);
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        assert_eq!(session.next_frame().unwrap(), 1);
        pump_until_displayed(&mut session, 1);
        let marker = session.active_frame().points()[0].position;
        assert_eq!(marker, [1.0; 3]);

        assert_eq!(session.seek(4).unwrap(), 4);
        pump_until_displayed(&mut session, 4);
        assert_eq!(session.current_frame_index(), 4);
    }

    #[test]
    fn previous_wraps_to_last_frame() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 5);
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        assert_eq!(session.previous_frame().unwrap(), 4);
        pump_until_displayed(&mut session, 4);
    }

    #[test]
    fn manual_race_applies_only_the_last_request() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 6);
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        // next() then previous() before anything completes: the previous()
        // computes from the still-displayed start frame and cancels the
        // next(). The presenter must land on (0 - 1 + 6) % 6 = 5, never 1.
        session.next_frame().unwrap();
        let target = session.previous_frame().unwrap();
        assert_eq!(target, 5);

        pump_until_displayed(&mut session, 5);
        assert_eq!(session.displayed_frame_index(), Some(5));
        assert_eq!(session.current_frame_index(), 5);
        assert_eq!(session.active_frame().points()[0].position, [5.0; 3]);
    }

    #[test]
    fn bounded_mode_keeps_one_resident_frame() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 4);
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        session.seek(2).unwrap();
        pump_until_displayed(&mut session, 2);

        assert_eq!(session.cache().resident_count(), 1);
        assert!(session.cache().get(2).is_some());
    }

    #[test]
    fn preload_mode_serves_from_memory() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 3);
        let options = SessionOptions {
            strategy: CacheStrategy::Preload,
            ..paused_options()
        };
        let mut session = PlayerSession::load_frames(tmp.path(), options).unwrap();
        assert_eq!(session.cache().resident_count(), 3);

        session.seek(2).unwrap();
        pump_until_displayed(&mut session, 2);
        assert_eq!(session.cache().resident_count(), 3);
    }

    #[test]
    fn seek_to_corrupt_frame_surfaces_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 3);
        std::fs::write(tmp.path().join("frame_000002.ply"), b"garbage").unwrap();
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        session.seek(1).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match session.advance() {
                Err(err) => break err,
                Ok(()) => {
                    assert!(Instant::now() < deadline, "corrupt frame never reported");
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        };
        assert!(matches!(err, Error::Format(_) | Error::Decode(_)));

        // Previous frame still displayed; frame 1 permanently unavailable.
        assert_eq!(session.displayed_frame_index(), Some(0));
        assert!(session.cache().is_unavailable(1));
        assert!(matches!(
            session.seek(1).unwrap_err(),
            Error::Input(InputError::FrameUnavailable { index: 1, .. })
        ));
    }

    #[test]
    fn autoplay_skips_unavailable_frames_on_wraparound() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 3);
        let mut session = PlayerSession::load_frames(tmp.path(), paused_options()).unwrap();

        // Frame 1 fails once, then autoplay must never select it again.
        session.cache.mark_failed(1, "corrupt".into());
        assert_eq!(session.skip_unavailable(1), Some(2));
        assert_eq!(session.skip_unavailable(2), Some(2));

        session.cache.mark_failed(2, "corrupt".into());
        assert_eq!(session.skip_unavailable(1), Some(0));

        session.cache.mark_failed(0, "corrupt".into());
        assert_eq!(session.skip_unavailable(1), None);
    }

    #[test]
    fn autoplay_advances_with_wall_clock() {
        let tmp = tempfile::tempdir().unwrap();
        write_sequence(tmp.path(), 4);
        let options = SessionOptions {
            fps: 240.0,
            start_paused: false,
            worker_threads: Some(2),
            ..Default::default()
        };
        let mut session = PlayerSession::load_frames(tmp.path(), options).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.frames_presented() == 0 {
            let _ = session.advance();
            assert!(Instant::now() < deadline, "autoplay never presented");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(session.displayed_frame_index().is_some());
    }

    #[test]
    fn resume_state_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        let state = ResumeState { frame_index: 42 };
        state.save(&path).unwrap();
        assert_eq!(ResumeState::load(&path).unwrap(), state);
    }
}
