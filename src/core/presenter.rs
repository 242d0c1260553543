//! Double-buffered frame presenter
//!
//! Two render buffers (A/B): the render loop only ever reads the active
//! one; a background task writes the inactive one and the session flips the
//! roles atomically once the upload is complete. The renderer can never
//! observe a half-written frame.
//!
//! Cancellation is cooperative against the shared epoch counter, checked
//! after decode (in the task), after buffer reset, before upload, and
//! before flip. A superseded task discards its work without touching the
//! active buffer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use crate::entities::splat::{DecodedFrame, PackedSplat};
use crate::error::{ResourceError, Result};

/// Presentation state machine, driven by the session from worker events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentPhase {
    Idle,
    Decoding,
    Uploading,
    Ready,
}

/// One of the two CPU-side render buffers: packed splats plus the frame
/// index they came from. `as_bytes` is the GPU upload view.
#[derive(Debug, Default)]
pub struct RenderBuffer {
    points: Vec<PackedSplat>,
    frame_index: Option<usize>,
}

impl RenderBuffer {
    fn reset(&mut self) {
        self.points.clear();
        self.frame_index = None;
    }

    fn upload(&mut self, frame: &DecodedFrame) -> std::result::Result<(), ResourceError> {
        let needed = frame.len();
        self.points
            .try_reserve(needed.saturating_sub(self.points.capacity()))
            .map_err(|_| ResourceError::BufferAlloc {
                bytes: needed * std::mem::size_of::<PackedSplat>(),
            })?;
        self.points.extend(frame.points().iter().map(PackedSplat::from));
        self.frame_index = Some(frame.index());
        Ok(())
    }

    pub fn points(&self) -> &[PackedSplat] {
        &self.points
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }

    pub fn frame_index(&self) -> Option<usize> {
        self.frame_index
    }
}

/// State shared with upload tasks: the buffer pair, the active index and
/// the epoch counter.
#[derive(Debug)]
pub struct PresenterShared {
    buffers: [Mutex<RenderBuffer>; 2],
    active: AtomicUsize,
    epoch: Arc<AtomicU64>,
}

impl PresenterShared {
    fn stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Relaxed) != epoch
    }

    /// Pack a frame into the currently inactive buffer. Returns the buffer
    /// index to flip to, or `None` when the request was superseded at one
    /// of the cancellation checkpoints. Never touches the active buffer.
    pub fn upload_inactive(
        &self,
        frame: &DecodedFrame,
        epoch: u64,
    ) -> std::result::Result<Option<usize>, ResourceError> {
        let target = 1 - self.active.load(Ordering::Acquire) % 2;
        let mut buffer = self.buffers[target]
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if self.stale(epoch) {
            return Ok(None);
        }
        buffer.reset();
        if self.stale(epoch) {
            return Ok(None);
        }
        buffer.upload(frame)?;
        if self.stale(epoch) {
            // Leave the written data; the buffer is inactive and the next
            // upload resets it.
            return Ok(None);
        }
        trace!(
            "Uploaded frame {} into buffer {target} ({} points)",
            frame.index(),
            frame.len()
        );
        Ok(Some(target))
    }

    /// Index of the active buffer (render-side read path).
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire) % 2
    }

    /// Short read guard over the active buffer. Upload tasks only ever lock
    /// the inactive buffer, so this does not contend with decode work.
    pub fn active(&self) -> MutexGuard<'_, RenderBuffer> {
        self.buffers[self.active_index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Session-side handle: phase machine plus the pending request.
pub struct DoubleBufferedPresenter {
    shared: Arc<PresenterShared>,
    phase: PresentPhase,
    pending: Option<PendingRequest>,
    applied: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    target: usize,
    epoch: u64,
}

impl DoubleBufferedPresenter {
    pub fn new(epoch: Arc<AtomicU64>) -> Self {
        Self {
            shared: Arc::new(PresenterShared {
                buffers: [
                    Mutex::new(RenderBuffer::default()),
                    Mutex::new(RenderBuffer::default()),
                ],
                active: AtomicUsize::new(0),
                epoch,
            }),
            phase: PresentPhase::Idle,
            pending: None,
            applied: None,
        }
    }

    pub fn shared(&self) -> Arc<PresenterShared> {
        Arc::clone(&self.shared)
    }

    /// Read guard over the active buffer, borrowed through the presenter so
    /// callers need no Arc of their own.
    pub fn active(&self) -> MutexGuard<'_, RenderBuffer> {
        self.shared.active()
    }

    pub fn phase(&self) -> PresentPhase {
        self.phase
    }

    /// Frame index shown by the active buffer.
    pub fn applied_index(&self) -> Option<usize> {
        self.applied
    }

    pub fn pending_target(&self) -> Option<usize> {
        self.pending.map(|p| p.target)
    }

    pub fn pending_epoch(&self) -> Option<u64> {
        self.pending.map(|p| p.epoch)
    }

    /// Start a new request; any in-flight one is already superseded by the
    /// epoch bump the session performed.
    pub fn begin(&mut self, target: usize, epoch: u64) {
        self.pending = Some(PendingRequest { target, epoch });
        self.phase = PresentPhase::Decoding;
    }

    /// Decode finished for the pending request; its upload is running.
    pub fn note_uploading(&mut self) {
        if self.phase == PresentPhase::Decoding {
            self.phase = PresentPhase::Uploading;
        }
    }

    /// The request concluded without a flip (failure or supersession by a
    /// request the session is about to issue).
    pub fn abort(&mut self) {
        self.pending = None;
        self.phase = PresentPhase::Idle;
    }

    /// Flip the active/inactive roles. Only called by the session, and only
    /// for an upload whose epoch is still current, so the renderer observes
    /// the new frame in full or not at all.
    pub fn commit(&mut self, index: usize, buffer: usize) {
        self.shared.active.store(buffer % 2, Ordering::Release);
        self.applied = Some(index);
        self.pending = None;
        self.phase = PresentPhase::Ready;
        debug!("Presented frame {index} (buffer {buffer})");
    }

    /// Ready -> Idle once the session finished its tick.
    pub fn settle(&mut self) {
        if self.phase == PresentPhase::Ready {
            self.phase = PresentPhase::Idle;
        }
    }

    /// Synchronous first upload during session startup: before the render
    /// loop exists there is nothing to tear.
    pub fn prime(&mut self, frame: &DecodedFrame) -> Result<()> {
        let index = self.shared.active_index();
        let mut buffer = self.shared.buffers[index]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        buffer.reset();
        buffer.upload(frame)?;
        drop(buffer);
        self.applied = Some(frame.index());
        self.phase = PresentPhase::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::splat::{SplatColor, SplatPoint};
    use glam::Vec3;
    use std::path::PathBuf;

    fn frame(index: usize, seed: f32, count: usize) -> DecodedFrame {
        let point = SplatPoint {
            position: Vec3::splat(seed),
            log_scale: Vec3::ZERO,
            logit_opacity: 0.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
            color: SplatColor::Linear([0, 0, 0]),
        };
        DecodedFrame::new(index, PathBuf::from("test.ply"), vec![point; count])
    }

    fn presenter() -> (DoubleBufferedPresenter, Arc<AtomicU64>) {
        let epoch = Arc::new(AtomicU64::new(0));
        (DoubleBufferedPresenter::new(Arc::clone(&epoch)), epoch)
    }

    #[test]
    fn prime_fills_active_buffer() {
        let (mut p, _) = presenter();
        p.prime(&frame(0, 1.0, 3)).unwrap();
        let active = p.active();
        assert_eq!(active.frame_index(), Some(0));
        assert_eq!(active.points().len(), 3);
        assert_eq!(p.applied_index(), Some(0));
    }

    #[test]
    fn upload_and_commit_flip_exactly_one_buffer() {
        let (mut p, _) = presenter();
        p.prime(&frame(0, 1.0, 2)).unwrap();
        let shared = p.shared();
        let before = shared.active_index();

        p.begin(1, 0);
        let buffer = shared.upload_inactive(&frame(1, 2.0, 4), 0).unwrap().unwrap();
        assert_ne!(buffer, before);

        // Active buffer untouched until commit.
        assert_eq!(shared.active().frame_index(), Some(0));

        p.note_uploading();
        assert_eq!(p.phase(), PresentPhase::Uploading);
        p.commit(1, buffer);

        assert_eq!(shared.active_index(), buffer);
        let active = shared.active();
        assert_eq!(active.frame_index(), Some(1));
        assert_eq!(active.points().len(), 4);
        assert_eq!(active.points()[0].position, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn superseded_upload_is_discarded() {
        let (mut p, epoch) = presenter();
        p.prime(&frame(0, 1.0, 2)).unwrap();
        let shared = p.shared();

        p.begin(1, 0);
        // A newer request bumps the epoch before the upload runs.
        epoch.fetch_add(1, Ordering::Relaxed);
        let result = shared.upload_inactive(&frame(1, 2.0, 4), 0).unwrap();
        assert_eq!(result, None);

        // Active frame unchanged.
        assert_eq!(shared.active().frame_index(), Some(0));
    }

    #[test]
    fn sequential_updates_never_mix_frames() {
        let (mut p, _) = presenter();
        p.prime(&frame(0, 0.0, 8)).unwrap();
        let shared = p.shared();

        for i in 1..6 {
            p.begin(i, 0);
            let buffer = shared
                .upload_inactive(&frame(i, i as f32, 8), 0)
                .unwrap()
                .unwrap();
            p.note_uploading();
            p.commit(i, buffer);
            p.settle();

            let active = shared.active();
            assert_eq!(active.frame_index(), Some(i));
            // Every point belongs to frame i - no mixture of two frames.
            for point in active.points() {
                assert_eq!(point.position, [i as f32; 3]);
            }
        }
        assert_eq!(p.phase(), PresentPhase::Idle);
    }
}
