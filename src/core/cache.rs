//! Frame cache with bounded and preload strategies
//!
//! **Why**: Captures can be hundreds of multi-megabyte frames; keeping them
//! all decoded is only viable for short clips. Bounded mode keeps exactly
//! the presented frame resident; preload mode trades memory for zero
//! per-frame decode latency.
//!
//! **Used by**: `core::session` (the only mutator - all slot bookkeeping
//! happens on the session thread; workers never touch the cache directly)

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::entities::sequence::FrameSequence;
use crate::entities::splat::DecodedFrame;
use crate::error::{Error, InputError, Result};
use crate::io::ply::decode_frame;

use super::workers::Workers;

/// Frame retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStrategy {
    /// Keep only the presented frame resident (default; required for long
    /// sequences).
    Bounded,
    /// Decode everything at setup time and keep it (short sequences).
    Preload,
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::Bounded
    }
}

/// Per-index slot state.
#[derive(Debug, Clone)]
enum Slot {
    Empty,
    /// A decode for this index is in flight; duplicate requests join it.
    Loading,
    Resident(Arc<DecodedFrame>),
    /// Decode failed earlier this session; never retried.
    Failed(String),
}

/// Bounded- or preload-memory store of decoded frames.
pub struct FrameCache {
    sequence: FrameSequence,
    slots: Vec<Slot>,
    strategy: CacheStrategy,
    resident_bytes: usize,
}

impl FrameCache {
    pub fn new(sequence: FrameSequence, strategy: CacheStrategy) -> Self {
        let slots = vec![Slot::Empty; sequence.len()];
        debug!(
            "FrameCache created: {} frames, strategy {:?}",
            sequence.len(),
            strategy
        );
        Self {
            sequence,
            slots,
            strategy,
            resident_bytes: 0,
        }
    }

    pub fn sequence(&self) -> &FrameSequence {
        &self.sequence
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    /// Resident frame for an index, if decoded.
    pub fn get(&self, index: usize) -> Option<Arc<DecodedFrame>> {
        match self.slots.get(index) {
            Some(Slot::Resident(frame)) => Some(Arc::clone(frame)),
            _ => None,
        }
    }

    pub fn is_loading(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Loading))
    }

    /// True once a decode of this index has failed this session.
    pub fn is_unavailable(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Failed(_)))
    }

    pub fn resident_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Resident(_)))
            .count()
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Claim an index for an in-flight decode. Returns false when the slot
    /// is already loading, resident or failed - the caller must not start a
    /// second decode.
    pub fn claim(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Empty) => {
                *slot = Slot::Loading;
                true
            }
            _ => false,
        }
    }

    /// Release a claim without a result (superseded decode whose output was
    /// discarded). The slot becomes loadable again.
    pub fn release_claim(&mut self, index: usize) {
        if let Some(slot @ Slot::Loading) = self.slots.get_mut(index) {
            *slot = Slot::Empty;
        }
    }

    /// Store a decoded frame.
    pub fn insert(&mut self, index: usize, frame: Arc<DecodedFrame>) {
        if index >= self.slots.len() {
            return;
        }
        let bytes = frame.mem();
        if let Slot::Resident(old) = &self.slots[index] {
            self.resident_bytes = self.resident_bytes.saturating_sub(old.mem());
        }
        self.slots[index] = Slot::Resident(frame);
        self.resident_bytes += bytes;
        debug!(
            "Cached frame {index} ({bytes} bytes, {} resident total)",
            self.resident_bytes
        );
    }

    /// Mark a frame permanently unavailable for this session.
    pub fn mark_failed(&mut self, index: usize, reason: String) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let Slot::Resident(old) = slot {
                self.resident_bytes = self.resident_bytes.saturating_sub(old.mem());
            }
            warn!("Frame {index} marked unavailable: {reason}");
            *slot = Slot::Failed(reason);
        }
    }

    /// Bounded-mode eviction: drop every resident frame except `keep`.
    /// Called right after a frame is handed to the presenter.
    pub fn evict_others(&mut self, keep: usize) {
        if self.strategy != CacheStrategy::Bounded {
            return;
        }
        let mut freed = 0usize;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if index == keep {
                continue;
            }
            if let Slot::Resident(frame) = slot {
                freed += frame.mem();
                *slot = Slot::Empty;
            }
        }
        if freed > 0 {
            self.resident_bytes = self.resident_bytes.saturating_sub(freed);
            debug!(
                "Evicted all but frame {keep} ({freed} bytes freed, {} resident)",
                self.resident_bytes
            );
        }
    }

    /// Synchronous load for session startup and tests. Returns the stored
    /// failure for known-bad frames instead of re-decoding.
    pub fn load_frame_blocking(&mut self, index: usize) -> Result<Arc<DecodedFrame>> {
        if let Some(frame) = self.get(index) {
            return Ok(frame);
        }
        if let Some(Slot::Failed(reason)) = self.slots.get(index) {
            return Err(InputError::FrameUnavailable {
                index,
                reason: reason.clone(),
            }
            .into());
        }
        let path = self.sequence.frame_path(index)?.to_path_buf();
        match decode_frame(&path, index) {
            Ok(frame) => {
                let frame = Arc::new(frame);
                self.insert(index, Arc::clone(&frame));
                Ok(frame)
            }
            Err(err) => {
                self.mark_failed(index, err.to_string());
                Err(err)
            }
        }
    }

    /// Eagerly decode every frame through the worker pool. Per-frame
    /// failures are recorded and logged; one corrupt frame never aborts
    /// setup of the rest.
    pub fn preload_all(&mut self, workers: &Workers) -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, Result<DecodedFrame>)>();
        let mut expected = 0usize;

        for index in 0..self.slots.len() {
            if !self.claim(index) {
                continue;
            }
            let path: &Path = self.sequence.frame_path(index)?;
            let path = path.to_path_buf();
            let tx = tx.clone();
            workers.execute(move || {
                let _ = tx.send((index, decode_frame(&path, index)));
            });
            expected += 1;
        }
        drop(tx);

        let mut failed = 0usize;
        for _ in 0..expected {
            let Ok((index, result)) = rx.recv() else {
                break;
            };
            match result {
                Ok(frame) => self.insert(index, Arc::new(frame)),
                Err(err) => {
                    failed += 1;
                    self.mark_failed(index, err.to_string());
                }
            }
        }

        info!(
            "Preloaded {} frames ({} failed, {} bytes resident)",
            expected - failed,
            failed,
            self.resident_bytes
        );
        Ok(())
    }
}
