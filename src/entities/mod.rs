//! Domain types - splat points, decoded frames, frame sequences

pub mod sequence;
pub mod splat;

pub use sequence::{FrameFile, FrameSequence, FRAME_EXTENSION};
pub use splat::{DecodedFrame, PackedSplat, SplatColor, SplatPoint};
