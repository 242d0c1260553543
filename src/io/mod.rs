//! Frame file I/O - PLY decode and encode

pub mod ply;
pub mod writer;

pub use ply::{decode_frame, PlyFrameDecoder, DECODE_BATCH_SIZE};
pub use writer::write_frame;
