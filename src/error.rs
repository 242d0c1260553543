//! Error taxonomy for the player core
//!
//! Four classes, matching where a failure originates:
//! - [`InputError`]: the caller handed us something unusable (bad directory,
//!   out-of-range index, a frame already known-bad for this session)
//! - [`FormatError`]: the frame file violates the PLY contract
//! - [`DecodeError`]: I/O or payload damage discovered mid-parse
//! - [`ResourceError`]: render-buffer allocation/upload failure
//!
//! Errors for the frame actually requested for display surface synchronously;
//! the same classes in background decodes are logged and the frame is marked
//! unavailable for the session (see `core::session`).

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the request itself, before any decoding starts.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("source directory not found or not a directory: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("no .{ext} frames found in {dir}")]
    NoFramesFound { dir: PathBuf, ext: &'static str },

    #[error("frame index {index} out of range (frame count {frame_count})")]
    IndexOutOfRange { index: usize, frame_count: usize },

    /// The frame failed to decode earlier in this session. Corrupt frames
    /// are not retried; the caller should pick a different index.
    #[error("frame {index} is marked unavailable for this session: {reason}")]
    FrameUnavailable { index: usize, reason: String },
}

/// Violations of the frame-file structure contract.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("vertex element is missing required property '{property}'")]
    MissingProperty { property: &'static str },

    #[error("property '{property}' has non-numeric type ({found})")]
    TypeMismatch { property: String, found: String },
}

/// Failures while consuming an otherwise well-formed payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("i/o error while decoding frame payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload truncated: header declared {expected} vertices, data ended after {read}")]
    Truncated { expected: usize, read: usize },

    #[error("unparsable payload token '{token}'")]
    Token { token: String },
}

/// Render-side resource failures (buffer allocation during upload).
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("render buffer allocation of {bytes} bytes failed")]
    BufferAlloc { bytes: usize },
}

/// Umbrella error for the whole crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_property() {
        let err = Error::from(FormatError::MissingProperty { property: "scale_1" });
        assert!(err.to_string().contains("scale_1"));

        let err = Error::from(FormatError::TypeMismatch {
            property: "opacity".into(),
            found: "list uchar int".into(),
        });
        assert!(err.to_string().contains("opacity"));
    }

    #[test]
    fn io_errors_convert_through_decode() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = DecodeError::from(io).into();
        assert!(matches!(err, Error::Decode(DecodeError::Io(_))));
    }
}
