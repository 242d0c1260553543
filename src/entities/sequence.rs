//! Frame sequence discovery and ordering
//!
//! **Why**: Captures arrive as a directory of numbered `.ply` files
//! (`frame_000001.ply`, ...). Playback needs dense 0-based indices in a
//! deterministic order regardless of filesystem enumeration order.
//!
//! **Used by**: `core::cache` (path resolution), `core::session` (load)
//!
//! # Sort policy
//!
//! Stems matching `frame_<digits>` order numerically by the digit group;
//! everything else orders lexicographically. The numeric group sorts
//! *before* non-matching names, so a stray `notes.ply` never shifts frame
//! indices of a well-formed capture.

use std::path::{Path, PathBuf};

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, InputError, Result};

/// Recognized frame file extension (matched case-insensitively).
pub const FRAME_EXTENSION: &str = "ply";

static FRAME_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^frame_(\d+)$").expect("frame name pattern"));

/// One discovered frame file.
#[derive(Debug, Clone)]
pub struct FrameFile {
    path: PathBuf,
    stem: String,
    /// Parsed digit group for `frame_<digits>` names.
    numeric: Option<u64>,
}

impl FrameFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }
}

/// An ordered frame sequence rooted at a source directory.
///
/// Invariant: indices are dense `0..len()` in sort-policy order.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    dir: PathBuf,
    frames: Vec<FrameFile>,
}

impl FrameSequence {
    /// Scan a directory for frame files and build the ordered index.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(InputError::DirectoryNotFound(dir.to_path_buf()).into());
        }

        let mut frames = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|_| Error::from(InputError::DirectoryNotFound(dir.to_path_buf())))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let ext_ok = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|e| e.eq_ignore_ascii_case(FRAME_EXTENSION))
                .unwrap_or(false);
            if !ext_ok {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let numeric = FRAME_NAME_RE
                .captures(&stem)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());

            frames.push(FrameFile {
                path,
                stem,
                numeric,
            });
        }

        if frames.is_empty() {
            return Err(InputError::NoFramesFound {
                dir: dir.to_path_buf(),
                ext: FRAME_EXTENSION,
            }
            .into());
        }

        // Numeric-pattern names first (by parsed number, then stem for
        // duplicate numbers), lexicographic names after.
        frames.sort_by(|a, b| match (a.numeric, b.numeric) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.stem.cmp(&b.stem)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.stem.cmp(&b.stem),
        });

        info!("Scanned {}: {} frames", dir.display(), frames.len());
        debug!(
            "First frame: {}, last frame: {}",
            frames[0].stem,
            frames[frames.len() - 1].stem
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            frames,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame file at a dense index.
    pub fn get(&self, index: usize) -> Option<&FrameFile> {
        self.frames.get(index)
    }

    /// Path for a dense index, with range checking.
    pub fn frame_path(&self, index: usize) -> Result<&Path> {
        self.frames
            .get(index)
            .map(|f| f.path.as_path())
            .ok_or_else(|| {
                InputError::IndexOutOfRange {
                    index,
                    frame_count: self.frames.len(),
                }
                .into()
            })
    }

    /// Conventional thumbnail locations for a gallery UI:
    /// `thumbnails/<stem>.jpg` and `thumbnails/<stem>.png`. The paths are
    /// computed only; nothing here reads them.
    pub fn thumbnail_candidates(&self, index: usize) -> Option<[PathBuf; 2]> {
        let frame = self.frames.get(index)?;
        let thumbs = self.dir.join("thumbnails");
        Some([
            thumbs.join(format!("{}.jpg", frame.stem)),
            thumbs.join(format!("{}.png", frame.stem)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"ply").unwrap();
    }

    #[test]
    fn ten_numbered_frames_index_densely() {
        let tmp = tempfile::tempdir().unwrap();
        // Create in arbitrary (non-sorted) order.
        for n in [7, 1, 10, 3, 2, 9, 5, 4, 8, 6] {
            touch(tmp.path(), &format!("frame_{:06}.ply", n));
        }

        let seq = FrameSequence::scan(tmp.path()).unwrap();
        assert_eq!(seq.len(), 10);
        for (idx, expected) in (1..=10).enumerate() {
            assert_eq!(
                seq.get(idx).unwrap().stem(),
                format!("frame_{:06}", expected)
            );
        }
    }

    #[test]
    fn missing_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        let err = FrameSequence::scan(&gone).unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn empty_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "readme.txt");
        let err = FrameSequence::scan(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::Input(InputError::NoFramesFound { .. })));
    }

    #[test]
    fn numeric_names_sort_before_lexicographic_names() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "aaa.ply");
        touch(tmp.path(), "frame_2.ply");
        touch(tmp.path(), "frame_10.ply");
        touch(tmp.path(), "zzz.ply");

        let seq = FrameSequence::scan(tmp.path()).unwrap();
        let stems: Vec<_> = (0..seq.len())
            .map(|i| seq.get(i).unwrap().stem().to_string())
            .collect();
        // frame_2 before frame_10 (numeric, not lexicographic), then the
        // non-matching names in lexicographic order.
        assert_eq!(stems, vec!["frame_2", "frame_10", "aaa", "zzz"]);
    }

    #[test]
    fn extension_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "frame_1.PLY");
        touch(tmp.path(), "frame_2.ply");
        touch(tmp.path(), "frame_3.exr");

        let seq = FrameSequence::scan(tmp.path()).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn frame_path_checks_range() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "frame_1.ply");
        let seq = FrameSequence::scan(tmp.path()).unwrap();
        assert!(seq.frame_path(0).is_ok());
        assert!(matches!(
            seq.frame_path(1).unwrap_err(),
            Error::Input(InputError::IndexOutOfRange { index: 1, .. })
        ));
    }

    #[test]
    fn thumbnail_candidates_follow_convention() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "frame_1.ply");
        let seq = FrameSequence::scan(tmp.path()).unwrap();
        let [jpg, png] = seq.thumbnail_candidates(0).unwrap();
        assert!(jpg.ends_with("thumbnails/frame_1.jpg"));
        assert!(png.ends_with("thumbnails/frame_1.png"));
    }
}
