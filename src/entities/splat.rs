//! Splat point types and the decoded-frame container
//!
//! **Why**: One frame of a splat capture is a flat list of anisotropic
//! gaussian primitives. Scale and opacity are kept in the domains the files
//! store them in (log / logit); whoever rasterizes applies exp/sigmoid.
//!
//! **Used by**: `io::ply` (decode target), `core::cache` (residency),
//! `core::presenter` (packed upload layout)

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};

/// Zeroth-order spherical-harmonic basis constant, used when resolving a
/// DC coefficient to a displayable color.
pub const SH_C0: f32 = 0.282_094_79;

/// Per-point color. Exactly one representation is populated per point:
/// either a raw linear 8-bit triplet or the first-order SH DC coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplatColor {
    /// Linear 8-bit RGB.
    Linear([u8; 3]),
    /// Spherical-harmonic DC coefficient per channel, unevaluated.
    ShDc(Vec3),
}

impl SplatColor {
    /// Resolve to displayable linear RGB in `[0, 1]`. This is the render-side
    /// interpretation; the decoder never applies it.
    pub fn to_rgb(self) -> [f32; 3] {
        match self {
            SplatColor::Linear([r, g, b]) => {
                [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
            }
            SplatColor::ShDc(c) => [
                (0.5 + SH_C0 * c.x).clamp(0.0, 1.0),
                (0.5 + SH_C0 * c.y).clamp(0.0, 1.0),
                (0.5 + SH_C0 * c.z).clamp(0.0, 1.0),
            ],
        }
    }

    /// View as an SH DC coefficient, inverting the DC evaluation for linear
    /// colors. Used by the writer when a frame mixes representations.
    pub fn as_sh_dc(self) -> Vec3 {
        match self {
            SplatColor::ShDc(c) => c,
            SplatColor::Linear(_) => {
                let [r, g, b] = self.to_rgb();
                Vec3::new((r - 0.5) / SH_C0, (g - 0.5) / SH_C0, (b - 0.5) / SH_C0)
            }
        }
    }

    /// View as a linear 8-bit triplet, evaluating the DC coefficient if
    /// needed.
    pub fn as_linear_u8(self) -> [u8; 3] {
        match self {
            SplatColor::Linear(rgb) => rgb,
            SplatColor::ShDc(_) => {
                let [r, g, b] = self.to_rgb();
                [
                    (r * 255.0).round() as u8,
                    (g * 255.0).round() as u8,
                    (b * 255.0).round() as u8,
                ]
            }
        }
    }
}

impl Default for SplatColor {
    fn default() -> Self {
        SplatColor::Linear([0, 0, 0])
    }
}

/// A single gaussian-splat primitive as decoded from a frame file.
///
/// `log_scale` and `logit_opacity` are verbatim file values; use
/// [`SplatPoint::linear_scale`] / [`SplatPoint::opacity`] on the render side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatPoint {
    pub position: Vec3,
    /// Per-axis scale exponent (log domain).
    pub log_scale: Vec3,
    /// Opacity in logit domain; sigmoid recovers `[0, 1]`.
    pub logit_opacity: f32,
    /// Unit quaternion, scalar-first: `[w, x, y, z]`.
    pub rotation: [f32; 4],
    pub color: SplatColor,
}

impl SplatPoint {
    /// Linear per-axis scale (`exp` of the stored exponent).
    pub fn linear_scale(&self) -> Vec3 {
        Vec3::new(
            self.log_scale.x.exp(),
            self.log_scale.y.exp(),
            self.log_scale.z.exp(),
        )
    }

    /// Opacity in `[0, 1]` (sigmoid of the stored logit).
    pub fn opacity(&self) -> f32 {
        1.0 / (1.0 + (-self.logit_opacity).exp())
    }

    /// Rotation as a `glam` quaternion (glam stores x, y, z, w).
    pub fn rotation_quat(&self) -> Quat {
        let [w, x, y, z] = self.rotation;
        Quat::from_xyzw(x, y, z, w)
    }
}

impl Default for SplatPoint {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            log_scale: Vec3::ZERO,
            logit_opacity: 0.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
            color: SplatColor::default(),
        }
    }
}

/// GPU upload layout for one splat: 14 floats, no padding.
///
/// Scale and opacity stay in log/logit domain for the shader; color is
/// resolved to linear RGB at packing time.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedSplat {
    pub position: [f32; 3],
    pub log_scale: [f32; 3],
    pub logit_opacity: f32,
    pub rotation: [f32; 4],
    pub rgb: [f32; 3],
}

impl From<&SplatPoint> for PackedSplat {
    fn from(p: &SplatPoint) -> Self {
        Self {
            position: p.position.to_array(),
            log_scale: p.log_scale.to_array(),
            logit_opacity: p.logit_opacity,
            rotation: p.rotation,
            rgb: p.color.to_rgb(),
        }
    }
}

/// One decoded frame: an ordered, immutable point list plus its index and
/// source path. Built once per decode, dropped on eviction.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    index: usize,
    source: PathBuf,
    points: Vec<SplatPoint>,
}

impl DecodedFrame {
    pub fn new(index: usize, source: PathBuf, points: Vec<SplatPoint>) -> Self {
        Self {
            index,
            source,
            points,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn points(&self) -> &[SplatPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Resident memory in bytes, for cache accounting.
    pub fn mem(&self) -> usize {
        self.points.len() * std::mem::size_of::<SplatPoint>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_roundtrips_within_tolerance() {
        let dc = SplatColor::ShDc(Vec3::new(0.4, -0.2, 1.1));
        let back = SplatColor::Linear(dc.as_linear_u8());
        let a = dc.to_rgb();
        let b = back.to_rgb();
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1.0 / 255.0 + 1e-6);
        }
    }

    #[test]
    fn default_point_has_identity_rotation() {
        let p = SplatPoint::default();
        assert_eq!(p.rotation, [1.0, 0.0, 0.0, 0.0]);
        let q = p.rotation_quat();
        assert!((q.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opacity_sigmoid() {
        let p = SplatPoint {
            logit_opacity: 0.0,
            ..Default::default()
        };
        assert!((p.opacity() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn packed_layout_is_tight() {
        assert_eq!(std::mem::size_of::<PackedSplat>(), 14 * 4);
        // Byte view for GPU upload must cover the whole vec.
        let packed = vec![PackedSplat::zeroed(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&packed);
        assert_eq!(bytes.len(), 3 * 14 * 4);
    }

    #[test]
    fn frame_reports_memory() {
        let frame = DecodedFrame::new(
            0,
            PathBuf::from("frame_000000.ply"),
            vec![SplatPoint::default(); 10],
        );
        assert_eq!(frame.len(), 10);
        assert_eq!(frame.mem(), 10 * std::mem::size_of::<SplatPoint>());
    }
}
