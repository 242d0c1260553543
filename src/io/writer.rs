//! Binary PLY writer for splat frames
//!
//! Counterpart of `io::ply`, used by tooling and round-trip tests. Emits
//! `binary_little_endian 1.0` with the same property names the decoder
//! requires. Color representation follows the points: any SH DC point makes
//! the frame write `f_dc_*` floats (linear colors are converted through
//! their DC view); an all-linear frame writes `red/green/blue` uchar.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::entities::splat::{SplatColor, SplatPoint};
use crate::error::{DecodeError, Result};

/// Write a frame's points to a PLY file.
pub fn write_frame(path: &Path, points: &[SplatPoint]) -> Result<()> {
    let file = File::create(path).map_err(DecodeError::Io)?;
    let mut writer = BufWriter::new(file);
    write_frame_to(&mut writer, points)?;
    writer.flush().map_err(DecodeError::Io)?;
    debug!("Wrote {} points to {}", points.len(), path.display());
    Ok(())
}

/// Write a frame's points to any sink.
pub fn write_frame_to<W: Write>(writer: &mut W, points: &[SplatPoint]) -> Result<()> {
    let sh_color = points
        .iter()
        .any(|p| matches!(p.color, SplatColor::ShDc(_)));

    let mut header = String::from("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {}\n", points.len()));
    for name in [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "opacity", "rot_0", "rot_1", "rot_2",
        "rot_3",
    ] {
        header.push_str(&format!("property float {name}\n"));
    }
    if sh_color {
        for name in ["f_dc_0", "f_dc_1", "f_dc_2"] {
            header.push_str(&format!("property float {name}\n"));
        }
    } else {
        for name in ["red", "green", "blue"] {
            header.push_str(&format!("property uchar {name}\n"));
        }
    }
    header.push_str("end_header\n");
    writer.write_all(header.as_bytes()).map_err(DecodeError::Io)?;

    let mut row = Vec::with_capacity(14 * 4);
    for point in points {
        row.clear();
        for v in [
            point.position.x,
            point.position.y,
            point.position.z,
            point.log_scale.x,
            point.log_scale.y,
            point.log_scale.z,
            point.logit_opacity,
            point.rotation[0],
            point.rotation[1],
            point.rotation[2],
            point.rotation[3],
        ] {
            row.extend_from_slice(&v.to_le_bytes());
        }
        if sh_color {
            let dc = point.color.as_sh_dc();
            for v in [dc.x, dc.y, dc.z] {
                row.extend_from_slice(&v.to_le_bytes());
            }
        } else {
            row.extend_from_slice(&point.color.as_linear_u8());
        }
        writer.write_all(&row).map_err(DecodeError::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ply::decode_frame;
    use glam::Vec3;

    fn synthetic_point() -> SplatPoint {
        // Unit quaternion: (0.5, 0.5, 0.5, 0.5).
        SplatPoint {
            position: Vec3::new(1.25, -2.5, 3.75),
            log_scale: Vec3::new(-4.0, -3.5, -5.25),
            logit_opacity: 1.75,
            rotation: [0.5, 0.5, 0.5, 0.5],
            color: SplatColor::ShDc(Vec3::new(0.3, -0.6, 1.2)),
        }
    }

    #[test]
    fn roundtrip_reproduces_every_field() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame_000001.ply");
        let original = synthetic_point();
        write_frame(&path, &[original]).unwrap();

        let frame = decode_frame(&path, 0).unwrap();
        assert_eq!(frame.len(), 1);
        let p = frame.points()[0];

        let tol = 1e-5;
        assert!((p.position - original.position).abs().max_element() < tol);
        assert!((p.log_scale - original.log_scale).abs().max_element() < tol);
        assert!((p.logit_opacity - original.logit_opacity).abs() < tol);
        for i in 0..4 {
            assert!((p.rotation[i] - original.rotation[i]).abs() < tol);
        }
        match (p.color, original.color) {
            (SplatColor::ShDc(a), SplatColor::ShDc(b)) => {
                assert!((a - b).abs().max_element() < tol);
            }
            other => panic!("color representation changed: {other:?}"),
        }
    }

    #[test]
    fn linear_frame_roundtrips_as_uchar() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame_000001.ply");
        let original = SplatPoint {
            color: SplatColor::Linear([10, 200, 77]),
            ..synthetic_point()
        };
        write_frame(&path, &[original]).unwrap();

        let frame = decode_frame(&path, 0).unwrap();
        assert_eq!(frame.points()[0].color, SplatColor::Linear([10, 200, 77]));
    }

    #[test]
    fn empty_frame_is_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame_000001.ply");
        write_frame(&path, &[]).unwrap();
        let frame = decode_frame(&path, 0).unwrap();
        assert!(frame.is_empty());
    }
}
