//! Streaming PLY decoder for gaussian-splat frames
//!
//! **Why**: Capture frames are PLY files with a `vertex` element carrying
//! gaussian parameters. Frames run into the millions of points, so the
//! payload is decoded in bounded batches instead of one giant read.
//!
//! **Used by**: `core::cache` (frame loads), `core::session` (decode tasks)
//!
//! # Contract
//!
//! - Formats: `ascii`, `binary_little_endian`, `binary_big_endian` (1.0).
//! - Elements other than `vertex` (case-insensitive) are skipped; their
//!   presence never changes the decoded points.
//! - Required vertex properties: `x y z scale_0 scale_1 scale_2 opacity
//!   rot_0 rot_1 rot_2 rot_3`. Scale and opacity are read verbatim
//!   (log / logit domain). Rotation order is (real, i, j, k).
//! - Optional color: `f_dc_0..2` (SH DC) or `red/green/blue` (linear 8-bit);
//!   neither present decodes to a zeroed linear triplet.
//! - Any numeric stored type coerces to f32; a list type at a required slot
//!   is a type mismatch.
//! - Missing required properties fail before any payload is read.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use glam::Vec3;
use log::debug;

use crate::entities::splat::{DecodedFrame, SplatColor, SplatPoint};
use crate::error::{DecodeError, Error, FormatError, Result};

/// Upper bound on points decoded per batch; bounds peak parse memory.
pub const DECODE_BATCH_SIZE: usize = 10_000;

const REQUIRED_PROPERTIES: [&str; 11] = [
    "x", "y", "z", "scale_0", "scale_1", "scale_2", "opacity", "rot_0", "rot_1", "rot_2", "rot_3",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::I8 => "char",
            Self::U8 => "uchar",
            Self::I16 => "short",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyType {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

impl PropertyType {
    fn describe(&self) -> String {
        match self {
            PropertyType::Scalar(t) => t.name().to_string(),
            PropertyType::List { count, item } => {
                format!("list {} {}", count.name(), item.name())
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PropertyDef {
    name: String,
    ty: PropertyType,
}

#[derive(Debug, Clone)]
struct ElementDef {
    name: String,
    count: usize,
    properties: Vec<PropertyDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

struct PlyHeader {
    format: PlyFormat,
    elements: Vec<ElementDef>,
}

fn malformed(msg: impl Into<String>) -> Error {
    FormatError::MalformedHeader(msg.into()).into()
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader> {
    let mut line = String::new();
    read_header_line(reader, &mut line)?;
    if line.trim() != "ply" {
        return Err(malformed("missing 'ply' magic"));
    }

    let mut format = None;
    let mut elements: Vec<ElementDef> = Vec::new();

    loop {
        read_header_line(reader, &mut line)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        match parts.next() {
            Some("comment") | Some("obj_info") => continue,
            Some("format") => {
                let kind = parts.next().ok_or_else(|| malformed("format line without kind"))?;
                format = Some(match kind {
                    "ascii" => PlyFormat::Ascii,
                    "binary_little_endian" => PlyFormat::BinaryLittleEndian,
                    "binary_big_endian" => PlyFormat::BinaryBigEndian,
                    other => return Err(malformed(format!("unknown format '{other}'"))),
                });
            }
            Some("element") => {
                let name = parts
                    .next()
                    .ok_or_else(|| malformed("element line without name"))?;
                let count = parts
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| malformed(format!("element '{name}' without a valid count")))?;
                elements.push(ElementDef {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| malformed("property declared before any element"))?;
                let first = parts
                    .next()
                    .ok_or_else(|| malformed("property line without type"))?;
                let ty = if first == "list" {
                    let count = parts
                        .next()
                        .and_then(ScalarType::parse)
                        .ok_or_else(|| malformed("list property without count type"))?;
                    let item = parts
                        .next()
                        .and_then(ScalarType::parse)
                        .ok_or_else(|| malformed("list property without item type"))?;
                    PropertyType::List { count, item }
                } else {
                    PropertyType::Scalar(
                        ScalarType::parse(first)
                            .ok_or_else(|| malformed(format!("unknown property type '{first}'")))?,
                    )
                };
                let name = parts
                    .next()
                    .ok_or_else(|| malformed("property line without name"))?;
                element.properties.push(PropertyDef {
                    name: name.to_string(),
                    ty,
                });
            }
            Some("end_header") => break,
            Some(other) => return Err(malformed(format!("unrecognized header line '{other}'"))),
            None => continue,
        }
    }

    let format = format.ok_or_else(|| malformed("missing format declaration"))?;
    Ok(PlyHeader { format, elements })
}

fn read_header_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<()> {
    line.clear();
    let n = reader.read_line(line).map_err(DecodeError::Io)?;
    if n == 0 {
        return Err(malformed("unexpected end of header"));
    }
    Ok(())
}

/// What to do with each vertex property while walking a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldUse {
    Position(usize),
    Scale(usize),
    Opacity,
    Rotation(usize),
    ShDc(usize),
    Rgb(usize),
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorMode {
    ShDc,
    Linear,
    None,
}

fn resolve_slots(vertex: &ElementDef) -> Result<(Vec<FieldUse>, ColorMode)> {
    let has_scalar = |name: &str| {
        vertex
            .properties
            .iter()
            .any(|p| p.name == name && matches!(p.ty, PropertyType::Scalar(_)))
    };
    let color_mode = if ["f_dc_0", "f_dc_1", "f_dc_2"].iter().all(|n| has_scalar(n)) {
        ColorMode::ShDc
    } else if ["red", "green", "blue"].iter().all(|n| has_scalar(n)) {
        ColorMode::Linear
    } else {
        ColorMode::None
    };

    let mut found = [false; REQUIRED_PROPERTIES.len()];
    let mut uses = Vec::with_capacity(vertex.properties.len());

    for prop in &vertex.properties {
        let field = match prop.name.as_str() {
            "x" => FieldUse::Position(0),
            "y" => FieldUse::Position(1),
            "z" => FieldUse::Position(2),
            "scale_0" => FieldUse::Scale(0),
            "scale_1" => FieldUse::Scale(1),
            "scale_2" => FieldUse::Scale(2),
            "opacity" => FieldUse::Opacity,
            "rot_0" => FieldUse::Rotation(0),
            "rot_1" => FieldUse::Rotation(1),
            "rot_2" => FieldUse::Rotation(2),
            "rot_3" => FieldUse::Rotation(3),
            "f_dc_0" if color_mode == ColorMode::ShDc => FieldUse::ShDc(0),
            "f_dc_1" if color_mode == ColorMode::ShDc => FieldUse::ShDc(1),
            "f_dc_2" if color_mode == ColorMode::ShDc => FieldUse::ShDc(2),
            "red" if color_mode == ColorMode::Linear => FieldUse::Rgb(0),
            "green" if color_mode == ColorMode::Linear => FieldUse::Rgb(1),
            "blue" if color_mode == ColorMode::Linear => FieldUse::Rgb(2),
            _ => FieldUse::Skip,
        };

        if field != FieldUse::Skip {
            if let PropertyType::List { .. } = prop.ty {
                return Err(FormatError::TypeMismatch {
                    property: prop.name.clone(),
                    found: prop.ty.describe(),
                }
                .into());
            }
        }
        if let Some(pos) = REQUIRED_PROPERTIES
            .iter()
            .position(|n| *n == prop.name.as_str())
        {
            found[pos] = true;
        }
        uses.push(field);
    }

    if let Some(pos) = found.iter().position(|f| !f) {
        return Err(FormatError::MissingProperty {
            property: REQUIRED_PROPERTIES[pos],
        }
        .into());
    }

    Ok((uses, color_mode))
}

/// Staging area for one row; converted to a point once the row is complete.
#[derive(Debug, Default, Clone, Copy)]
struct RawPoint {
    position: [f32; 3],
    scale: [f32; 3],
    opacity: f32,
    rotation: [f32; 4],
    sh_dc: [f32; 3],
    rgb: [f32; 3],
}

impl RawPoint {
    fn set(&mut self, field: FieldUse, v: f64) {
        let v = v as f32;
        match field {
            FieldUse::Position(i) => self.position[i] = v,
            FieldUse::Scale(i) => self.scale[i] = v,
            FieldUse::Opacity => self.opacity = v,
            FieldUse::Rotation(i) => self.rotation[i] = v,
            FieldUse::ShDc(i) => self.sh_dc[i] = v,
            FieldUse::Rgb(i) => self.rgb[i] = v,
            FieldUse::Skip => {}
        }
    }

    fn into_point(self, color_mode: ColorMode) -> SplatPoint {
        let color = match color_mode {
            ColorMode::ShDc => SplatColor::ShDc(Vec3::from_array(self.sh_dc)),
            ColorMode::Linear => SplatColor::Linear([
                channel_u8(self.rgb[0]),
                channel_u8(self.rgb[1]),
                channel_u8(self.rgb[2]),
            ]),
            ColorMode::None => SplatColor::Linear([0, 0, 0]),
        };
        SplatPoint {
            position: Vec3::from_array(self.position),
            log_scale: Vec3::from_array(self.scale),
            logit_opacity: self.opacity,
            rotation: self.rotation,
            color,
        }
    }
}

fn channel_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn read_scalar<R: Read>(
    reader: &mut R,
    ty: ScalarType,
    big_endian: bool,
) -> std::io::Result<f64> {
    macro_rules! rd {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            reader.read_exact(&mut buf)?;
            if big_endian {
                <$t>::from_be_bytes(buf) as f64
            } else {
                <$t>::from_le_bytes(buf) as f64
            }
        }};
    }
    Ok(match ty {
        ScalarType::I8 => rd!(i8, 1),
        ScalarType::U8 => rd!(u8, 1),
        ScalarType::I16 => rd!(i16, 2),
        ScalarType::U16 => rd!(u16, 2),
        ScalarType::I32 => rd!(i32, 4),
        ScalarType::U32 => rd!(u32, 4),
        ScalarType::F32 => rd!(f32, 4),
        ScalarType::F64 => rd!(f64, 8),
    })
}

fn skip_exact<R: Read>(reader: &mut R, mut n: usize) -> std::io::Result<()> {
    let mut buf = [0u8; 256];
    while n > 0 {
        let take = n.min(buf.len());
        reader.read_exact(&mut buf[..take])?;
        n -= take;
    }
    Ok(())
}

fn read_binary_row<R: Read>(
    reader: &mut R,
    properties: &[PropertyDef],
    uses: &[FieldUse],
    big_endian: bool,
    raw: &mut RawPoint,
) -> std::result::Result<(), DecodeError> {
    for (prop, field) in properties.iter().zip(uses) {
        match prop.ty {
            PropertyType::Scalar(ty) => {
                if *field == FieldUse::Skip {
                    skip_exact(reader, ty.size())?;
                } else {
                    let v = read_scalar(reader, ty, big_endian)?;
                    raw.set(*field, v);
                }
            }
            PropertyType::List { count, item } => {
                let n = read_scalar(reader, count, big_endian)? as usize;
                skip_exact(reader, n * item.size())?;
            }
        }
    }
    Ok(())
}

fn read_ascii_row<R: BufRead>(
    reader: &mut R,
    properties: &[PropertyDef],
    uses: &[FieldUse],
    line: &mut String,
    raw: &mut RawPoint,
) -> std::result::Result<(), DecodeError> {
    loop {
        line.clear();
        let n = reader.read_line(line).map_err(DecodeError::Io)?;
        if n == 0 {
            return Err(DecodeError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "payload ended early",
            )));
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let mut tokens = line.split_whitespace();
    for (prop, field) in properties.iter().zip(uses) {
        match prop.ty {
            PropertyType::Scalar(_) => {
                let tok = next_token(&mut tokens, &prop.name)?;
                if *field != FieldUse::Skip {
                    let v: f64 = tok.parse().map_err(|_| DecodeError::Token {
                        token: tok.to_string(),
                    })?;
                    raw.set(*field, v);
                }
            }
            PropertyType::List { .. } => {
                let tok = next_token(&mut tokens, &prop.name)?;
                let n: usize = tok.parse().map_err(|_| DecodeError::Token {
                    token: tok.to_string(),
                })?;
                for _ in 0..n {
                    next_token(&mut tokens, &prop.name)?;
                }
            }
        }
    }
    Ok(())
}

fn next_token<'a>(
    tokens: &mut std::str::SplitWhitespace<'a>,
    property: &str,
) -> std::result::Result<&'a str, DecodeError> {
    tokens.next().ok_or_else(|| DecodeError::Token {
        token: format!("(missing value for '{property}')"),
    })
}

fn skip_element_payload<R: BufRead>(
    reader: &mut R,
    format: PlyFormat,
    element: &ElementDef,
) -> Result<()> {
    match format {
        PlyFormat::Ascii => {
            let mut line = String::new();
            let mut rows = 0;
            while rows < element.count {
                line.clear();
                let n = reader.read_line(&mut line).map_err(DecodeError::Io)?;
                if n == 0 {
                    return Err(DecodeError::Truncated {
                        expected: element.count,
                        read: rows,
                    }
                    .into());
                }
                if !line.trim().is_empty() {
                    rows += 1;
                }
            }
        }
        PlyFormat::BinaryLittleEndian | PlyFormat::BinaryBigEndian => {
            let big_endian = format == PlyFormat::BinaryBigEndian;
            let fixed_row: Option<usize> = element
                .properties
                .iter()
                .map(|p| match p.ty {
                    PropertyType::Scalar(t) => Some(t.size()),
                    PropertyType::List { .. } => None,
                })
                .sum();
            if let Some(row) = fixed_row {
                skip_exact(reader, row * element.count).map_err(DecodeError::Io)?;
            } else {
                for _ in 0..element.count {
                    for prop in &element.properties {
                        match prop.ty {
                            PropertyType::Scalar(t) => {
                                skip_exact(reader, t.size()).map_err(DecodeError::Io)?
                            }
                            PropertyType::List { count, item } => {
                                let n = read_scalar(reader, count, big_endian)
                                    .map_err(DecodeError::Io)?
                                    as usize;
                                skip_exact(reader, n * item.size()).map_err(DecodeError::Io)?;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Streaming vertex decoder: a lazy, finite, non-restartable sequence of
/// point batches. Re-decoding a frame requires reopening the source.
#[derive(Debug)]
pub struct PlyFrameDecoder<R> {
    reader: R,
    format: PlyFormat,
    properties: Vec<PropertyDef>,
    uses: Vec<FieldUse>,
    color_mode: ColorMode,
    total: usize,
    read: usize,
    line: String,
    poisoned: bool,
}

impl PlyFrameDecoder<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(DecodeError::Io)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: BufRead> PlyFrameDecoder<R> {
    /// Parse the header, resolve vertex property slots, and position the
    /// reader at the first vertex row. Fails on a missing required property
    /// before any payload is read.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let header = read_header(&mut reader)?;
        let vertex_pos = header
            .elements
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case("vertex"))
            .ok_or_else(|| malformed("no vertex element declared"))?;

        let vertex = header.elements[vertex_pos].clone();
        let (uses, color_mode) = resolve_slots(&vertex)?;

        for element in &header.elements[..vertex_pos] {
            skip_element_payload(&mut reader, header.format, element)?;
        }

        debug!(
            "vertex element ready: {} points, {} properties, color {:?}",
            vertex.count,
            vertex.properties.len(),
            color_mode
        );

        Ok(Self {
            reader,
            format: header.format,
            properties: vertex.properties,
            uses,
            color_mode,
            total: vertex.count,
            read: 0,
            line: String::new(),
            poisoned: false,
        })
    }

    /// Vertex count declared by the header.
    pub fn total_points(&self) -> usize {
        self.total
    }

    /// Points decoded so far.
    pub fn points_read(&self) -> usize {
        self.read
    }

    /// Decode the next batch (at most [`DECODE_BATCH_SIZE`] points).
    /// `Ok(None)` once the vertex payload is exhausted. After an error the
    /// decoder yields nothing further.
    pub fn read_batch(&mut self) -> Result<Option<Vec<SplatPoint>>> {
        if self.poisoned || self.read >= self.total {
            return Ok(None);
        }

        let n = (self.total - self.read).min(DECODE_BATCH_SIZE);
        let mut batch = Vec::with_capacity(n);

        for _ in 0..n {
            let mut raw = RawPoint::default();
            let row = match self.format {
                PlyFormat::Ascii => read_ascii_row(
                    &mut self.reader,
                    &self.properties,
                    &self.uses,
                    &mut self.line,
                    &mut raw,
                ),
                PlyFormat::BinaryLittleEndian => {
                    read_binary_row(&mut self.reader, &self.properties, &self.uses, false, &mut raw)
                }
                PlyFormat::BinaryBigEndian => {
                    read_binary_row(&mut self.reader, &self.properties, &self.uses, true, &mut raw)
                }
            };
            if let Err(err) = row {
                self.poisoned = true;
                let err = match err {
                    DecodeError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        DecodeError::Truncated {
                            expected: self.total,
                            read: self.read,
                        }
                    }
                    other => other,
                };
                return Err(err.into());
            }
            batch.push(raw.into_point(self.color_mode));
            self.read += 1;
        }

        Ok(Some(batch))
    }
}

impl<R: BufRead> Iterator for PlyFrameDecoder<R> {
    type Item = Result<Vec<SplatPoint>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_batch().transpose()
    }
}

/// Decode a whole frame file into an immutable [`DecodedFrame`].
///
/// Rotations are renormalized to unit length here; everything else is
/// verbatim file data. On any error no partial point list escapes.
pub fn decode_frame(path: &Path, index: usize) -> Result<DecodedFrame> {
    let mut decoder = PlyFrameDecoder::open(path)?;
    let mut points = Vec::with_capacity(decoder.total_points());
    while let Some(batch) = decoder.read_batch()? {
        points.extend(batch);
    }

    for point in &mut points {
        let norm = point
            .rotation
            .iter()
            .map(|c| c * c)
            .sum::<f32>()
            .sqrt();
        if norm > f32::EPSILON {
            for c in &mut point.rotation {
                *c /= norm;
            }
        }
    }

    Ok(DecodedFrame::new(index, path.to_path_buf(), points))
}
