use serde::{Deserialize, Serialize};

use crate::bounds::{Delta, Point};
use crate::compression;
use crate::error::IndexError;
use crate::pool::{CellStack, DataStack, PointPool};
use crate::schema::Schema;

/// Discriminant stored in every packed chunk's tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkType {
    Contiguous,
    Sparse,
    Invalid,
}

impl ChunkType {
    pub fn to_byte(self) -> u8 {
        match self {
            ChunkType::Contiguous => 0,
            ChunkType::Sparse => 1,
            ChunkType::Invalid => 255,
        }
    }

    pub fn from_byte(byte: u8) -> Result<ChunkType, IndexError> {
        match byte {
            0 => Ok(ChunkType::Contiguous),
            1 => Ok(ChunkType::Sparse),
            255 => Ok(ChunkType::Invalid),
            other => Err(IndexError::corrupt(format!("unknown chunk type {other}"))),
        }
    }
}

/// Self-describing trailer fields appended to every packed blob, in declared
/// order. Readers parse from the end of the blob in reverse order, so fields
/// appended by future versions do not break parsers that stop at the fields
/// they recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TailField {
    #[serde(rename = "numPoints")]
    NumPoints,
    #[serde(rename = "chunkType")]
    ChunkType,
    #[serde(rename = "numBytes")]
    NumBytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyCompression {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "gzip")]
    Gzip,
}

/// Wire form of a [`Format`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatConfig {
    pub trust_headers: bool,
    pub compress: bool,
    #[serde(rename = "compress-hierarchy")]
    pub compress_hierarchy: HierarchyCompression,
    pub tail: Vec<TailField>,
    pub srs: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            trust_headers: true,
            compress: true,
            compress_hierarchy: HierarchyCompression::Gzip,
            tail: vec![TailField::NumPoints, TailField::ChunkType],
            srs: String::new(),
        }
    }
}

/// Byte-level description of chunk payloads: whether and how point records
/// are compressed and quantized, and which tail fields each blob carries.
/// The structure says which chunks exist; the format says what they look
/// like inside.
#[derive(Clone, Debug)]
pub struct Format {
    schema: Schema,
    delta: Option<Delta>,
    trust_headers: bool,
    compress: bool,
    compress_hierarchy: HierarchyCompression,
    tail_fields: Vec<TailField>,
    srs: String,
}

impl Format {
    pub fn new(
        schema: Schema,
        delta: Option<Delta>,
        config: FormatConfig,
    ) -> Result<Format, IndexError> {
        for (i, f) in config.tail.iter().enumerate() {
            if config.tail[i + 1..].contains(f) {
                return Err(IndexError::config("identical tail fields detected"));
            }
        }

        if config.compress && !config.tail.contains(&TailField::NumPoints) {
            return Err(IndexError::config(
                "cannot specify compression without numPoints in the tail",
            ));
        }

        Ok(Format {
            schema,
            delta,
            trust_headers: config.trust_headers,
            compress: config.compress,
            compress_hierarchy: config.compress_hierarchy,
            tail_fields: config.tail,
            srs: config.srs,
        })
    }

    pub fn to_config(&self) -> FormatConfig {
        FormatConfig {
            trust_headers: self.trust_headers,
            compress: self.compress,
            compress_hierarchy: self.compress_hierarchy,
            tail: self.tail_fields.clone(),
            srs: self.srs.clone(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn delta(&self) -> Option<&Delta> {
        self.delta.as_ref()
    }

    pub fn trust_headers(&self) -> bool {
        self.trust_headers
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn compress_hierarchy(&self) -> HierarchyCompression {
        self.compress_hierarchy
    }

    pub fn tail_fields(&self) -> &[TailField] {
        &self.tail_fields
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn set_srs(&mut self, srs: String) {
        self.srs = srs;
    }

    /// Size in bytes of one record on the wire.
    pub fn packed_point_size(&self) -> usize {
        if self.compress && self.delta.is_some() {
            // X/Y/Z doubles ride as 32-bit integers.
            self.schema.point_size() - 3 * 8 + 3 * 4
        } else {
            self.schema.point_size()
        }
    }

    /// Pack a drained data stack into a chunk blob: payload (optionally
    /// quantized, optionally compressed) followed by the tail.
    ///
    /// With a delta configured, incoming records hold quantized
    /// (integer-valued) X/Y/Z doubles; the rounding here is a cast, not a
    /// rescale.
    pub fn pack(&self, data: DataStack, chunk_type: ChunkType) -> Result<Vec<u8>, IndexError> {
        let num_points = data.len() as u64;
        let point_size = self.schema.point_size();

        let mut payload = if self.compress {
            let mut stream = Vec::with_capacity(num_points as usize * self.packed_point_size());
            if self.delta.is_some() {
                for record in data.iter() {
                    push_quantized(&mut stream, record);
                }
            } else {
                for record in data.iter() {
                    stream.extend_from_slice(record);
                }
            }
            compression::compress(&stream)?
        } else {
            let mut out = Vec::with_capacity(num_points as usize * point_size);
            for record in data.iter() {
                out.extend_from_slice(record);
            }
            out
        };

        drop(data);

        let packer = Packer {
            fields: &self.tail_fields,
            num_points,
            num_bytes: payload.len() as u64,
            chunk_type,
        };
        payload.extend_from_slice(&packer.build_tail());

        Ok(payload)
    }

    pub fn unpack(&self, data: Vec<u8>) -> Result<Unpacker<'_>, IndexError> {
        Unpacker::new(self, data)
    }

    /// Build a tail for a payload assembled elsewhere (the base chunk packs
    /// its own celled stream).
    pub(crate) fn build_tail(
        &self,
        num_points: u64,
        num_bytes: u64,
        chunk_type: ChunkType,
    ) -> Vec<u8> {
        Packer {
            fields: &self.tail_fields,
            num_points,
            num_bytes,
            chunk_type,
        }
        .build_tail()
    }

    /// The format used for a derived schema sharing this format's framing.
    /// Quantization never applies: the derived record layout is not the
    /// native one.
    pub fn with_schema(&self, schema: Schema) -> Format {
        Format {
            schema,
            delta: None,
            trust_headers: self.trust_headers,
            compress: self.compress,
            compress_hierarchy: self.compress_hierarchy,
            tail_fields: self.tail_fields.clone(),
            srs: self.srs.clone(),
        }
    }
}

fn push_quantized(stream: &mut Vec<u8>, record: &[u8]) {
    for axis in 0..3 {
        let v = f64::from_le_bytes(record[axis * 8..axis * 8 + 8].try_into().unwrap());
        stream.extend_from_slice(&(v.round() as i32).to_le_bytes());
    }
    stream.extend_from_slice(&record[24..]);
}

struct Packer<'a> {
    fields: &'a [TailField],
    num_points: u64,
    num_bytes: u64,
    chunk_type: ChunkType,
}

impl Packer<'_> {
    fn build_tail(&self) -> Vec<u8> {
        let mut tail = Vec::new();
        for field in self.fields {
            match field {
                TailField::NumPoints => tail.extend_from_slice(&self.num_points.to_le_bytes()),
                TailField::ChunkType => tail.push(self.chunk_type.to_byte()),
                TailField::NumBytes => tail.extend_from_slice(&self.num_bytes.to_le_bytes()),
            }
        }
        tail
    }
}

/// Lazy view over a packed blob. The tail is parsed eagerly (from the back,
/// reverse-declared order); the payload is decompressed only on acquire.
pub struct Unpacker<'a> {
    format: &'a Format,
    data: Vec<u8>,
    num_points: u64,
    chunk_type: Option<ChunkType>,
}

impl<'a> Unpacker<'a> {
    fn new(format: &'a Format, mut data: Vec<u8>) -> Result<Unpacker<'a>, IndexError> {
        let mut num_points = None;
        let mut num_bytes = None;
        let mut chunk_type = None;

        for field in format.tail_fields().iter().rev() {
            match field {
                TailField::NumPoints => num_points = Some(take_u64(&mut data)?),
                TailField::NumBytes => num_bytes = Some(take_u64(&mut data)?),
                TailField::ChunkType => {
                    let byte = take_u8(&mut data)?;
                    chunk_type = Some(ChunkType::from_byte(byte)?);
                }
            }
        }

        if let Some(num_bytes) = num_bytes {
            if num_bytes != data.len() as u64 {
                return Err(IndexError::corrupt(format!(
                    "payload is {} bytes, tail says {num_bytes}",
                    data.len()
                )));
            }
        }

        if format.compress() && num_points.is_none() {
            return Err(IndexError::corrupt("cannot decompress without numPoints"));
        }

        let num_points = match num_points {
            Some(n) => n,
            None => {
                let point_size = format.schema().point_size();
                if data.len() % point_size != 0 {
                    return Err(IndexError::corrupt(format!(
                        "payload of {} bytes is not a whole number of {point_size}-byte records",
                        data.len()
                    )));
                }
                (data.len() / point_size) as u64
            }
        };

        Ok(Unpacker {
            format,
            data,
            num_points,
            chunk_type,
        })
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk_type.unwrap_or(ChunkType::Invalid)
    }

    /// The payload bytes, decompressed if needed, still in the packed record
    /// layout (quantized when a delta is configured).
    pub fn acquire_raw_bytes(self) -> Result<Vec<u8>, IndexError> {
        if self.format.compress() {
            let expected = self.num_points as usize * self.format.packed_point_size();
            compression::decompress(&self.data, Some(expected))
        } else {
            Ok(self.data)
        }
    }

    /// Rehydrate the payload into pooled cells in the native record layout.
    pub fn acquire_cells(self, pool: &PointPool) -> Result<CellStack, IndexError> {
        let num_points = self.num_points as usize;
        let quantized = self.format.compress() && self.format.delta().is_some();
        let packed_size = self.format.packed_point_size();

        let bytes = self.acquire_raw_bytes()?;
        if bytes.len() != num_points * packed_size {
            return Err(IndexError::corrupt(format!(
                "chunk payload is {} bytes, expected {}",
                bytes.len(),
                num_points * packed_size
            )));
        }

        let mut data_stack = pool.data_pool().acquire(num_points);
        let mut cell_stack = pool.cell_pool().acquire(num_points);
        let mut out = pool.cell_pool().stack();

        for record in bytes.chunks_exact(packed_size) {
            let mut node = data_stack.pop().expect("stack sized to num_points");
            if quantized {
                expand_quantized(&mut node, record);
            } else {
                node.copy_from_slice(record);
            }

            let point = read_point(&node);
            let mut cell = cell_stack.pop().expect("stack sized to num_points");
            cell.set(point, node);
            out.push(cell);
        }

        debug_assert_eq!(out.len(), num_points);
        Ok(out)
    }
}

fn expand_quantized(node: &mut [u8], record: &[u8]) {
    for axis in 0..3 {
        let v = i32::from_le_bytes(record[axis * 4..axis * 4 + 4].try_into().unwrap());
        node[axis * 8..axis * 8 + 8].copy_from_slice(&f64::from(v).to_le_bytes());
    }
    node[24..].copy_from_slice(&record[12..]);
}

/// Native X/Y/Z doubles from the head of a record.
pub fn read_point(record: &[u8]) -> Point {
    Point::new(
        f64::from_le_bytes(record[0..8].try_into().unwrap()),
        f64::from_le_bytes(record[8..16].try_into().unwrap()),
        f64::from_le_bytes(record[16..24].try_into().unwrap()),
    )
}

/// Write X/Y/Z doubles into the head of a record.
pub fn write_point(record: &mut [u8], p: Point) {
    record[0..8].copy_from_slice(&p.x.to_le_bytes());
    record[8..16].copy_from_slice(&p.y.to_le_bytes());
    record[16..24].copy_from_slice(&p.z.to_le_bytes());
}

fn take_u64(data: &mut Vec<u8>) -> Result<u64, IndexError> {
    if data.len() < 8 {
        return Err(IndexError::corrupt("blob too short for tail"));
    }
    let at = data.len() - 8;
    let value = u64::from_le_bytes(data[at..].try_into().unwrap());
    data.truncate(at);
    Ok(value)
}

fn take_u8(data: &mut Vec<u8>) -> Result<u8, IndexError> {
    data.pop()
        .ok_or_else(|| IndexError::corrupt("blob too short for tail"))
}
