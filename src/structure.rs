use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::id::Id;

/// Octree geometry: depth bands, chunk sizing, and chunk-id arithmetic.
///
/// Depths split into three bands. Nodes above `baseDepthBegin` are not
/// stored; depths in `[baseDepthBegin, baseDepthEnd)` belong to the single
/// base chunk; deeper nodes live in cold chunks, contiguous until
/// `mappedIndexBegin` and sparse past it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StructureConfig", into = "StructureConfig")]
pub struct Structure {
    tubular: bool,
    prefix_ids: bool,
    unbump: bool,

    dimensions: u64,
    factor: u64,
    num_points_hint: u64,

    points_per_chunk: u64,
    nominal_chunk_depth: u64,

    null_depth_end: u64,
    base_depth_begin: u64,
    base_depth_end: u64,
    cold_depth_begin: u64,
    cold_depth_end: u64,
    sparse_depth_begin: u64,
    mapped_depth_begin: u64,
    start_depth: u64,
    bump_depth: u64,

    base_index_begin: Id,
    base_index_end: Id,
    cold_index_begin: Id,
    cold_index_end: Id,
    sparse_index_begin: Id,
    mapped_index_begin: Id,
}

/// Wire form of a `Structure`, with defaults for everything derivable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureConfig {
    pub null_depth: u64,
    pub base_depth: u64,
    pub cold_depth: u64,
    pub points_per_chunk: u64,
    pub dimensions: u64,
    pub num_points_hint: u64,
    pub tubular: bool,
    pub prefix_ids: bool,
    pub mapped_depth: u64,
    pub sparse_depth: u64,
    pub start_depth: u64,
    pub bump_depth: u64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        StructureConfig {
            null_depth: 6,
            base_depth: 10,
            cold_depth: 0,
            points_per_chunk: 262_144,
            dimensions: 2,
            num_points_hint: 0,
            tubular: true,
            prefix_ids: false,
            mapped_depth: 0,
            sparse_depth: 0,
            start_depth: 0,
            bump_depth: 0,
        }
    }
}

impl TryFrom<StructureConfig> for Structure {
    type Error = IndexError;
    fn try_from(c: StructureConfig) -> Result<Self, IndexError> {
        Structure::new(c)
    }
}

impl From<Structure> for StructureConfig {
    fn from(s: Structure) -> StructureConfig {
        let base_depth = if s.unbump && s.bump_depth != 0 {
            // Save as if the base depth end was never increased.
            s.bump_depth
        } else {
            s.base_depth_end
        };

        StructureConfig {
            null_depth: s.null_depth_end,
            base_depth,
            cold_depth: s.cold_depth_end,
            points_per_chunk: s.points_per_chunk,
            dimensions: s.dimensions,
            num_points_hint: s.num_points_hint,
            tubular: s.tubular,
            prefix_ids: s.prefix_ids,
            mapped_depth: s.mapped_depth_begin,
            sparse_depth: s.sparse_depth_begin,
            start_depth: s.start_depth,
            bump_depth: if s.unbump { 0 } else { s.bump_depth },
        }
    }
}

impl Structure {
    pub fn new(c: StructureConfig) -> Result<Structure, IndexError> {
        if c.dimensions != 2 && c.dimensions != 3 {
            return Err(IndexError::config("dimensions must be 2 or 3"));
        }
        if c.tubular && c.dimensions != 2 {
            return Err(IndexError::config("tubular traversal requires dimensions = 2"));
        }

        let dimensions = c.dimensions;
        let factor = 1u64 << dimensions;

        let null_depth_end = c.null_depth;
        let base_depth_begin = null_depth_end;
        let nominal_chunk_depth = if c.points_per_chunk != 0 {
            ChunkInfo::log_n(c.points_per_chunk, factor)
        } else {
            0
        };
        let base_depth_end = c.base_depth.max(nominal_chunk_depth);

        if base_depth_end <= base_depth_begin {
            return Err(IndexError::config("base depth band is empty"));
        }

        let cold_depth_begin = base_depth_end;
        let cold_depth_end = if c.cold_depth != 0 {
            c.cold_depth.max(cold_depth_begin)
        } else {
            0
        };

        let has_cold = cold_depth_end == 0 || cold_depth_end > cold_depth_begin;

        if has_cold && c.points_per_chunk == 0 {
            return Err(IndexError::config(
                "points per chunk not specified, but a cold depth was given",
            ));
        }

        if has_cold && !ChunkInfo::is_perfect_log_n(c.points_per_chunk, factor) {
            return Err(IndexError::config(
                "points per chunk must be a power of 4 for a quadtree or 8 for an octree",
            ));
        }

        let active_min_depth = if c.bump_depth != 0 {
            c.bump_depth
        } else {
            cold_depth_begin
        };
        let active_hint = c.num_points_hint.max(10_000_000);

        let mut mapped_depth_begin = if c.mapped_depth != 0 {
            c.mapped_depth
        } else {
            ((active_hint as f64).log2() / (factor as f64).log2()).ceil() as u64 + 1
        };
        mapped_depth_begin = mapped_depth_begin.max(active_min_depth);

        let sparse_depth_begin = c.sparse_depth.max(mapped_depth_begin);

        Ok(Structure {
            tubular: c.tubular,
            prefix_ids: c.prefix_ids,
            unbump: false,
            dimensions,
            factor,
            num_points_hint: c.num_points_hint,
            points_per_chunk: c.points_per_chunk,
            nominal_chunk_depth,
            null_depth_end,
            base_depth_begin,
            base_depth_end,
            cold_depth_begin,
            cold_depth_end,
            sparse_depth_begin,
            mapped_depth_begin,
            start_depth: c.start_depth,
            bump_depth: c.bump_depth,
            base_index_begin: ChunkInfo::calc_level_index(dimensions, base_depth_begin),
            base_index_end: ChunkInfo::calc_level_index(dimensions, base_depth_end),
            cold_index_begin: ChunkInfo::calc_level_index(dimensions, cold_depth_begin),
            cold_index_end: if cold_depth_end != 0 {
                ChunkInfo::calc_level_index(dimensions, cold_depth_end)
            } else {
                Id::zero()
            },
            sparse_index_begin: ChunkInfo::calc_level_index(dimensions, sparse_depth_begin),
            mapped_index_begin: ChunkInfo::calc_level_index(dimensions, mapped_depth_begin),
        })
    }

    pub fn dimensions(&self) -> u64 {
        self.dimensions
    }

    /// Tree fan-out: 4 for a quadtree, 8 for an octree.
    pub fn factor(&self) -> u64 {
        self.factor
    }

    pub fn tubular(&self) -> bool {
        self.tubular
    }

    pub fn num_points_hint(&self) -> u64 {
        self.num_points_hint
    }

    pub fn base_points_per_chunk(&self) -> u64 {
        self.points_per_chunk
    }

    pub fn nominal_chunk_depth(&self) -> u64 {
        self.nominal_chunk_depth
    }

    pub fn null_depth_end(&self) -> u64 {
        self.null_depth_end
    }

    pub fn base_depth_begin(&self) -> u64 {
        self.base_depth_begin
    }

    pub fn base_depth_end(&self) -> u64 {
        self.base_depth_end
    }

    pub fn cold_depth_begin(&self) -> u64 {
        self.cold_depth_begin
    }

    /// Exclusive cold depth bound; zero means unbounded.
    pub fn cold_depth_end(&self) -> u64 {
        self.cold_depth_end
    }

    pub fn sparse_depth_begin(&self) -> u64 {
        self.sparse_depth_begin
    }

    pub fn mapped_depth_begin(&self) -> u64 {
        self.mapped_depth_begin
    }

    pub fn start_depth(&self) -> u64 {
        self.start_depth
    }

    pub fn bump_depth(&self) -> u64 {
        self.bump_depth
    }

    pub fn base_index_begin(&self) -> &Id {
        &self.base_index_begin
    }

    pub fn base_index_end(&self) -> &Id {
        &self.base_index_end
    }

    pub fn base_index_span(&self) -> Id {
        &self.base_index_end - &self.base_index_begin
    }

    pub fn cold_index_begin(&self) -> &Id {
        &self.cold_index_begin
    }

    pub fn sparse_index_begin(&self) -> &Id {
        &self.sparse_index_begin
    }

    pub fn mapped_index_begin(&self) -> &Id {
        &self.mapped_index_begin
    }

    pub fn has_cold(&self) -> bool {
        self.cold_depth_end == 0 || self.cold_depth_end > self.cold_depth_begin
    }

    /// True when `depth` is below the last storable depth.
    pub fn in_range(&self, depth: u64) -> bool {
        if !self.has_cold() {
            depth < self.base_depth_end
        } else {
            self.cold_depth_end == 0 || depth < self.cold_depth_end
        }
    }

    pub fn unbump(&mut self) {
        self.unbump = true;
    }

    /// Storage key for a chunk id, optionally sharded into prefix
    /// directories for filename-limited stores.
    pub fn maybe_prefix(&self, id: &Id) -> String {
        if self.prefix_ids {
            let (_, bucket) = id.div_mod(256);
            format!("{bucket:02x}/{id}")
        } else {
            id.to_string()
        }
    }
}

/// Resolution of a point index to its owning chunk.
#[derive(Clone, Debug)]
pub struct ChunkInfo {
    pub chunk_id: Id,
    pub depth: u64,
    pub chunk_offset: Id,
    pub points_per_chunk: Id,
    /// Ordinal of the chunk across the whole cold band.
    pub chunk_num: Id,
}

impl ChunkInfo {
    pub fn new(s: &Structure, index: &Id) -> Result<ChunkInfo, IndexError> {
        if index < &s.cold_index_begin {
            return Err(IndexError::corrupt("index too shallow for chunk info"));
        }

        let depth = ChunkInfo::calc_depth(s.dimensions, index);
        let level_index = ChunkInfo::calc_level_index(s.dimensions, depth);
        let ppc = s.points_per_chunk;

        if level_index <= s.sparse_index_begin {
            let (num, offset) = (index - &s.cold_index_begin).div_mod(ppc);
            Ok(ChunkInfo {
                chunk_id: &s.cold_index_begin + &(&num * ppc),
                depth,
                chunk_offset: Id::new(offset),
                points_per_chunk: Id::new(ppc),
                chunk_num: num,
            })
        } else {
            // Chunk spans multiply by the factor at each sparse depth, so the
            // number of chunks per depth stays fixed.
            let sparse_depth_count = depth - s.sparse_depth_begin;
            let points_per_chunk =
                &Id::new(ppc) * &ChunkInfo::binary_pow(s.dimensions, sparse_depth_count);

            let level_offset = index - &level_index;
            let (num, offset) = level_offset.div_mod_id(&points_per_chunk);

            // Chunk ordinals continue across the dense band and every
            // shallower sparse depth.
            let sparse_first_span = ChunkInfo::points_at_depth(s.dimensions, s.sparse_depth_begin);
            let (chunks_per_sparse_depth, _) = sparse_first_span.div_mod(ppc);
            let (num_cold_chunks, _) =
                (&s.sparse_index_begin - &s.cold_index_begin).div_mod(ppc);
            let prev_levels =
                &num_cold_chunks + &(&chunks_per_sparse_depth * sparse_depth_count);

            Ok(ChunkInfo {
                chunk_id: &level_index + &(&num * &points_per_chunk),
                depth,
                chunk_offset: offset,
                points_per_chunk,
                chunk_num: &prev_levels + &num,
            })
        }
    }

    /// First index at `depth`: `(factor^depth - 1) / (factor - 1)`.
    pub fn calc_level_index(dimensions: u64, depth: u64) -> Id {
        let (q, _) = (&ChunkInfo::binary_pow(dimensions, depth) - 1).div_mod((1 << dimensions) - 1);
        q
    }

    /// Number of nodes at `depth`: `factor^depth`.
    pub fn points_at_depth(dimensions: u64, depth: u64) -> Id {
        ChunkInfo::binary_pow(dimensions, depth)
    }

    /// Depth containing `index`.
    pub fn calc_depth(dimensions: u64, index: &Id) -> u64 {
        let mut depth = 0;
        while &ChunkInfo::calc_level_index(dimensions, depth + 1) <= index {
            depth += 1;
        }
        depth
    }

    pub fn binary_pow(base_log2: u64, exp: u64) -> Id {
        &Id::new(1) << (exp * base_log2) as usize
    }

    pub fn log_n(val: u64, n: u64) -> u64 {
        debug_assert!(n == 4 || n == 8);
        (val as f64).log2() as u64 / (n as f64).log2() as u64
    }

    pub fn is_perfect_log_n(val: u64, n: u64) -> bool {
        let log = ChunkInfo::log_n(val, n);
        1u64 << (log * (n as f64).log2() as u64) == val
    }
}
