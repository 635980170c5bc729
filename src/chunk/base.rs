use tracing::debug;

use crate::bounds::Bounds;
use crate::cell::{Cell, Insertion};
use crate::cesium::TileInfo;
use crate::climber::Climber;
use crate::compression;
use crate::endpoint::{ensure_put, Endpoint};
use crate::error::IndexError;
use crate::format::{ChunkType, Format};
use crate::id::Id;
use crate::metadata::Metadata;
use crate::pool::PointPool;
use crate::structure::ChunkInfo;

use super::{ChunkCore, ColdChunk, ContiguousChunk};

/// The root chunk: one contiguous piece per depth across the base band,
/// addressed as a single unit of persistence.
///
/// Serialization flattens every record behind a 64-bit `TubeId` prefix (the
/// celled schema) so the stream deserializes back into depth and offset
/// positions. After subset merges a depth may hold several adjacent pieces;
/// they serialize in id order, indistinguishable from a whole build.
pub struct BaseChunk {
    id: Id,
    bounds: Bounds,
    depths: Vec<Vec<ContiguousChunk>>,
}

impl BaseChunk {
    pub fn new(metadata: &Metadata) -> Result<BaseChunk, IndexError> {
        let s = metadata.structure();
        let dims = s.dimensions();
        let bounds = *metadata.bounds();
        let mut depths = Vec::with_capacity(s.base_depth_end() as usize);

        let spans = match metadata.subset() {
            Some(subset) => Some(subset.calc_spans(s)?),
            None => None,
        };

        for d in 0..s.base_depth_end() {
            // Depths above the base begin get zero-width pieces; they go
            // unused but keep depth indexing uniform.
            let (begin, width) = if d < s.base_depth_begin() {
                (ChunkInfo::calc_level_index(dims, d), Id::zero())
            } else {
                match &spans {
                    Some(spans) => (spans[d as usize].begin.clone(), spans[d as usize].width()),
                    None => (
                        ChunkInfo::calc_level_index(dims, d),
                        ChunkInfo::points_at_depth(dims, d),
                    ),
                }
            };

            depths.push(vec![ContiguousChunk::new(ChunkCore::new(
                begin, d, bounds, width, false,
            ))]);
        }

        Ok(BaseChunk {
            id: s.base_index_begin().clone(),
            bounds,
            depths,
        })
    }

    /// Rebuild a base chunk from its stored celled stream, validating every
    /// record's `TubeId` against a fresh climb.
    pub fn from_data(
        metadata: &Metadata,
        pool: &PointPool,
        data: Vec<u8>,
    ) -> Result<BaseChunk, IndexError> {
        let base = BaseChunk::new(metadata)?;
        let s = metadata.structure();

        let celled_schema = metadata.schema().celled();
        let celled_size = celled_schema.point_size();
        let celled = metadata.format().with_schema(celled_schema);

        let unpacker = celled.unpack(data)?;
        if unpacker.chunk_type() != ChunkType::Contiguous {
            return Err(IndexError::corrupt("base chunk stored with wrong type"));
        }
        let num_points = unpacker.num_points() as usize;
        let raw = unpacker.acquire_raw_bytes()?;

        if raw.len() != num_points * celled_size {
            return Err(IndexError::corrupt(format!(
                "base payload is {} bytes, expected {}",
                raw.len(),
                num_points * celled_size
            )));
        }

        let mut data_stack = pool.data_pool().acquire(num_points);
        let mut cell_stack = pool.cell_pool().acquire(num_points);
        let mut climber = Climber::new(s, base.bounds);

        for record in raw.chunks_exact(celled_size) {
            let tube_id = u64::from_le_bytes(record[0..8].try_into().unwrap());
            let native = &record[8..];

            let mut node = data_stack.pop().expect("stack sized to num_points");
            node.copy_from_slice(native);
            let point = crate::format::read_point(native);

            let mut cell = cell_stack.pop().expect("stack sized to num_points");
            cell.set(point, node);

            let index = &base.id + tube_id;
            let depth = ChunkInfo::calc_depth(s.dimensions(), &index);
            if depth < s.base_depth_begin() || depth >= s.base_depth_end() {
                return Err(IndexError::corrupt("bad serialized base tube"));
            }

            climber.reset();
            climber.magnify_to(point, depth);

            if (climber.index() - &base.id).simple() != tube_id {
                return Err(IndexError::corrupt("bad serialized base tube"));
            }

            base.insert_strict(&climber, cell)?;
        }

        Ok(base)
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    fn piece_for(&self, depth: u64, index: &Id) -> Option<&ContiguousChunk> {
        self.depths
            .get(depth as usize)?
            .iter()
            .find(|p| p.id() <= index && index < &p.end_id())
    }

    /// Insert at the climber's depth; per-tube locks make this safe from
    /// any worker thread.
    pub fn insert(&self, climber: &Climber, cell: Cell) -> Insertion {
        let piece = self
            .piece_for(climber.depth(), climber.index())
            .expect("climber outside base span");
        piece.insert(climber, cell)
    }

    fn insert_strict(&self, climber: &Climber, cell: Cell) -> Result<(), IndexError> {
        let Some(piece) = self.piece_for(climber.depth(), climber.index()) else {
            return Err(IndexError::corrupt("serialized base tube outside span"));
        };
        match piece.insert(climber, cell) {
            Insertion::Done => Ok(()),
            Insertion::Descend(_) => Err(IndexError::corrupt(
                "stored base chunk contains colliding cells",
            )),
        }
    }

    pub fn cell_count(&self) -> u64 {
        self.depths
            .iter()
            .flatten()
            .map(ContiguousChunk::cell_count)
            .sum()
    }

    pub fn cells_at_depth(&self, depth: u64) -> u64 {
        self.depths[depth as usize]
            .iter()
            .map(ContiguousChunk::cell_count)
            .sum()
    }

    /// Copies of every stored record, for inspection.
    pub fn collect_records(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for piece in self.depths.iter().flatten() {
            piece.visit_cells(|cell| {
                for record in cell.data() {
                    out.push(record.to_vec());
                }
            });
        }
        out
    }

    /// Every stored cell's representative point, for inspection.
    pub fn collect_points(&self) -> Vec<crate::bounds::Point> {
        let mut out = Vec::new();
        for piece in self.depths.iter().flatten() {
            piece.visit_cells(|cell| out.push(cell.point()));
        }
        out
    }

    /// Per-depth visualization summaries.
    pub fn base_info(&self, metadata: &Metadata) -> Vec<TileInfo> {
        let s = metadata.structure();
        (s.base_depth_begin()..s.base_depth_end())
            .map(|d| {
                let mut ticks = std::collections::BTreeMap::new();
                for piece in &self.depths[d as usize] {
                    for (tick, n) in piece.tick_counts() {
                        *ticks.entry(tick).or_insert(0) += n;
                    }
                }
                TileInfo::new(self.depths[d as usize][0].id(), d, ticks, self.bounds)
            })
            .collect()
    }

    /// Drain and serialize the whole base: `TubeId || record` per point,
    /// optionally compressed, tail appended, put at the base id with the
    /// metadata postfix (no id prefixing on the base).
    pub fn save(
        &self,
        metadata: &Metadata,
        pool: &PointPool,
        endpoint: &Endpoint,
    ) -> Result<(), IndexError> {
        if metadata.cesium().is_some() {
            let cesium = endpoint.sub_endpoint("cesium");
            for info in self.base_info(metadata) {
                info.save(&cesium)?;
            }
        }

        let s = metadata.structure();
        let native_size = metadata.schema().point_size();
        let base_id = self.id.simple();

        let mut stream = Vec::new();
        let mut num_points: u64 = 0;

        let mut data_stack = pool.data_pool().stack();
        let mut cell_stack = pool.cell_pool().stack();

        for d in s.base_depth_begin()..s.base_depth_end() {
            for piece in &self.depths[d as usize] {
                let piece_id = piece.id().simple();
                for (tube_index, mut tube) in piece.drain_tubes() {
                    let tube_id = piece_id + tube_index - base_id;
                    for (_, mut cell) in tube.drain() {
                        for node in cell.acquire_data() {
                            debug_assert_eq!(node.len(), native_size);
                            stream.extend_from_slice(&tube_id.to_le_bytes());
                            stream.extend_from_slice(&node);
                            num_points += 1;
                            data_stack.push(node);
                        }
                        cell_stack.push(cell);
                    }
                }
            }
        }

        let mut body = if metadata.format().compress() {
            compression::compress(&stream)?
        } else {
            stream
        };

        let celled: Format = metadata.format().with_schema(metadata.schema().celled());
        let tail = celled.build_tail(num_points, body.len() as u64, ChunkType::Contiguous);
        body.extend_from_slice(&tail);

        let path = format!("{}{}", self.id, metadata.postfix());
        debug!(path = %path, num_points, "saving base chunk");
        ensure_put(endpoint, &path, &body)?;

        Ok(())
    }

    /// Fold another subset's base into this one, depth by depth. The next
    /// piece at each depth must start exactly where the accumulated span
    /// ends. At and past the bump depth, a depth whose accumulated span
    /// reaches the chunk size promotes into a standalone cold chunk;
    /// returns the promoted ids.
    pub fn merge(
        &mut self,
        mut other: BaseChunk,
        metadata: &Metadata,
        pool: &PointPool,
        endpoint: &Endpoint,
    ) -> Result<Vec<Id>, IndexError> {
        let s = metadata.structure();
        let ppc = s.base_points_per_chunk();
        let mut promoted = Vec::new();

        for d in s.base_depth_begin()..s.base_depth_end() {
            let mut adding = std::mem::take(&mut other.depths[d as usize]);
            let writes = &mut self.depths[d as usize];

            for piece in adding.drain(..) {
                if let Some(last) = writes.last() {
                    if last.end_id() != *piece.id() {
                        return Err(IndexError::Merge(format!(
                            "merges must be performed consecutively: depth {d} ends at {} but the next subset begins at {}",
                            last.end_id(),
                            piece.id()
                        )));
                    }
                }
                writes.push(piece);
            }

            if s.bump_depth() == 0 || d < s.bump_depth() {
                continue;
            }

            // Promote every whole chunk-sized span accumulated at the
            // front; partial spans wait for the next subset.
            loop {
                let mut width = Id::zero();
                let mut take = 0;
                for piece in writes.iter() {
                    width += &(&piece.end_id() - piece.id());
                    take += 1;
                    if width >= ppc {
                        break;
                    }
                }

                if width < ppc || take == 0 {
                    break;
                }
                if width != ppc {
                    return Err(IndexError::Merge(format!(
                        "bumped depth {d} accumulates {width} cells across a \
                         {ppc}-cell chunk boundary"
                    )));
                }

                let chunk_id = writes.first().expect("non-empty span").id().clone();
                let chunk = ContiguousChunk::new(ChunkCore::new(
                    chunk_id.clone(),
                    d,
                    self.bounds,
                    Id::new(ppc),
                    true,
                ));

                for piece in writes.drain(..take) {
                    let piece_offset = (piece.id() - &chunk_id).simple();
                    for (tube_index, tube) in piece.drain_tubes() {
                        chunk.adopt_tube(piece_offset + tube_index, tube);
                    }
                }

                if !chunk.is_empty() {
                    let cold = ColdChunk::Contiguous(chunk);
                    cold.collect(metadata, pool, endpoint)?;
                    cold.save(metadata, endpoint)?;
                    promoted.push(chunk_id);
                }
            }
        }

        Ok(promoted)
    }
}
