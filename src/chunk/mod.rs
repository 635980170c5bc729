pub mod base;
pub mod contiguous;
pub mod sparse;

pub use base::BaseChunk;
pub use contiguous::ContiguousChunk;
pub use sparse::SparseChunk;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bounds::Bounds;
use crate::cell::{Cell, Insertion, Tube};
use crate::cesium::TileInfo;
use crate::climber::Climber;
use crate::endpoint::{ensure_put, Endpoint};
use crate::error::IndexError;
use crate::format::ChunkType;
use crate::id::Id;
use crate::metadata::Metadata;
use crate::pool::PointPool;
use crate::structure::ChunkInfo;

// Observability only: the number of live cold chunk objects in the process.
// Never consulted for control flow.
static CHUNK_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Number of live cold chunks. Returns to zero after a clean build; the
/// single base chunk is tracked separately.
pub fn live_count() -> usize {
    CHUNK_COUNT.load(Ordering::Relaxed)
}

/// Fields shared by every chunk variant.
pub struct ChunkCore {
    id: Id,
    depth: u64,
    z_depth: u64,
    bounds: Bounds,
    max_points: Id,
    counted: bool,
}

impl ChunkCore {
    pub fn new(id: Id, depth: u64, bounds: Bounds, max_points: Id, counted: bool) -> Self {
        if counted {
            CHUNK_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        ChunkCore {
            id,
            depth,
            z_depth: depth.min(Tube::MAX_TICK_DEPTH),
            bounds,
            max_points,
            counted,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Bits of z subdivision in this chunk's ticks; every stored tick is
    /// below `2^z_depth`.
    pub fn z_depth(&self) -> u64 {
        self.z_depth
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn max_points(&self) -> &Id {
        &self.max_points
    }
}

impl Drop for ChunkCore {
    fn drop(&mut self) {
        if self.counted {
            CHUNK_COUNT.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// A cold chunk: contiguous below the mapped index, sparse past it.
pub enum ColdChunk {
    Contiguous(ContiguousChunk),
    Sparse(SparseChunk),
}

impl ColdChunk {
    /// Create an empty cold chunk for the resolved chunk placement.
    pub fn create(metadata: &Metadata, info: &ChunkInfo) -> ColdChunk {
        let core = ChunkCore::new(
            info.chunk_id.clone(),
            info.depth,
            *metadata.bounds(),
            info.points_per_chunk.clone(),
            true,
        );

        if &info.chunk_id < metadata.structure().mapped_index_begin() {
            ColdChunk::Contiguous(ContiguousChunk::new(core))
        } else {
            ColdChunk::Sparse(SparseChunk::new(core))
        }
    }

    /// Rehydrate a chunk from its stored blob. The blob's own tail decides
    /// the variant; the tube contents come back exactly as packed.
    pub fn from_data(
        metadata: &Metadata,
        info: &ChunkInfo,
        pool: &PointPool,
        data: Vec<u8>,
    ) -> Result<ColdChunk, IndexError> {
        let unpacker = metadata.format().unpack(data)?;

        let chunk = match unpacker.chunk_type() {
            ChunkType::Contiguous => ColdChunk::Contiguous(ContiguousChunk::new(ChunkCore::new(
                info.chunk_id.clone(),
                info.depth,
                *metadata.bounds(),
                info.points_per_chunk.clone(),
                true,
            ))),
            ChunkType::Sparse => ColdChunk::Sparse(SparseChunk::new(ChunkCore::new(
                info.chunk_id.clone(),
                info.depth,
                *metadata.bounds(),
                info.points_per_chunk.clone(),
                true,
            ))),
            ChunkType::Invalid => {
                return Err(IndexError::corrupt(format!(
                    "chunk {} has no stored type",
                    info.chunk_id
                )))
            }
        };

        let cells = unpacker.acquire_cells(pool)?;
        chunk.populate(metadata, cells)?;
        Ok(chunk)
    }

    fn populate(&self, metadata: &Metadata, mut cells: crate::pool::CellStack) -> Result<(), IndexError> {
        let mut climber = Climber::new(metadata.structure(), *metadata.bounds());

        while let Some(cell) = cells.pop() {
            climber.reset();
            climber.magnify_to(cell.point(), self.depth());

            match self.insert(&climber, cell) {
                Insertion::Done => {}
                Insertion::Descend(_) => {
                    return Err(IndexError::corrupt(format!(
                        "stored chunk {} contains colliding cells",
                        self.id()
                    )))
                }
            }
        }

        Ok(())
    }

    pub fn id(&self) -> &Id {
        match self {
            ColdChunk::Contiguous(c) => c.core().id(),
            ColdChunk::Sparse(c) => c.core().id(),
        }
    }

    pub fn depth(&self) -> u64 {
        match self {
            ColdChunk::Contiguous(c) => c.core().depth(),
            ColdChunk::Sparse(c) => c.core().depth(),
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        match self {
            ColdChunk::Contiguous(_) => ChunkType::Contiguous,
            ColdChunk::Sparse(_) => ChunkType::Sparse,
        }
    }

    /// Insert a cell at the climber's position, under per-tube locking.
    pub fn insert(&self, climber: &Climber, cell: Cell) -> Insertion {
        match self {
            ColdChunk::Contiguous(c) => c.insert(climber, cell),
            ColdChunk::Sparse(c) => c.insert(climber, cell),
        }
    }

    pub fn cell_count(&self) -> u64 {
        match self {
            ColdChunk::Contiguous(c) => c.cell_count(),
            ColdChunk::Sparse(c) => c.cell_count(),
        }
    }

    /// Per-tick point counts for the visualization summary.
    pub fn info(&self) -> TileInfo {
        match self {
            ColdChunk::Contiguous(c) => tick_counts_info(c.core(), c.tick_counts()),
            ColdChunk::Sparse(c) => tick_counts_info(c.core(), c.tick_counts()),
        }
    }

    /// Drain the live tubes and pack them into the chunk's byte payload.
    /// Idempotent: once packed, further calls are no-ops. Cell headers and
    /// data nodes return to the pool.
    pub fn collect(
        &self,
        metadata: &Metadata,
        pool: &PointPool,
        out: &Endpoint,
    ) -> Result<(), IndexError> {
        match self {
            ColdChunk::Contiguous(c) => c.collect(metadata, pool, out, ChunkType::Contiguous),
            ColdChunk::Sparse(c) => c.collect(metadata, pool, out, ChunkType::Sparse),
        }
    }

    /// Write the packed payload to the output endpoint. Requires a prior
    /// `collect`; consumes the payload so a chunk never writes twice.
    pub fn save(&self, metadata: &Metadata, out: &Endpoint) -> Result<(), IndexError> {
        let data = match self {
            ColdChunk::Contiguous(c) => c.take_data(),
            ColdChunk::Sparse(c) => c.take_data(),
        };

        let Some(data) = data else {
            return Err(IndexError::corrupt(format!(
                "chunk {} saved without collect",
                self.id()
            )));
        };

        let path = format!(
            "{}{}",
            metadata.structure().maybe_prefix(self.id()),
            metadata.postfix_for(true)
        );
        ensure_put(out, &path, &data)?;
        Ok(())
    }
}

/// Tick histogram over a set of tubes; shared by the variants' summaries.
pub(crate) fn tick_counts<'a>(
    tubes: impl Iterator<Item = &'a Tube>,
) -> std::collections::BTreeMap<u64, u64> {
    let mut out = std::collections::BTreeMap::new();
    for tube in tubes {
        for (tick, cell) in tube.iter() {
            *out.entry(*tick).or_insert(0) += cell.size() as u64;
        }
    }
    out
}

pub(crate) fn tick_counts_info(
    core: &ChunkCore,
    ticks: std::collections::BTreeMap<u64, u64>,
) -> TileInfo {
    TileInfo::new(core.id(), core.depth(), ticks, *core.bounds())
}
