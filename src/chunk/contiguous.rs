use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::cell::{Cell, Insertion, Tube};
use crate::climber::Climber;
use crate::endpoint::Endpoint;
use crate::error::IndexError;
use crate::format::ChunkType;
use crate::id::Id;
use crate::metadata::Metadata;
use crate::pool::PointPool;

use super::ChunkCore;

/// A cold chunk with a dense tube array: one slot per cell offset, each
/// behind its own lock so concurrent workers contend only per slot.
pub struct ContiguousChunk {
    core: ChunkCore,
    tubes: Vec<Mutex<Tube>>,
    data: Mutex<Option<Vec<u8>>>,
}

impl ContiguousChunk {
    pub fn new(core: ChunkCore) -> Self {
        let slots = core.max_points().simple() as usize;
        ContiguousChunk {
            core,
            tubes: (0..slots).map(|_| Mutex::new(Tube::default())).collect(),
            data: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &ChunkCore {
        &self.core
    }

    pub fn id(&self) -> &Id {
        self.core.id()
    }

    /// One past the last cell offset this chunk owns.
    pub fn end_id(&self) -> Id {
        self.core.id() + self.core.max_points()
    }

    pub fn insert(&self, climber: &Climber, cell: Cell) -> Insertion {
        let offset = (climber.index() - self.core.id()).simple() as usize;
        debug_assert!(offset < self.tubes.len());
        debug_assert!(climber.tick() < 1 << self.core.z_depth());

        let mut tube = self.tubes[offset].lock().expect("tube poisoned");
        tube.insert_or_swap(climber.tick(), cell, climber.mid())
    }

    pub fn cell_count(&self) -> u64 {
        self.tubes
            .iter()
            .map(|t| t.lock().expect("tube poisoned").len() as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tubes
            .iter()
            .all(|t| t.lock().expect("tube poisoned").is_empty())
    }

    pub fn tick_counts(&self) -> BTreeMap<u64, u64> {
        let guards: Vec<_> = self
            .tubes
            .iter()
            .map(|t| t.lock().expect("tube poisoned"))
            .collect();
        super::tick_counts(guards.iter().map(|g| &**g))
    }

    /// Visit every stored cell without disturbing it.
    pub fn visit_cells(&self, mut f: impl FnMut(&Cell)) {
        for slot in &self.tubes {
            let guard = slot.lock().expect("tube poisoned");
            for (_, cell) in guard.iter() {
                f(cell);
            }
        }
    }

    /// Move every non-empty tube out, paired with its cell offset.
    pub fn drain_tubes(&self) -> Vec<(u64, Tube)> {
        let mut out = Vec::new();
        for (i, slot) in self.tubes.iter().enumerate() {
            let mut guard = slot.lock().expect("tube poisoned");
            if !guard.is_empty() {
                out.push((i as u64, std::mem::take(&mut *guard)));
            }
        }
        out
    }

    /// Install a whole tube at an offset; the slot must be empty. Used when
    /// merged base pieces promote into a standalone cold chunk.
    pub fn adopt_tube(&self, offset: u64, tube: Tube) {
        let mut guard = self.tubes[offset as usize].lock().expect("tube poisoned");
        debug_assert!(guard.is_empty());
        *guard = tube;
    }

    pub(super) fn collect(
        &self,
        metadata: &Metadata,
        pool: &PointPool,
        out: &Endpoint,
        chunk_type: ChunkType,
    ) -> Result<(), IndexError> {
        let mut data = self.data.lock().expect("chunk data poisoned");
        if data.is_some() {
            return Ok(());
        }

        if metadata.cesium().is_some() {
            let info = super::tick_counts_info(self.core(), self.tick_counts());
            info.save(&out.sub_endpoint("cesium"))?;
        }

        let mut data_stack = pool.data_pool().stack();
        let mut cell_stack = pool.cell_pool().stack();

        for (_, mut tube) in self.drain_tubes() {
            for (_, mut cell) in tube.drain() {
                for node in cell.acquire_data() {
                    data_stack.push(node);
                }
                cell_stack.push(cell);
            }
        }

        *data = Some(metadata.format().pack(data_stack, chunk_type)?);
        Ok(())
    }

    pub(super) fn take_data(&self) -> Option<Vec<u8>> {
        self.data.lock().expect("chunk data poisoned").take()
    }
}
