use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::cell::{Cell, Insertion, Tube};
use crate::climber::Climber;
use crate::endpoint::Endpoint;
use crate::error::IndexError;
use crate::format::ChunkType;
use crate::id::Id;
use crate::metadata::Metadata;
use crate::pool::PointPool;

use super::ChunkCore;

/// A cold chunk deep enough that most cell offsets stay empty: tubes live
/// in a map keyed by offset. The map lock is held only long enough to grab
/// a stable tube handle; mutation happens under the tube's own lock.
pub struct SparseChunk {
    core: ChunkCore,
    tubes: Mutex<HashMap<Id, Arc<Mutex<Tube>>>>,
    data: Mutex<Option<Vec<u8>>>,
}

impl SparseChunk {
    pub fn new(core: ChunkCore) -> Self {
        SparseChunk {
            core,
            tubes: Mutex::new(HashMap::new()),
            data: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &ChunkCore {
        &self.core
    }

    pub fn id(&self) -> &Id {
        self.core.id()
    }

    pub fn insert(&self, climber: &Climber, cell: Cell) -> Insertion {
        let offset = climber.index() - self.core.id();
        debug_assert!(climber.tick() < 1 << self.core.z_depth());

        let tube = {
            let mut map = self.tubes.lock().expect("sparse map poisoned");
            Arc::clone(map.entry(offset).or_default())
        };

        let mut tube = tube.lock().expect("tube poisoned");
        tube.insert_or_swap(climber.tick(), cell, climber.mid())
    }

    pub fn cell_count(&self) -> u64 {
        let map = self.tubes.lock().expect("sparse map poisoned");
        map.values()
            .map(|t| t.lock().expect("tube poisoned").len() as u64)
            .sum()
    }

    pub fn tick_counts(&self) -> BTreeMap<u64, u64> {
        let map = self.tubes.lock().expect("sparse map poisoned");
        let guards: Vec<_> = map
            .values()
            .map(|t| t.lock().expect("tube poisoned"))
            .collect();
        super::tick_counts(guards.iter().map(|g| &**g))
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

        let drained: Vec<Arc<Mutex<Tube>>> = {
            let mut map = self.tubes.lock().expect("sparse map poisoned");
            map.drain().map(|(_, tube)| tube).collect()
        };

        for tube in drained {
            let mut tube = tube.lock().expect("tube poisoned");
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
