use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cell::Insertion;
use crate::chunk::{BaseChunk, ColdChunk};
use crate::climber::Climber;
use crate::endpoint::ensure_get;
use crate::error::IndexError;
use crate::id::Id;
use crate::structure::ChunkInfo;
use crate::threads::PoolHandle;

use super::BuildContext;

/// Per-worker insert count between chunk-cache flushes; flushing releases
/// the worker's references so cold chunks become evictable.
pub const SLEEP_COUNT: u64 = 65_536 * 20;

/// Live cold chunks tolerated before the least-recently-touched ones are
/// scheduled for eviction.
pub const DEFAULT_WATERMARK: usize = 64;

const STATE_LIVE: u8 = 0;
const STATE_QUEUED: u8 = 1;
const STATE_PACKING: u8 = 2;

/// A registered cold chunk plus its eviction bookkeeping.
pub struct Slot {
    chunk: ColdChunk,
    state: AtomicU8,
    touched: AtomicU64,
}

impl Slot {
    fn new(chunk: ColdChunk, tick: u64) -> Slot {
        Slot {
            chunk,
            state: AtomicU8::new(STATE_LIVE),
            touched: AtomicU64::new(tick),
        }
    }

    pub fn chunk(&self) -> &ColdChunk {
        &self.chunk
    }
}

/// The live working set: the base chunk plus the cold chunks currently in
/// memory. Lookup, lazy creation or reload, and watermark eviction all pass
/// through the registry mutex; chunk contents stay behind each chunk's own
/// locks.
pub struct Registry {
    base: BaseChunk,
    cold: Mutex<HashMap<Id, Arc<Slot>>>,
    tick: AtomicU64,
    watermark: usize,
}

impl Registry {
    pub fn new(base: BaseChunk, watermark: usize) -> Registry {
        Registry {
            base,
            cold: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            watermark,
        }
    }

    pub fn base(&self) -> &BaseChunk {
        &self.base
    }

    pub fn live_cold(&self) -> usize {
        self.cold.lock().expect("registry poisoned").len()
    }

    fn touch(&self, slot: &Slot) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        slot.touched.store(tick, Ordering::Relaxed);
    }

    /// Route one cell to its chunk, cascading displaced cells one depth
    /// deeper until every cell rests or escapes past the storable depths.
    /// Returns false when the cell overflowed (the caller counts it); its
    /// pool nodes are recycled here.
    pub fn add_point(
        &self,
        ctx: &Arc<BuildContext>,
        cache: &mut ChunkCache,
        climber: &mut Climber,
        mut cell: crate::cell::Cell,
    ) -> Result<bool, IndexError> {
        let structure = ctx.metadata.structure();

        loop {
            let insertion = if climber.depth() < structure.cold_depth_begin() {
                self.base.insert(climber, cell)
            } else {
                let slot = cache.get(self, ctx, climber)?;
                slot.chunk.insert(climber, cell)
            };

            match insertion {
                Insertion::Done => {
                    ctx.hierarchy.count(climber.index(), climber.depth());
                    return Ok(true);
                }
                Insertion::Descend(displaced) => {
                    let next = climber.depth() + 1;
                    if !structure.in_range(next) {
                        recycle(ctx, displaced);
                        return Ok(false);
                    }
                    let point = displaced.point();
                    climber.reset();
                    climber.magnify_to(point, next);
                    cell = displaced;
                }
            }
        }
    }

    /// Resolve the slot owning a chunk placement: a live entry, a rescue of
    /// a queued eviction, a reload from storage, or a fresh empty chunk.
    pub fn chunk_at(
        &self,
        ctx: &Arc<BuildContext>,
        info: &ChunkInfo,
    ) -> Result<Arc<Slot>, IndexError> {
        loop {
            {
                let mut map = self.cold.lock().expect("registry poisoned");
                if let Some(slot) = map.get(&info.chunk_id) {
                    match slot.state.compare_exchange(
                        STATE_QUEUED,
                        STATE_LIVE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        // Live, or rescued from the eviction queue.
                        Ok(_) | Err(STATE_LIVE) => {
                            let slot = Arc::clone(slot);
                            self.touch(&slot);
                            return Ok(slot);
                        }
                        // Mid-pack; wait for the clip worker to finish and
                        // reload from storage.
                        Err(_) => {}
                    }
                } else {
                    let chunk = self.open_chunk(ctx, info)?;
                    let slot = Arc::new(Slot::new(chunk, self.tick.fetch_add(1, Ordering::Relaxed)));
                    map.insert(info.chunk_id.clone(), Arc::clone(&slot));
                    return Ok(slot);
                }
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn open_chunk(
        &self,
        ctx: &Arc<BuildContext>,
        info: &ChunkInfo,
    ) -> Result<ColdChunk, IndexError> {
        let path = format!(
            "{}{}",
            ctx.metadata.structure().maybe_prefix(&info.chunk_id),
            ctx.metadata.postfix_for(true)
        );

        if ctx.out.exists(&path) {
            debug!(chunk = %info.chunk_id, "reloading evicted chunk");
            let blob = ensure_get(&ctx.out, &path)?;
            ColdChunk::from_data(&ctx.metadata, info, &ctx.pool, blob.to_vec())
        } else {
            Ok(ColdChunk::create(&ctx.metadata, info))
        }
    }

    /// Queue the least-recently-touched, unreferenced chunks onto the clip
    /// pool when the working set exceeds the watermark.
    ///
    /// The LIVE to QUEUED transition happens under the registry mutex while
    /// the refcount is provably one, so no worker can be mid-insert on a
    /// queued chunk: any later acquisition goes through the mutex and either
    /// rescues the slot or waits out the pack.
    pub fn clip_excess(&self, ctx: &Arc<BuildContext>, clip: &PoolHandle) {
        let victims: Vec<(Id, Arc<Slot>)> = {
            let map = self.cold.lock().expect("registry poisoned");
            if map.len() <= self.watermark {
                return;
            }

            let mut candidates: Vec<(&Id, &Arc<Slot>)> = map
                .iter()
                .filter(|(_, slot)| {
                    Arc::strong_count(slot) == 1
                        && slot.state.load(Ordering::Acquire) == STATE_LIVE
                })
                .collect();
            candidates.sort_by_key(|(_, slot)| slot.touched.load(Ordering::Relaxed));

            let excess = map.len() - self.watermark;
            candidates
                .into_iter()
                .take(excess)
                .filter(|(_, slot)| {
                    slot.state
                        .compare_exchange(
                            STATE_LIVE,
                            STATE_QUEUED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                })
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        for (id, slot) in victims {
            let ctx = Arc::clone(ctx);
            clip.add(move || {
                if slot
                    .state
                    .compare_exchange(
                        STATE_QUEUED,
                        STATE_PACKING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    // Rescued by a worker before we got to it.
                    return;
                }

                let result = slot
                    .chunk
                    .collect(&ctx.metadata, &ctx.pool, &ctx.out)
                    .and_then(|()| slot.chunk.save(&ctx.metadata, &ctx.out));

                if let Err(e) = result {
                    warn!(chunk = %id, "failed to clip chunk: {e}");
                    ctx.record_error(format!("chunk {id}: {e}"));
                }

                ctx.registry()
                    .cold
                    .lock()
                    .expect("registry poisoned")
                    .remove(&id);
            });
        }
    }

    /// Synchronously pack and write every remaining cold chunk. Both pools
    /// must be drained first.
    pub fn drain(&self, ctx: &Arc<BuildContext>) -> Result<(), IndexError> {
        let slots: Vec<(Id, Arc<Slot>)> = {
            let mut map = self.cold.lock().expect("registry poisoned");
            map.drain().collect()
        };

        for (_, slot) in slots {
            slot.chunk.collect(&ctx.metadata, &ctx.pool, &ctx.out)?;
            slot.chunk.save(&ctx.metadata, &ctx.out)?;
        }

        Ok(())
    }
}

fn recycle(ctx: &Arc<BuildContext>, mut cell: crate::cell::Cell) {
    let mut data = ctx.pool.data_pool().stack();
    for node in cell.acquire_data() {
        data.push(node);
    }
    let mut cells = ctx.pool.cell_pool().stack();
    cells.push(cell);
}

/// Worker-local handles into the registry. Holding a slot's `Arc` keeps it
/// off the eviction list; the cache flushes periodically so long-idle
/// chunks can leave memory.
pub struct ChunkCache {
    slots: HashMap<Id, Arc<Slot>>,
    inserts: u64,
}

impl ChunkCache {
    pub fn new() -> ChunkCache {
        ChunkCache {
            slots: HashMap::new(),
            inserts: 0,
        }
    }

    fn get(
        &mut self,
        registry: &Registry,
        ctx: &Arc<BuildContext>,
        climber: &Climber,
    ) -> Result<Arc<Slot>, IndexError> {
        self.inserts += 1;
        if self.inserts % SLEEP_COUNT == 0 {
            self.slots.clear();
        }

        let info = ChunkInfo::new(ctx.metadata.structure(), climber.index())?;
        if let Some(slot) = self.slots.get(&info.chunk_id) {
            registry.touch(slot);
            return Ok(Arc::clone(slot));
        }

        let slot = registry.chunk_at(ctx, &info)?;
        self.slots.insert(info.chunk_id, Arc::clone(&slot));
        Ok(slot)
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        ChunkCache::new()
    }
}
