pub mod merge;
pub mod registry;
pub mod sequence;

pub use merge::merge;
pub use registry::{ChunkCache, Registry};

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::chunk::BaseChunk;
use crate::climber::Climber;
use crate::endpoint::{ensure_get, Endpoint};
use crate::error::IndexError;
use crate::executor::Executor;
use crate::hierarchy::Hierarchy;
use crate::manifest::{FileStatus, Manifest, Origin, PointStats};
use crate::metadata::{Metadata, MetadataConfig};
use crate::pool::{CellStack, PointPool};
use crate::table::PooledPointTable;
use crate::threads::{PoolHandle, ThreadPools};

use registry::DEFAULT_WATERMARK;
use sequence::Sequence;

/// Shared state visible to worker and clip jobs. The builder owns it via
/// `Arc`; chunks and jobs hold non-owning handles through it rather than
/// back-references to the builder.
pub struct BuildContext {
    pub metadata: Metadata,
    pub pool: PointPool,
    pub out: Endpoint,
    pub tmp: Endpoint,
    pub input: Endpoint,
    pub hierarchy: Hierarchy,
    pub manifest: Mutex<Manifest>,
    pub errors: Mutex<Vec<String>>,
    pub srs: Mutex<String>,
    pub registry: Registry,
}

impl BuildContext {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_error(&self, message: String) {
        self.errors.lock().expect("errors poisoned").push(message);
    }
}

/// Drives a build: reads the manifest, streams each file through the
/// insertion pipeline on the work pool, evicts cold chunks through the clip
/// pool, and serializes everything on completion.
pub struct Builder {
    ctx: Arc<BuildContext>,
    pools: ThreadPools,
    sequence: Mutex<Sequence>,
    is_continuation: bool,
}

impl Builder {
    /// Start or resume a build at `out`. With existing metadata present and
    /// `force` unset, the build continues: manifest statuses carry over and
    /// the base chunk reloads from storage.
    pub fn create(
        config: MetadataConfig,
        out: Endpoint,
        tmp: Endpoint,
        threads: usize,
        force: bool,
    ) -> Result<Builder, IndexError> {
        let subset_id = config.subset.as_ref().map(|s| s.id());

        let existing = if force {
            None
        } else {
            Metadata::load(&out, subset_id).ok()
        };

        let (metadata, manifest, errors, is_continuation) = match existing {
            Some((metadata, manifest, errors)) => (metadata, manifest, errors, true),
            None => {
                let (metadata, manifest) = Metadata::new(config)?;
                (metadata, manifest, Vec::new(), false)
            }
        };

        if is_continuation {
            info!("continuing existing build");
        }

        let pool = PointPool::new(metadata.schema().clone(), metadata.delta().copied());

        let base_path = format!("{}{}", metadata.structure().base_index_begin(), metadata.postfix());
        let base = if is_continuation && out.exists(&base_path) {
            let blob = ensure_get(&out, &base_path)?;
            BaseChunk::from_data(&metadata, &pool, blob.to_vec())?
        } else {
            BaseChunk::new(&metadata)?
        };

        let hierarchy = Hierarchy::new(&metadata);
        if is_continuation {
            hierarchy.load(
                &out,
                metadata.format().compress_hierarchy(),
                &metadata.postfix(),
            )?;
        }

        let sequence = Sequence::new(&manifest);
        let srs = metadata.format().srs().to_string();

        let ctx = Arc::new(BuildContext {
            metadata,
            pool,
            out,
            tmp,
            input: Endpoint::fs(""),
            hierarchy,
            manifest: Mutex::new(manifest),
            errors: Mutex::new(errors),
            srs: Mutex::new(srs),
            registry: Registry::new(base, DEFAULT_WATERMARK),
        });

        Ok(Builder {
            ctx,
            pools: ThreadPools::new(threads),
            sequence: Mutex::new(sequence),
            is_continuation,
        })
    }

    pub fn is_continuation(&self) -> bool {
        self.is_continuation
    }

    pub fn metadata(&self) -> &Metadata {
        &self.ctx.metadata
    }

    pub fn point_stats(&self) -> PointStats {
        *self.ctx.manifest.lock().expect("manifest poisoned").point_stats()
    }

    /// Ingest up to `run_count` unprocessed manifest entries (zero = all),
    /// then serialize. Per-file failures are recorded and surfaced after
    /// the pools drain; partial state stays on disk for continuation.
    pub fn go(&mut self, run_count: u64) -> Result<(), IndexError> {
        self.pools.cycle();

        let prior_errors = self.ctx.errors.lock().expect("errors poisoned").len();
        let prior_panics = self.pools.work.panics();
        let clip = self.pools.clip.handle();

        loop {
            let origin = {
                let mut manifest = self.ctx.manifest.lock().expect("manifest poisoned");
                self.sequence.lock().expect("sequence poisoned").next(
                    &self.ctx.metadata,
                    &mut manifest,
                    run_count,
                )
            };
            let Some(origin) = origin else { break };

            let path = self
                .ctx
                .manifest
                .lock()
                .expect("manifest poisoned")
                .get(origin)
                .path
                .clone();

            info!(
                origin,
                path = %path,
                cells = self.ctx.pool.cell_pool().allocated(),
                chunks = crate::chunk::live_count(),
                "adding file"
            );

            let ctx = Arc::clone(&self.ctx);
            let clip = clip.clone();
            self.pools.work.add(move || {
                let status = match insert_path(&ctx, origin, &clip) {
                    Ok(()) => FileStatus::Inserted,
                    Err(e) => {
                        warn!(origin, "insertion failed: {e}");
                        ctx.record_error(format!("origin {origin}: {e}"));
                        FileStatus::Error
                    }
                };
                ctx.manifest
                    .lock()
                    .expect("manifest poisoned")
                    .set_status(origin, status);
            });
        }

        drop(clip);
        info!("pushes complete, joining");
        self.pools.join();
        self.save()?;

        let errors = self.ctx.errors.lock().expect("errors poisoned");
        if errors.len() > prior_errors {
            return Err(IndexError::input(errors[prior_errors].clone()));
        }
        if self.pools.work.panics() > prior_panics {
            return Err(IndexError::input("a worker thread panicked"));
        }

        Ok(())
    }

    /// Serialize the full state: remaining cold chunks, the base, the
    /// hierarchy, and the metadata pair. Thread pools must be idle.
    pub fn save(&mut self) -> Result<(), IndexError> {
        self.ctx.registry().drain(&self.ctx)?;

        let mut metadata = self.ctx.metadata.clone();
        {
            let srs = self.ctx.srs.lock().expect("srs poisoned");
            if !srs.is_empty() {
                metadata.set_srs(srs.clone());
            }
        }

        info!("saving base");
        self.ctx
            .registry()
            .base()
            .save(&metadata, &self.ctx.pool, &self.ctx.out)?;

        info!("saving hierarchy");
        self.ctx.hierarchy.save(
            &self.ctx.out,
            metadata.format().compress_hierarchy(),
            &metadata.postfix(),
        )?;

        info!("saving metadata");
        let manifest = self.ctx.manifest.lock().expect("manifest poisoned");
        let errors = self.ctx.errors.lock().expect("errors poisoned");
        metadata.save(&self.ctx.out, &manifest, &errors)?;

        let stats = manifest.point_stats();
        info!(
            inserts = stats.inserts,
            out_of_bounds = stats.out_of_bounds,
            overflows = stats.overflows,
            "build state saved"
        );

        Ok(())
    }
}

fn insert_path(
    ctx: &Arc<BuildContext>,
    origin: Origin,
    clip: &PoolHandle,
) -> Result<(), IndexError> {
    let (path, header_bounds) = {
        let manifest = ctx.manifest.lock().expect("manifest poisoned");
        let info = manifest.get(origin);
        (info.path.clone(), info.bounds)
    };

    let bytes = ensure_get(&ctx.input, &path)?;

    if let Some(reprojection) = ctx.metadata.reprojection() {
        let mut srs = ctx.srs.lock().expect("srs poisoned");
        if srs.is_empty() {
            *srs = reprojection.out_srs.clone();
            info!("found an SRS");
        }
    }

    // Without inferred header bounds, check the actual contents before
    // streaming the whole file through the tree.
    if header_bounds.is_none() {
        let preview = Executor::preview(&bytes, ctx.metadata.schema())?;
        let bounds = match ctx.metadata.delta() {
            Some(delta) => preview.bounds.deltify(delta),
            None => preview.bounds,
        };

        if !ctx.metadata.bounds().overlaps(&bounds) {
            let primary = ctx.metadata.subset().map_or(true, |s| s.primary());
            ctx.manifest
                .lock()
                .expect("manifest poisoned")
                .add_out_of_bounds(origin, preview.num_points, primary);
            return Ok(());
        }

        if let Some(subset_bounds) = ctx.metadata.bounds_subset() {
            if !subset_bounds.overlaps(&bounds) {
                return Ok(());
            }
        }
    }

    let mut cache = ChunkCache::new();
    let mut climber = Climber::new(ctx.metadata.structure(), *ctx.metadata.bounds());
    let mut failure: Option<IndexError> = None;

    {
        let mut table = PooledPointTable::new(&ctx.pool, |batch| {
            process_batch(
                ctx,
                origin,
                clip,
                &mut cache,
                &mut climber,
                &mut failure,
                batch,
            )
        });
        Executor::run(&mut table, &bytes, ctx.metadata.schema())?;
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// One table batch: accept or reject each cell, climb it to the base
/// depth, and hand it to the registry. Returns the rejected cells for
/// recycling.
fn process_batch(
    ctx: &Arc<BuildContext>,
    origin: Origin,
    clip: &PoolHandle,
    cache: &mut ChunkCache,
    climber: &mut Climber,
    failure: &mut Option<IndexError>,
    mut batch: CellStack,
) -> CellStack {
    let mut rejected = ctx.pool.cell_pool().stack();

    if failure.is_some() {
        while let Some(cell) = batch.pop() {
            rejected.push(cell);
        }
        return rejected;
    }

    let mut stats = PointStats::default();
    let base_depth_begin = ctx.metadata.structure().base_depth_begin();

    for cell in batch.drain() {
        let point = cell.point();

        if !ctx.metadata.bounds_epsilon().contains(point) {
            stats.add_out_of_bounds();
            rejected.push(cell);
            continue;
        }

        if let Some(subset_bounds) = ctx.metadata.bounds_subset() {
            if !subset_bounds.contains(point) {
                rejected.push(cell);
                continue;
            }
        }

        climber.reset();
        climber.magnify_to(point, base_depth_begin);

        match ctx.registry().add_point(ctx, cache, climber, cell) {
            Ok(true) => stats.add_insert(),
            Ok(false) => stats.add_overflow(),
            Err(e) => {
                *failure = Some(e);
                break;
            }
        }
    }

    ctx.registry().clip_excess(ctx, clip);
    ctx.manifest
        .lock()
        .expect("manifest poisoned")
        .add_stats(origin, &stats);

    rejected
}
