//! Watermark eviction: least-recently-touched chunks leave memory through
//! the clip pool and reload transparently on the next touch.

mod support;

use std::sync::{Arc, Mutex};

use glam::DVec3;

use cairn::builder::{registry::Registry, BuildContext, ChunkCache};
use cairn::chunk::BaseChunk;
use cairn::climber::Climber;
use cairn::endpoint::Endpoint;
use cairn::format::write_point;
use cairn::hierarchy::Hierarchy;
use cairn::manifest::Manifest;
use cairn::metadata::Metadata;
use cairn::pool::PointPool;
use cairn::structure::StructureConfig;
use cairn::threads::Pool;

use support::*;

fn context(watermark: usize) -> Arc<BuildContext> {
    let (metadata, manifest) = Metadata::new(config(
        unit_bounds(),
        StructureConfig {
            null_depth: 0,
            base_depth: 1,
            cold_depth: 4,
            points_per_chunk: 4,
            ..StructureConfig::default()
        },
        vec![],
    ))
    .unwrap();

    let pool = PointPool::new(metadata.schema().clone(), None);
    let base = BaseChunk::new(&metadata).unwrap();
    let hierarchy = Hierarchy::new(&metadata);

    Arc::new(BuildContext {
        pool,
        out: Endpoint::memory(),
        tmp: Endpoint::memory(),
        input: Endpoint::fs(""),
        hierarchy,
        manifest: Mutex::new(Manifest::default()),
        errors: Mutex::new(Vec::new()),
        srs: Mutex::new(String::new()),
        registry: Registry::new(base, watermark),
        metadata,
    })
}

/// One point per depth-2 horizontal cell: sixteen points across four
/// four-cell chunks.
fn grid16() -> Vec<DVec3> {
    (0..16)
        .map(|k| {
            DVec3::new(
                (f64::from(k % 4) + 0.5) / 4.0,
                (f64::from(k / 4) + 0.5) / 4.0,
                0.5,
            )
        })
        .collect()
}

fn insert(ctx: &Arc<BuildContext>, cache: &mut ChunkCache, p: DVec3) {
    let mut climber = Climber::new(ctx.metadata.structure(), *ctx.metadata.bounds());
    climber.magnify_to(p, 2);

    let mut data = ctx.pool.data_pool().acquire(1);
    let mut cells = ctx.pool.cell_pool().acquire(1);
    let mut node = data.pop().unwrap();
    write_point(&mut node, p);
    let mut cell = cells.pop().unwrap();
    cell.set(p, node);

    assert!(ctx
        .registry
        .add_point(ctx, cache, &mut climber, cell)
        .unwrap());
}

#[test]
fn excess_chunks_evict_and_reload() {
    let ctx = context(2);
    let mut clip = Pool::new("clip", 1);

    {
        let mut cache = ChunkCache::new();
        for p in grid16() {
            insert(&ctx, &mut cache, p);
        }
    }
    assert_eq!(ctx.registry.live_cold(), 4);

    // With the worker cache gone, eviction may take the two oldest.
    let handle = clip.handle();
    ctx.registry.clip_excess(&ctx, &handle);
    drop(handle);
    clip.join();

    assert_eq!(ctx.registry.live_cold(), 2);

    // Evicted chunks are on the endpoint, tail and all.
    let stored = (0..4)
        .filter(|i| ctx.out.exists(&format!("{}", 5 + i * 4)))
        .count();
    assert_eq!(stored, 2);

    // Touching an evicted chunk reloads it with its cells intact.
    let mut cache = ChunkCache::new();
    insert(&ctx, &mut cache, DVec3::new(0.125, 0.125, 0.9));
    assert!(ctx.registry.live_cold() >= 2);

    // Finalize the rest; everything lands on the endpoint.
    drop(cache);
    ctx.registry.drain(&ctx).unwrap();
    assert_eq!(ctx.registry.live_cold(), 0);
    for i in 0..4 {
        assert!(ctx.out.exists(&format!("{}", 5 + i * 4)), "chunk {i} missing");
    }
}
