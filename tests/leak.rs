//! The live-chunk counter must drain to zero after a complete build.
//! Isolated in its own binary: the counter is process-wide.

mod support;

use cairn::builder::Builder;
use cairn::chunk;
use cairn::endpoint::Endpoint;
use cairn::structure::StructureConfig;

use support::*;

#[test]
fn chunk_counter_returns_to_zero() {
    let dir = temp_dir("leak");
    let points = scattered(500, 23, 0.01, 0.99);
    let path = write_bin(&dir, "cloud.bin", &points);
    let out = Endpoint::memory();

    // Deep enough that cold chunks, both contiguous and sparse, exist.
    let structure = StructureConfig {
        null_depth: 0,
        base_depth: 2,
        cold_depth: 7,
        points_per_chunk: 16,
        mapped_depth: 4,
        ..StructureConfig::default()
    };

    let mut builder = Builder::create(
        config(unit_bounds(), structure, vec![path]),
        out.clone(),
        Endpoint::memory(),
        4,
        false,
    )
    .unwrap();
    builder.go(0).unwrap();

    let stats = builder.point_stats();
    assert_eq!(stats.inserts + stats.overflows, 500);
    assert_eq!(stats.out_of_bounds, 0);

    drop(builder);
    assert_eq!(chunk::live_count(), 0);
}
