#![allow(dead_code)]

use std::path::PathBuf;

use glam::DVec3;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cairn::bounds::Bounds;
use cairn::format::FormatConfig;
use cairn::manifest::Manifest;
use cairn::metadata::MetadataConfig;
use cairn::schema::{self, DimInfo, DimType, Schema};
use cairn::structure::StructureConfig;

/// A scratch directory unique to this test binary invocation.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cairn-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn cleanup(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

/// Write points as raw xyz records; returns the file's path.
pub fn write_bin(dir: &PathBuf, name: &str, points: &[DVec3]) -> String {
    let mut bytes = Vec::with_capacity(points.len() * 24);
    for p in points {
        bytes.extend_from_slice(&p.x.to_le_bytes());
        bytes.extend_from_slice(&p.y.to_le_bytes());
        bytes.extend_from_slice(&p.z.to_le_bytes());
    }
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write input file");
    path.to_string_lossy().into_owned()
}

/// Write points carrying one extra attribute byte per record.
pub fn write_bin_flagged(dir: &PathBuf, name: &str, points: &[(DVec3, u8)]) -> String {
    let mut bytes = Vec::with_capacity(points.len() * 25);
    for (p, flag) in points {
        bytes.extend_from_slice(&p.x.to_le_bytes());
        bytes.extend_from_slice(&p.y.to_le_bytes());
        bytes.extend_from_slice(&p.z.to_le_bytes());
        bytes.push(*flag);
    }
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write input file");
    path.to_string_lossy().into_owned()
}

pub fn flagged_schema() -> Schema {
    let mut dims: Vec<DimInfo> = schema::xyz().into();
    dims.push(DimInfo::new("Flag", DimType::UInt8));
    Schema::new(dims)
}

pub fn unit_bounds() -> Bounds {
    Bounds::new(DVec3::ZERO, DVec3::ONE)
}

pub fn corners() -> Vec<DVec3> {
    (0..8)
        .map(|i| {
            DVec3::new(
                f64::from(i & 1),
                f64::from((i >> 1) & 1),
                f64::from((i >> 2) & 1),
            )
        })
        .collect()
}

/// Deterministic scattered points strictly inside `lo..hi` per axis.
pub fn scattered(n: usize, seed: u64, lo: f64, hi: f64) -> Vec<DVec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            DVec3::new(
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
            )
        })
        .collect()
}

pub fn config(
    bounds: Bounds,
    structure: StructureConfig,
    paths: Vec<String>,
) -> MetadataConfig {
    MetadataConfig {
        bounds_native: bounds,
        schema: schema::xyz(),
        structure,
        hierarchy_structure: None,
        manifest: Manifest::new(paths),
        format: FormatConfig::default(),
        delta: None,
        reprojection: None,
        subset: None,
        transformation: None,
        cesium: None,
    }
}
