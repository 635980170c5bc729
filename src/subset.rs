use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::error::IndexError;
use crate::id::Id;
use crate::structure::{ChunkInfo, Structure};

/// One horizontal shard of a build.
///
/// A subset build writes only the sub-hierarchy rooted in its spatial
/// partition: shard `id` of `of` equal tiles of the cubeified bounds,
/// ordered so that each shard's node ids form one contiguous range per
/// depth. `id` is zero-based here; the CLI surface is one-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    id: u64,
    of: u64,
}

/// Contiguous id range `[begin, end)` owned by a subset at one depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub begin: Id,
    pub end: Id,
}

impl Span {
    pub fn width(&self) -> Id {
        &self.end - &self.begin
    }
}

impl Subset {
    pub fn new(id: u64, of: u64) -> Result<Subset, IndexError> {
        if !matches!(of, 4 | 16 | 64) {
            return Err(IndexError::input(format!(
                "subset count must be one of 4, 16, or 64; got {of}"
            )));
        }
        if id >= of {
            return Err(IndexError::input(format!(
                "subset id {id} out of range for {of} subsets"
            )));
        }
        Ok(Subset { id, of })
    }

    /// From the one-based CLI surface.
    pub fn from_one_based(id: u64, of: u64) -> Result<Subset, IndexError> {
        if id == 0 {
            return Err(IndexError::input("subset ids are one-based"));
        }
        Subset::new(id - 1, of)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn of(&self) -> u64 {
        self.of
    }

    /// The primary subset carries build-wide aggregates exactly once.
    pub fn primary(&self) -> bool {
        self.id == 0
    }

    pub fn postfix(&self) -> String {
        format!("-{}", self.id)
    }

    /// Number of quadrant-selection rounds: log4(of).
    fn rounds(&self) -> u32 {
        self.of.trailing_zeros() / 2
    }

    /// This shard's tile of the full traversal cube. Sharding splits x and
    /// y; the vertical extent stays whole.
    pub fn bounds(&self, full: &Bounds) -> Bounds {
        let rounds = self.rounds();
        let mut cur = *full;
        for r in (0..rounds).rev() {
            let q = (self.id >> (2 * r)) & 3;
            // Quadrant bit 1 selects x, bit 0 selects y; z spans both
            // octants, so take the union of the two z halves.
            let low = cur.eight_fold((q << 1) as usize);
            let high = cur.eight_fold((q << 1) as usize | 1);
            cur = Bounds::new(low.min(), high.max());
        }
        cur
    }

    /// Per-depth id spans owned by this subset across the base band.
    /// Depths shallower than the base begin get empty spans; the structure
    /// must be deep enough at the base begin to split `of` ways.
    pub fn calc_spans(&self, structure: &Structure) -> Result<Vec<Span>, IndexError> {
        let dims = structure.dimensions();
        let mut spans = Vec::with_capacity(structure.base_depth_end() as usize);

        for depth in 0..structure.base_depth_end() {
            let level = ChunkInfo::calc_level_index(dims, depth);

            if depth < structure.base_depth_begin() {
                spans.push(Span {
                    begin: level.clone(),
                    end: level,
                });
                continue;
            }

            let nodes = ChunkInfo::points_at_depth(dims, depth);
            if &nodes < &Id::new(self.of) {
                return Err(IndexError::config(format!(
                    "base depth {depth} is too shallow to split into {} subsets",
                    self.of
                )));
            }

            let (width, _) = nodes.div_mod(self.of);
            let begin = &level + &(&width * self.id);
            let end = &begin + &width;
            spans.push(Span { begin, end });
        }

        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::StructureConfig;
    use glam::DVec3;

    fn cube() -> Bounds {
        Bounds::new(DVec3::ZERO, DVec3::splat(4.0))
    }

    #[test]
    fn validation() {
        assert!(Subset::new(0, 4).is_ok());
        assert!(Subset::new(3, 4).is_ok());
        assert!(Subset::new(4, 4).is_err());
        assert!(Subset::new(0, 8).is_err());
        assert!(Subset::from_one_based(0, 4).is_err());
        assert_eq!(Subset::from_one_based(1, 4).unwrap().id(), 0);
    }

    #[test]
    fn four_tiles_partition_the_cube() {
        let full = cube();
        let tiles: Vec<Bounds> = (0..4)
            .map(|i| Subset::new(i, 4).unwrap().bounds(&full))
            .collect();

        for t in &tiles {
            assert_eq!(t.max().x - t.min().x, 2.0);
            assert_eq!(t.max().y - t.min().y, 2.0);
            // z spans the whole cube.
            assert_eq!(t.min().z, 0.0);
            assert_eq!(t.max().z, 4.0);
        }

        // Tiles are disjoint and cover all four xy quadrants.
        for a in 0..4 {
            for b in (a + 1)..4 {
                assert!(!tiles[a].overlaps(&tiles[b]), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn spans_tile_each_depth() {
        let structure = Structure::new(StructureConfig {
            null_depth: 1,
            base_depth: 4,
            cold_depth: 4,
            points_per_chunk: 0,
            ..StructureConfig::default()
        })
        .unwrap();

        let mut previous_end: Option<Id> = None;
        for i in 0..4 {
            let spans = Subset::new(i, 4).unwrap().calc_spans(&structure).unwrap();
            assert_eq!(spans.len(), 4);
            // Depth 0 is below the base: empty.
            assert_eq!(spans[0].width(), Id::zero());
            // Depth 1 has 4 nodes, one per subset.
            assert_eq!(spans[1].width(), Id::new(1));
            assert_eq!(spans[2].width(), Id::new(4));
            assert_eq!(spans[3].width(), Id::new(16));

            if let Some(end) = previous_end {
                assert_eq!(spans[2].begin, end, "depth-2 spans must be adjacent");
            }
            previous_end = Some(spans[2].end.clone());
        }
    }

    #[test]
    fn too_shallow_base_is_rejected() {
        let structure = Structure::new(StructureConfig {
            null_depth: 0,
            base_depth: 3,
            cold_depth: 3,
            points_per_chunk: 0,
            ..StructureConfig::default()
        })
        .unwrap();
        // Depth 0 has a single node; it cannot split 4 ways.
        assert!(Subset::new(0, 4).unwrap().calc_spans(&structure).is_err());
    }

    #[test]
    fn subset_bounds_match_span_geometry() {
        // The subset's tile must contain exactly the points whose depth-1
        // node falls in its span.
        let full = cube();
        for i in 0..4u64 {
            let subset = Subset::new(i, 4).unwrap();
            let tile = subset.bounds(&full);
            let mid = tile.mid();
            // Child index at depth 1 from the full cube: x bit, then y bit.
            let child =
                u64::from(mid.x >= full.mid().x) << 1 | u64::from(mid.y >= full.mid().y);
            assert_eq!(child, i, "tile order must follow child order");
        }
    }
}
