use crate::bounds::{Bounds, Point};
use crate::cell::Tube;
use crate::id::Id;
use crate::structure::Structure;

/// Traversal cursor computing the node index, tick, and bounds of a point
/// at a target depth.
///
/// Descent is a pure function of the point and the structure: two climbers
/// fed the same input arrive at identical state. At each step the octant is
/// chosen by midpoint comparison; in tubular mode the horizontal bits feed
/// the index arithmetic while the z bit extends the tick.
#[derive(Clone)]
pub struct Climber<'a> {
    structure: &'a Structure,
    full: Bounds,
    bounds: Bounds,
    index: Id,
    depth: u64,
    tick: u64,
}

impl<'a> Climber<'a> {
    pub fn new(structure: &'a Structure, full: Bounds) -> Self {
        Climber {
            structure,
            full,
            bounds: full,
            index: Id::zero(),
            depth: 0,
            tick: 0,
        }
    }

    pub fn reset(&mut self) {
        self.bounds = self.full;
        self.index = Id::zero();
        self.depth = 0;
        self.tick = 0;
    }

    /// Absolute id of the current node.
    pub fn index(&self) -> &Id {
        &self.index
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Midpoint of the current node, the reference for slot contention.
    pub fn mid(&self) -> Point {
        self.bounds.mid()
    }

    /// Descend one step toward `point`.
    pub fn magnify(&mut self, point: Point) {
        let octant = self.bounds.octant_of(point);

        let child = if self.structure.tubular() {
            // Horizontal bits only; z goes to the tick.
            (octant >> 1) as u64
        } else {
            octant as u64
        };

        self.index = &(&self.index * self.structure.factor()) + (child + 1);

        if self.structure.tubular() && self.depth < Tube::MAX_TICK_DEPTH {
            self.tick = (self.tick << 1) | (octant as u64 & 1);
        }

        self.bounds = self.bounds.eight_fold(octant);
        self.depth += 1;
    }

    /// Descend from the current state to `depth`.
    pub fn magnify_to(&mut self, point: Point, depth: u64) {
        while self.depth < depth {
            self.magnify(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{ChunkInfo, StructureConfig};
    use glam::DVec3;

    fn structure() -> Structure {
        Structure::new(StructureConfig {
            null_depth: 0,
            base_depth: 6,
            cold_depth: 10,
            points_per_chunk: 64,
            ..StructureConfig::default()
        })
        .unwrap()
    }

    fn unit() -> Bounds {
        Bounds::new(DVec3::ZERO, DVec3::ONE)
    }

    /// Horizontal Morton order of a point at a depth, from first principles.
    fn zorder(mut b: Bounds, p: Point, depth: u64) -> u64 {
        let mut out = 0;
        for _ in 0..depth {
            let octant = b.octant_of(p);
            out = (out << 2) | (octant >> 1) as u64;
            b = b.eight_fold(octant);
        }
        out
    }

    #[test]
    fn index_is_level_index_plus_zorder() {
        let s = structure();
        let points = [
            DVec3::new(0.1, 0.2, 0.3),
            DVec3::new(0.9, 0.9, 0.9),
            DVec3::new(0.5, 0.25, 0.75),
            DVec3::new(0.333, 0.666, 0.999),
        ];
        for p in points {
            for depth in 0..8 {
                let mut climber = Climber::new(&s, unit());
                climber.magnify_to(p, depth);
                let expect =
                    &ChunkInfo::calc_level_index(2, depth) + zorder(unit(), p, depth);
                assert_eq!(climber.index(), &expect, "point {p:?} depth {depth}");
            }
        }
    }

    #[test]
    fn two_climbers_agree() {
        let s = structure();
        let p = DVec3::new(0.7, 0.4, 0.6);

        let mut a = Climber::new(&s, unit());
        a.magnify_to(p, 7);

        // Step-by-step against one-shot.
        let mut b = Climber::new(&s, unit());
        for d in 1..=7 {
            b.magnify_to(p, d);
        }

        assert_eq!(a.index(), b.index());
        assert_eq!(a.tick(), b.tick());
        assert_eq!(a.bounds(), b.bounds());
    }

    #[test]
    fn tick_tracks_z_bits() {
        let s = structure();
        let mut climber = Climber::new(&s, unit());

        // z = 0.9 descends high, high, high...
        climber.magnify_to(DVec3::new(0.1, 0.1, 0.9), 3);
        assert_eq!(climber.tick(), 0b111);

        climber.reset();
        climber.magnify_to(DVec3::new(0.1, 0.1, 0.1), 3);
        assert_eq!(climber.tick(), 0);

        climber.reset();
        // High then low halves: 0.6 is in the upper half, then the lower
        // quarter of [0.5, 1.0).
        climber.magnify_to(DVec3::new(0.1, 0.1, 0.6), 2);
        assert_eq!(climber.tick(), 0b10);
    }

    #[test]
    fn reset_restores_initial_state() {
        let s = structure();
        let mut climber = Climber::new(&s, unit());
        climber.magnify_to(DVec3::splat(0.9), 5);
        climber.reset();
        assert_eq!(climber.index(), &Id::zero());
        assert_eq!(climber.depth(), 0);
        assert_eq!(climber.tick(), 0);
        assert_eq!(climber.bounds(), &unit());
    }
}
