use std::collections::BTreeMap;

use glam::DVec3;

use crate::bounds::Point;
use crate::pool::{DataNode, PoolItem};

/// One or more byte-records sharing a single location. The point is the
/// representative for equality; records pile up when multiple samples land
/// on identical coordinates.
#[derive(Default)]
pub struct Cell {
    point: Point,
    data: Vec<DataNode>,
}

impl Cell {
    pub fn set(&mut self, point: Point, node: DataNode) {
        self.point = point;
        self.data.push(node);
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> impl Iterator<Item = &[u8]> {
        self.data.iter().map(|d| d.as_ref())
    }

    /// Take ownership of the data blocks, leaving the cell empty.
    pub fn acquire_data(&mut self) -> Vec<DataNode> {
        std::mem::take(&mut self.data)
    }

    /// Merge another cell's records into this one. Both cells must sit at
    /// the same point.
    pub fn push_from(&mut self, mut other: Cell) {
        debug_assert_eq!(self.point, other.point);
        self.data.append(&mut other.data);
    }
}

impl PoolItem for Cell {
    fn recycle(&mut self) {
        self.point = DVec3::ZERO;
        self.data.clear();
    }
}

/// Result of a tube insertion attempt.
pub enum Insertion {
    /// The cell was stored (or merged). Nothing left to do.
    Done,
    /// A cell was displaced (either the incumbent or the incoming one) and
    /// must recurse one depth deeper.
    Descend(Cell),
}

/// A vertical column of cells at one horizontal position, keyed by the
/// z-derived tick. At most one cell per tick.
#[derive(Default)]
pub struct Tube {
    cells: BTreeMap<u64, Cell>,
}

impl Tube {
    /// Depth cap for z subdivision; ticks stop gaining bits past this depth.
    pub const MAX_TICK_DEPTH: u64 = 30;

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Cell)> {
        self.cells.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (u64, Cell)> {
        std::mem::take(&mut self.cells).into_iter()
    }

    /// Insert `cell` at `tick`, or contend with the incumbent.
    ///
    /// An empty slot accepts the cell. An incumbent at the same point merges
    /// the incoming records. Otherwise the point closer to `mid` (the node's
    /// midpoint) keeps the slot and the other descends.
    pub fn insert_or_swap(&mut self, tick: u64, cell: Cell, mid: Point) -> Insertion {
        match self.cells.entry(tick) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(cell);
                Insertion::Done
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.point() == cell.point() {
                    existing.push_from(cell);
                    Insertion::Done
                } else if cell.point().distance_squared(mid)
                    < existing.point().distance_squared(mid)
                {
                    Insertion::Descend(std::mem::replace(existing, cell))
                } else {
                    Insertion::Descend(cell)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_at(p: Point, byte: u8) -> Cell {
        let mut cell = Cell::default();
        cell.set(p, vec![byte; 4].into_boxed_slice());
        cell
    }

    #[test]
    fn vacant_insert_is_done() {
        let mut tube = Tube::default();
        match tube.insert_or_swap(0, cell_at(DVec3::splat(0.25), 1), DVec3::splat(0.5)) {
            Insertion::Done => {}
            Insertion::Descend(_) => panic!("vacant slot must accept"),
        }
        assert_eq!(tube.len(), 1);
    }

    #[test]
    fn equal_points_merge() {
        let mut tube = Tube::default();
        let p = DVec3::splat(0.25);
        let mid = DVec3::splat(0.5);
        tube.insert_or_swap(0, cell_at(p, 1), mid);
        tube.insert_or_swap(0, cell_at(p, 2), mid);
        tube.insert_or_swap(0, cell_at(p, 3), mid);

        assert_eq!(tube.len(), 1);
        let (_, cell) = tube.iter().next().unwrap();
        assert_eq!(cell.size(), 3);
        let mut bytes: Vec<u8> = cell.data().map(|d| d[0]).collect();
        bytes.sort_unstable();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn closer_point_wins_the_slot() {
        let mut tube = Tube::default();
        let mid = DVec3::splat(0.5);
        let far = DVec3::splat(0.1);
        let near = DVec3::splat(0.45);

        tube.insert_or_swap(0, cell_at(far, 1), mid);
        match tube.insert_or_swap(0, cell_at(near, 2), mid) {
            Insertion::Descend(out) => assert_eq!(out.point(), far),
            Insertion::Done => panic!("closer point should displace"),
        }

        // The farther point does not displace; it descends itself.
        match tube.insert_or_swap(0, cell_at(far, 3), mid) {
            Insertion::Descend(out) => assert_eq!(out.point(), far),
            Insertion::Done => panic!("farther point should descend"),
        }
    }

    #[test]
    fn ticks_are_independent() {
        let mut tube = Tube::default();
        let mid = DVec3::splat(0.5);
        tube.insert_or_swap(0, cell_at(DVec3::new(0.1, 0.1, 0.1), 1), mid);
        tube.insert_or_swap(1, cell_at(DVec3::new(0.1, 0.1, 0.9), 2), mid);
        assert_eq!(tube.len(), 2);
    }
}
