use crate::bounds::Delta;
use crate::error::IndexError;
use crate::format::{read_point, write_point};
use crate::pool::{CellStack, DataStack, PointPool};

/// Batch size for streaming insertion: records accumulate into pooled
/// blocks and flush through the process callback one batch at a time.
pub const TABLE_CAPACITY: usize = 4096;

/// Bridges a record reader to the insertion pipeline without per-point
/// allocation: records land in pooled data blocks, become cells on flush,
/// and rejected cells hand their nodes straight back for reuse.
///
/// With a delta configured, stored X/Y/Z become the quantized
/// (integer-valued) coordinates before any climbing happens, so the whole
/// tree operates in conforming space.
pub struct PooledPointTable<'a> {
    pool: &'a PointPool,
    delta: Option<Delta>,
    spare_data: DataStack,
    spare_cells: CellStack,
    filled: Vec<crate::pool::DataNode>,
    process: Box<dyn FnMut(CellStack) -> CellStack + 'a>,
}

impl<'a> PooledPointTable<'a> {
    pub fn new(
        pool: &'a PointPool,
        process: impl FnMut(CellStack) -> CellStack + 'a,
    ) -> PooledPointTable<'a> {
        PooledPointTable {
            pool,
            delta: pool.delta().copied(),
            spare_data: pool.data_pool().acquire(TABLE_CAPACITY),
            spare_cells: pool.cell_pool().acquire(TABLE_CAPACITY),
            filled: Vec::with_capacity(TABLE_CAPACITY),
            process: Box::new(process),
        }
    }

    /// Append one record; flushes automatically on a full batch.
    pub fn push(&mut self, record: &[u8]) -> Result<(), IndexError> {
        if record.len() != self.pool.schema().point_size() {
            return Err(IndexError::input(format!(
                "record of {} bytes does not match the {}-byte schema",
                record.len(),
                self.pool.schema().point_size()
            )));
        }

        let mut node = match self.spare_data.pop() {
            Some(node) => node,
            None => {
                let mut more = self.pool.data_pool().acquire(TABLE_CAPACITY);
                self.spare_data.append(&mut more);
                self.spare_data.pop().expect("freshly acquired")
            }
        };
        node.copy_from_slice(record);
        self.filled.push(node);

        if self.filled.len() >= TABLE_CAPACITY {
            self.flush();
        }
        Ok(())
    }

    /// Flush any partial batch; call once at end of stream.
    pub fn finish(&mut self) {
        if !self.filled.is_empty() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let mut batch = self.pool.cell_pool().stack();

        for mut node in self.filled.drain(..) {
            let mut point = read_point(&node);
            if let Some(delta) = &self.delta {
                point = delta.quantize(point);
                write_point(&mut node, point);
            }

            let mut cell = match self.spare_cells.pop() {
                Some(cell) => cell,
                None => {
                    // Only reachable if the process callback kept cells.
                    let mut more = self.pool.cell_pool().acquire(TABLE_CAPACITY);
                    self.spare_cells.append(&mut more);
                    self.spare_cells.pop().expect("freshly acquired")
                }
            };
            cell.set(point, node);
            batch.push(cell);
        }

        let mut rejected = (self.process)(batch);
        while let Some(mut cell) = rejected.pop() {
            for node in cell.acquire_data() {
                self.spare_data.push(node);
            }
            self.spare_cells.push(cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use glam::DVec3;
    use std::cell::RefCell;

    #[test]
    fn batches_flush_at_capacity() {
        let pool = PointPool::new(schema::xyz(), None);
        let batches = RefCell::new(Vec::new());

        // Reject everything; the table must recycle all of it.
        let mut table = PooledPointTable::new(&pool, |cells| {
            batches.borrow_mut().push(cells.len());
            cells
        });

        let mut record = vec![0u8; 24];
        for i in 0..TABLE_CAPACITY + 10 {
            write_point(&mut record, DVec3::splat(i as f64));
            table.push(&record).unwrap();
        }
        table.finish();

        assert_eq!(*batches.borrow(), vec![TABLE_CAPACITY, 10]);
    }

    #[test]
    fn delta_quantizes_stored_coordinates() {
        let delta = Delta::new(DVec3::splat(0.5), DVec3::ZERO);
        let pool = PointPool::new(schema::xyz(), Some(delta));
        let seen = RefCell::new(Vec::new());

        let mut table = PooledPointTable::new(&pool, |cells| {
            for cell in cells.iter() {
                seen.borrow_mut().push(cell.point());
            }
            cells
        });

        let mut record = vec![0u8; 24];
        write_point(&mut record, DVec3::new(1.2, 2.6, 3.4));
        table.push(&record).unwrap();
        table.finish();

        // round(v / 0.5): 2.4 -> 2, 5.2 -> 5, 6.8 -> 7.
        assert_eq!(*seen.borrow(), vec![DVec3::new(2.0, 5.0, 7.0)]);
    }

    #[test]
    fn wrong_size_record_is_an_input_error() {
        let pool = PointPool::new(schema::xyz(), None);
        let mut table = PooledPointTable::new(&pool, |cells| cells);
        assert!(table.push(&[0u8; 23]).is_err());
    }
}
