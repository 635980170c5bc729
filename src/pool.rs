use std::sync::{Arc, Mutex};

use crate::bounds::Delta;
use crate::cell::Cell;
use crate::schema::Schema;

/// Initial slab size for an under-allocated pool; slabs double up to a cap
/// so steady-state growth settles quickly without huge cold-start cost.
const INITIAL_SLAB: usize = 1024;
const MAX_SLAB: usize = 1 << 20;

/// An item that can live in a free-list pool.
pub trait PoolItem: Send {
    /// Restore the item to a well-defined reusable state.
    fn recycle(&mut self);
}

/// Fixed-size byte block holding one point record.
pub type DataNode = Box<[u8]>;

impl PoolItem for DataNode {
    fn recycle(&mut self) {}
}

struct PoolState<T> {
    free: Vec<T>,
    allocated: usize,
    slab: usize,
}

struct PoolInner<T> {
    state: Mutex<PoolState<T>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
}

/// A free list of uniform nodes, allocated in doubling slabs and shared
/// across threads. Nodes hand out and return through [`PooledStack`]s; a
/// dropped stack pushes everything it still holds back onto the free list.
pub struct Pool<T: PoolItem> {
    inner: Arc<PoolInner<T>>,
}

impl<T: PoolItem> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PoolItem> Pool<T> {
    pub fn new(make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Pool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    allocated: 0,
                    slab: INITIAL_SLAB,
                }),
                make: Box::new(make),
            }),
        }
    }

    /// An empty stack bound to this pool.
    pub fn stack(&self) -> PooledStack<T> {
        PooledStack {
            items: Vec::new(),
            pool: self.clone(),
        }
    }

    /// Acquire exactly `n` nodes, growing the pool if it is short.
    pub fn acquire(&self, n: usize) -> PooledStack<T> {
        let mut items = Vec::with_capacity(n);
        {
            let mut state = self.inner.state.lock().expect("pool poisoned");
            while state.free.len() < n {
                let slab = state.slab;
                for _ in 0..slab {
                    state.free.push((self.inner.make)());
                }
                state.allocated += slab;
                state.slab = (state.slab * 2).min(MAX_SLAB);
            }
            let at = state.free.len() - n;
            items.extend(state.free.drain(at..));
        }
        PooledStack {
            items,
            pool: self.clone(),
        }
    }

    /// Total nodes ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.inner.state.lock().expect("pool poisoned").allocated
    }

    fn release(&self, items: &mut Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().expect("pool poisoned");
        for mut item in items.drain(..) {
            item.recycle();
            state.free.push(item);
        }
    }
}

/// A move-only batch of pooled nodes. Leftover nodes return to the pool on
/// drop; the return path never fails.
pub struct PooledStack<T: PoolItem> {
    items: Vec<T>,
    pool: Pool<T>,
}

impl<T: PoolItem> PooledStack<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }

    /// Move everything out of `other` into this stack.
    pub fn append(&mut self, other: &mut PooledStack<T>) {
        self.items.append(&mut other.items);
    }
}

impl<T: PoolItem> Drop for PooledStack<T> {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        pool.release(&mut self.items);
    }
}

/// The two free-lists backing point ingestion: fixed-size data blocks of
/// `schema.point_size()` bytes, and cell headers.
pub struct PointPool {
    schema: Schema,
    delta: Option<Delta>,
    data: Pool<DataNode>,
    cells: Pool<Cell>,
}

impl PointPool {
    pub fn new(schema: Schema, delta: Option<Delta>) -> Self {
        let point_size = schema.point_size();
        PointPool {
            schema,
            delta,
            data: Pool::new(move || vec![0u8; point_size].into_boxed_slice()),
            cells: Pool::new(Cell::default),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn delta(&self) -> Option<&Delta> {
        self.delta.as_ref()
    }

    pub fn data_pool(&self) -> &Pool<DataNode> {
        &self.data
    }

    pub fn cell_pool(&self) -> &Pool<Cell> {
        &self.cells
    }
}

pub type DataStack = PooledStack<DataNode>;
pub type CellStack = PooledStack<Cell>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn acquire_grows_by_doubling() {
        let pool: Pool<DataNode> = Pool::new(|| vec![0u8; 8].into_boxed_slice());
        let stack = pool.acquire(10);
        assert_eq!(stack.len(), 10);
        assert_eq!(pool.allocated(), INITIAL_SLAB);

        let big = pool.acquire(INITIAL_SLAB * 2);
        assert_eq!(big.len(), INITIAL_SLAB * 2);
        assert!(pool.allocated() >= INITIAL_SLAB * 2 + 10);
    }

    #[test]
    fn dropped_stack_returns_nodes() {
        let pool: Pool<DataNode> = Pool::new(|| vec![0u8; 8].into_boxed_slice());
        {
            let _stack = pool.acquire(64);
        }
        let allocated = pool.allocated();
        let _again = pool.acquire(64);
        // No growth needed the second time around.
        assert_eq!(pool.allocated(), allocated);
    }

    #[test]
    fn point_pool_sizes_data_nodes_from_schema() {
        let pool = PointPool::new(schema::xyz(), None);
        let mut stack = pool.data_pool().acquire(1);
        let node = stack.pop().unwrap();
        assert_eq!(node.len(), 24);
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool: Pool<DataNode> = Pool::new(|| vec![0u8; 8].into_boxed_slice());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        let mut stack = pool.acquire(16);
                        while let Some(node) = stack.pop() {
                            let mut back = pool.stack();
                            back.push(node);
                        }
                    }
                });
            }
        });
        assert!(pool.allocated() >= 64);
    }
}
