use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads fed by a channel. Panicking jobs are
/// caught and counted so one bad file cannot take a worker down.
pub struct Pool {
    name: String,
    size: usize,
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    panics: Arc<AtomicUsize>,
}

impl Pool {
    pub fn new(name: &str, size: usize) -> Pool {
        let mut pool = Pool {
            name: name.to_string(),
            size: size.max(1),
            tx: None,
            handles: Vec::new(),
            panics: Arc::new(AtomicUsize::new(0)),
        };
        pool.spawn();
        pool
    }

    fn spawn(&mut self) {
        let (tx, rx) = unbounded::<Job>();
        self.tx = Some(tx);

        for i in 0..self.size {
            let rx = rx.clone();
            let panics = Arc::clone(&self.panics);
            let name = format!("{}-{i}", self.name);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    for job in rx.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            panics.fetch_add(1, Ordering::Relaxed);
                            error!(worker = name.as_str(), "worker job panicked");
                        }
                    }
                })
                .expect("failed to spawn pool thread");
            self.handles.push(handle);
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn add(&self, job: impl FnOnce() + Send + 'static) {
        self.tx
            .as_ref()
            .expect("pool already joined")
            .send(Box::new(job))
            .expect("pool workers gone");
    }

    /// A cloneable submission handle for jobs queued from other threads.
    /// Handles must be dropped before `join` can drain the pool.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            tx: self.tx.as_ref().expect("pool already joined").clone(),
        }
    }

    /// Drain the queue and stop the workers.
    pub fn join(&mut self) {
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Drain, then restart with fresh workers.
    pub fn cycle(&mut self) {
        self.join();
        self.spawn();
    }

    pub fn panics(&self) -> usize {
        self.panics.load(Ordering::Relaxed)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.join();
    }
}

#[derive(Clone)]
pub struct PoolHandle {
    tx: Sender<Job>,
}

impl PoolHandle {
    pub fn add(&self, job: impl FnOnce() + Send + 'static) {
        self.tx.send(Box::new(job)).expect("pool workers gone");
    }
}

/// Serialization costs more than tree work, so most threads go to the clip
/// side.
const WORK_RATIO: f64 = 0.25;

/// The two pools driving a build: workers ingest one file each; clip
/// workers pack and write evicted chunks.
pub struct ThreadPools {
    pub work: Pool,
    pub clip: Pool,
}

impl ThreadPools {
    pub fn new(total: usize) -> ThreadPools {
        let total = total.max(2);
        let work = ((total as f64 * WORK_RATIO).round() as usize).clamp(1, total - 1);
        let clip = total - work;

        ThreadPools {
            work: Pool::new("work", work),
            clip: Pool::new("clip", clip),
        }
    }

    /// Drain both pools (work first, so no new clip jobs appear), then
    /// restart them.
    pub fn cycle(&mut self) {
        self.work.cycle();
        self.clip.cycle();
    }

    pub fn join(&mut self) {
        self.work.join();
        self.clip.join();
    }
}
