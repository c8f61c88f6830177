//! Bounded worker pool for read-only batch work over family rows.

use rayon::ThreadPool;

/// Wraps a dedicated rayon pool, or rayon's global pool when no thread count
/// was configured (or the dedicated pool could not be built).
#[derive(Debug)]
pub struct WorkerPool {
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        if threads == 0 {
            return Self { pool: None };
        }
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kestrel-worker-{i}"))
            .build();
        match built {
            Ok(pool) => Self { pool: Some(pool) },
            Err(e) => {
                tracing::warn!(threads, error = %e, "worker pool unavailable, using global pool");
                Self { pool: None }
            }
        }
    }

    /// Run `op` inside the pool; parallel iterators in `op` use its threads.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}
