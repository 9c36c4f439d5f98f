use {
    crate::{Context, Error, Result},
    std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
            Arc, Mutex,
        },
    },
};

/// Smallest stride a worker will claim from the cursor.
pub const MIN_BATCH_SIZE: u64 = 16;

/// A description of parallelizable work over the index range `[0, length)`.
///
/// Strides carry no ordering guarantees among themselves; dependencies must
/// be expressed by sequencing separate runnables through the same runner.
pub trait ParallelRunnable: Send + Sync {
    fn length(&self) -> u64;

    /// Batch size workers claim per cursor fetch.
    fn preferred_batch_size(&self) -> u64 {
        ((self.length() as f64).sqrt() as u64).max(MIN_BATCH_SIZE)
    }

    /// Processes the stride `[start, start + length)`.
    fn run_stride(&self, start: u64, length: u64) -> Result<()>;
}

/// Cooperative dispatcher: a lock-free cursor over the index range plus a
/// bounded set of scope workers on the context's pool.
pub struct ParallelRunner {
    workers: usize,
    pool:    Arc<rayon::ThreadPool>,
}

impl ParallelRunner {
    pub fn new(ctx: &Context) -> Self {
        Self {
            workers: ctx.num_workers,
            pool:    Arc::clone(ctx.pool()),
        }
    }

    pub fn run(&self, task: &dyn ParallelRunnable) -> Result<()> {
        self.run_with_donations(task, None)
    }

    /// Runs `task`, additionally consulting `donated` at the top of each
    /// coordinator iteration and topping the worker set up to the new
    /// target. Contenders blocked on the shared-memory lock donate their
    /// worker counts through this counter.
    pub fn run_with_donations(
        &self,
        task: &dyn ParallelRunnable,
        donated: Option<&AtomicUsize>,
    ) -> Result<()> {
        let length = task.length();
        if length == 0 {
            return Ok(());
        }
        let batch = task.preferred_batch_size().clamp(1, length);
        let cursor = AtomicU64::new(0);
        let stop = AtomicBool::new(false);
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        let record_failure = |error: Error| {
            stop.store(true, Ordering::Relaxed);
            let mut slot = failure.lock().unwrap_or_else(|poison| poison.into_inner());
            if slot.is_none() {
                *slot = Some(error);
            }
        };

        let worker_loop = || {
            while !stop.load(Ordering::Relaxed) {
                let start = cursor.fetch_add(batch, Ordering::Relaxed);
                if start >= length {
                    break;
                }
                let len = batch.min(length - start);
                if let Err(error) = task.run_stride(start, len) {
                    record_failure(error);
                    break;
                }
            }
        };

        let joined = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.scope(|scope| {
                // This thread is the first worker; the rest are scope tasks.
                let mut spawned = 1usize;
                loop {
                    let target = self
                        .workers
                        .saturating_add(donated.map_or(0, |d| d.load(Ordering::Relaxed)));
                    while spawned < target {
                        scope.spawn(|_| worker_loop());
                        spawned += 1;
                    }
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let start = cursor.fetch_add(batch, Ordering::Relaxed);
                    if start >= length {
                        break;
                    }
                    let len = batch.min(length - start);
                    if let Err(error) = task.run_stride(start, len) {
                        record_failure(error);
                        break;
                    }
                }
            });
        }));
        if joined.is_err() {
            return Err(Error::Interrupted);
        }

        match failure.into_inner().unwrap_or_else(|poison| poison.into_inner()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
