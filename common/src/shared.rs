use {
    crate::{context::LockKey, Error, Result},
    std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Condvar, LazyLock, Mutex,
        },
        thread::{self, ThreadId},
    },
};

/// One computation currently holding a shared-memory lock key.
struct ActiveTask {
    owner:   ThreadId,
    depth:   usize,
    donated: Arc<AtomicUsize>,
    donors:  HashSet<ThreadId>,
}

/// Process-wide arbitration of computations whose working sets would
/// oversubscribe memory if run concurrently. Keyed by lock-key identity,
/// never by value.
struct SharedMemoryRegistry {
    tasks: Mutex<HashMap<usize, ActiveTask>>,
    idle:  Condvar,
}

static REGISTRY: LazyLock<SharedMemoryRegistry> = LazyLock::new(|| SharedMemoryRegistry {
    tasks: Mutex::new(HashMap::new()),
    idle:  Condvar::new(),
});

/// Holds the shared-memory lock; dropping releases it and wakes waiters.
pub struct SharedLockGuard {
    key_id:  usize,
    donated: Arc<AtomicUsize>,
}

impl SharedLockGuard {
    /// Worker counts donated by contenders blocked on the same key. The
    /// parallel runner re-reads this at the top of each iteration.
    pub fn donated(&self) -> &AtomicUsize {
        &self.donated
    }
}

impl Drop for SharedLockGuard {
    fn drop(&mut self) {
        if let Ok(mut tasks) = REGISTRY.tasks.lock() {
            if let Some(task) = tasks.get_mut(&self.key_id) {
                task.depth -= 1;
                if task.depth == 0 {
                    tasks.remove(&self.key_id);
                }
            }
            REGISTRY.idle.notify_all();
        }
    }
}

/// Acquires the shared-memory lock for `key`.
///
/// If another computation holds the key, this contender donates `workers`
/// extra workers to it (once) and waits until the key is released. The lock
/// is re-entrant on the owning thread; the inner guard reuses the outer
/// donation counter.
pub fn lock(key: &LockKey, workers: usize) -> Result<SharedLockGuard> {
    let me = thread::current().id();
    let mut tasks = REGISTRY.tasks.lock().map_err(|_| Error::Interrupted)?;
    loop {
        if let Some(task) = tasks.get_mut(&key.id()) {
            if task.owner == me {
                task.depth += 1;
                return Ok(SharedLockGuard {
                    key_id:  key.id(),
                    donated: Arc::clone(&task.donated),
                });
            }
            if task.donors.insert(me) {
                task.donated.fetch_add(workers, Ordering::Relaxed);
            }
            tasks = REGISTRY
                .idle
                .wait(tasks)
                .map_err(|_| Error::Interrupted)?;
        } else {
            let donated = Arc::new(AtomicUsize::new(0));
            tasks.insert(key.id(), ActiveTask {
                owner: me,
                depth: 1,
                donated: Arc::clone(&donated),
                donors: HashSet::new(),
            });
            return Ok(SharedLockGuard {
                key_id: key.id(),
                donated,
            });
        }
    }
}
