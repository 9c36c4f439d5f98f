use {
    crate::{Error, Result},
    std::{
        path::{Path, PathBuf},
        process,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        thread,
    },
};

/// Identity-compared sentinel gating shared-memory computations.
///
/// The registry keys on the pointer of the inner allocation, never on any
/// field, so two keys compare equal only when they are clones of the same
/// sentinel.
#[derive(Clone, Debug)]
pub struct LockKey(Arc<()>);

impl LockKey {
    pub fn new() -> Self {
        Self(Arc::new(()))
    }

    /// Stable identity of this key for the lifetime of its clones.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Default for LockKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for LockKey {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for LockKey {}

/// Process-wide source of unique scratch-file names.
///
/// The only contract is uniqueness; names embed the process id and a
/// monotonic counter.
#[derive(Debug)]
pub struct FilenameGenerator {
    directory: PathBuf,
    counter:   AtomicU64,
}

impl FilenameGenerator {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            counter:   AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn next(&self) -> PathBuf {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        self.directory
            .join(format!("apmul-{}-{:05}.ap", process::id(), seq))
    }
}

/// Host configuration consumed by the whole pipeline.
///
/// All size fields are byte counts. The context is passed explicitly to
/// every entry point; there is no ambient global configuration.
#[derive(Clone)]
pub struct Context {
    pub cache_l1_size:           u64,
    pub cache_l2_size:           u64,
    pub cache_burst:             u64,
    pub block_size:              u64,
    pub memory_threshold:        u64,
    pub shared_memory_threshold: u64,
    pub max_memory_block_size:   u64,
    pub num_workers:             usize,
    /// Radix each element carries one digit of; digits lie in `[0, base)`.
    pub base:                    u64,
    pool:                        Arc<rayon::ThreadPool>,
    filenames:                   Arc<FilenameGenerator>,
    shared_lock_key:             LockKey,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// The executor the parallel runner schedules workers on.
    pub fn pool(&self) -> &Arc<rayon::ThreadPool> {
        &self.pool
    }

    pub fn filenames(&self) -> &Arc<FilenameGenerator> {
        &self.filenames
    }

    /// The sentinel keying the shared-memory lock registry.
    pub fn shared_memory_lock(&self) -> &LockKey {
        &self.shared_lock_key
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cache_l1_size", &self.cache_l1_size)
            .field("cache_l2_size", &self.cache_l2_size)
            .field("cache_burst", &self.cache_burst)
            .field("block_size", &self.block_size)
            .field("memory_threshold", &self.memory_threshold)
            .field("shared_memory_threshold", &self.shared_memory_threshold)
            .field("max_memory_block_size", &self.max_memory_block_size)
            .field("num_workers", &self.num_workers)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// Builder with defaults sized for a small desktop machine.
pub struct ContextBuilder {
    cache_l1_size:           u64,
    cache_l2_size:           u64,
    cache_burst:             u64,
    block_size:              u64,
    memory_threshold:        u64,
    shared_memory_threshold: u64,
    max_memory_block_size:   u64,
    num_workers:             usize,
    base:                    u64,
    scratch_directory:       PathBuf,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            cache_l1_size:           1 << 15,
            cache_l2_size:           1 << 22,
            cache_burst:             256,
            block_size:              1 << 16,
            memory_threshold:        1 << 26,
            shared_memory_threshold: 1 << 27,
            max_memory_block_size:   1 << 28,
            num_workers:             thread::available_parallelism().map_or(1, |n| n.get()),
            base:                    10,
            scratch_directory:       std::env::temp_dir(),
        }
    }
}

impl ContextBuilder {
    pub fn cache_l1_size(mut self, bytes: u64) -> Self {
        self.cache_l1_size = bytes;
        self
    }

    pub fn cache_l2_size(mut self, bytes: u64) -> Self {
        self.cache_l2_size = bytes;
        self
    }

    pub fn cache_burst(mut self, bytes: u64) -> Self {
        self.cache_burst = bytes;
        self
    }

    pub fn block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn memory_threshold(mut self, bytes: u64) -> Self {
        self.memory_threshold = bytes;
        self
    }

    pub fn shared_memory_threshold(mut self, bytes: u64) -> Self {
        self.shared_memory_threshold = bytes;
        self
    }

    pub fn max_memory_block_size(mut self, bytes: u64) -> Self {
        self.max_memory_block_size = bytes;
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers.max(1);
        self
    }

    pub fn base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn scratch_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.scratch_directory = directory.into();
        self
    }

    pub fn build(self) -> Result<Context> {
        if self.base < 2 {
            return Err(Error::Internal("digit base must be at least 2"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()
            .map_err(|_| Error::Internal("failed to build worker pool"))?;
        Ok(Context {
            cache_l1_size:           self.cache_l1_size.max(256),
            cache_l2_size:           self.cache_l2_size.max(self.cache_l1_size),
            cache_burst:             self.cache_burst.max(16),
            block_size:              self.block_size.max(256),
            memory_threshold:        self.memory_threshold,
            shared_memory_threshold: self.shared_memory_threshold,
            max_memory_block_size:   self.max_memory_block_size.max(256),
            num_workers:             self.num_workers,
            base:                    self.base,
            pool:                    Arc::new(pool),
            filenames:               Arc::new(FilenameGenerator::new(self.scratch_directory)),
            shared_lock_key:         LockKey::new(),
        })
    }
}
