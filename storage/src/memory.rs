use {
    apmul_common::{Element, Error, Result},
    std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Memory-backed element buffer shared between a storage root and its
/// subsequence views. The lock only arbitrates structural changes against
/// open handles; overlapping writable handles are excluded by the pipeline.
pub(crate) struct MemoryBacking<T: Element> {
    data: RwLock<Vec<T>>,
}

impl<T: Element> MemoryBacking<T> {
    pub fn new(length: usize) -> Self {
        Self {
            data: RwLock::new(vec![T::default(); length]),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Vec<T>>> {
        self.data.read().map_err(|_| Error::Interrupted)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<T>>> {
        self.data.write().map_err(|_| Error::Interrupted)
    }

    /// Grow zero-pads, shrink truncates.
    pub fn resize(&self, length: usize) -> Result<()> {
        self.write()?.resize(length, T::default());
        Ok(())
    }
}
