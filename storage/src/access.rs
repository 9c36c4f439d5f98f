use {
    crate::disk::DiskBacking,
    apmul_common::{Element, Result},
    std::sync::{RwLockReadGuard, RwLockWriteGuard},
    tracing::warn,
};

/// Declared intent of a storage handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn reads(self) -> bool {
        !matches!(self, AccessMode::Write)
    }

    pub fn writes(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

pub(crate) enum AccessInner<'a, T: Element> {
    MemRead {
        guard:  RwLockReadGuard<'a, Vec<T>>,
        offset: usize,
    },
    MemWrite {
        guard:  RwLockWriteGuard<'a, Vec<T>>,
        offset: usize,
    },
    Disk {
        backing:     &'a DiskBacking,
        buf:         Vec<T>,
        byte_offset: u64,
        dirty:       bool,
    },
}

/// Short-lived borrow of a contiguous block of elements.
///
/// Memory handles alias the backing directly through a lock guard; disk
/// handles stage the block in a buffer. Exactly one of two release paths
/// must run: `close` commits buffered writes, dropping without close
/// abandons them (with a warning when writes would be lost).
pub struct ArrayAccess<'a, T: Element> {
    inner:  AccessInner<'a, T>,
    mode:   AccessMode,
    len:    usize,
    closed: bool,
}

impl<'a, T: Element> ArrayAccess<'a, T> {
    pub(crate) fn new(inner: AccessInner<'a, T>, mode: AccessMode, len: usize) -> Self {
        Self {
            inner,
            mode,
            len,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.inner {
            AccessInner::MemRead { guard, offset } => &guard[*offset..*offset + self.len],
            AccessInner::MemWrite { guard, offset } => &guard[*offset..*offset + self.len],
            AccessInner::Disk { buf, .. } => &buf[..self.len],
        }
    }

    /// # Panics
    ///
    /// Panics when the handle was opened read-only; writing through a READ
    /// handle is a bug in the caller.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        assert!(
            self.mode.writes(),
            "write access through a read-only array handle"
        );
        match &mut self.inner {
            AccessInner::MemWrite { guard, offset } => {
                let offset = *offset;
                &mut guard[offset..offset + self.len]
            }
            AccessInner::Disk { buf, dirty, .. } => {
                *dirty = true;
                &mut buf[..self.len]
            }
            AccessInner::MemRead { .. } => unreachable!("read handle carries no write guard"),
        }
    }

    /// Commits buffered writes (disk handles) and releases the handle.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        if let AccessInner::Disk {
            backing,
            buf,
            byte_offset,
            dirty,
        } = &mut self.inner
        {
            if *dirty {
                backing.write_at(*byte_offset, bytemuck::cast_slice(buf.as_slice()))?;
                *dirty = false;
            }
        }
        Ok(())
    }

    /// Releases the handle without committing buffered writes.
    pub fn abandon(mut self) {
        self.closed = true;
        if let AccessInner::Disk { dirty, .. } = &mut self.inner {
            *dirty = false;
        }
    }
}

impl<T: Element> Drop for ArrayAccess<'_, T> {
    fn drop(&mut self) {
        if !self.closed {
            if let AccessInner::Disk { dirty: true, .. } = &self.inner {
                warn!("array access dropped with uncommitted writes");
            }
        }
    }
}
