use {
    crate::{access::AccessMode, disk::DiskBacking},
    apmul_common::{Element, Error, Result},
    std::sync::{RwLockReadGuard, RwLockWriteGuard},
    tracing::warn,
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Reverse,
}

pub(crate) enum IterInner<'a, T: Element> {
    MemRead {
        guard: RwLockReadGuard<'a, Vec<T>>,
    },
    MemWrite {
        guard: RwLockWriteGuard<'a, Vec<T>>,
    },
    Disk {
        backing:   &'a DiskBacking,
        buf:       Vec<T>,
        /// Storage-relative index of `buf[0]`; `u64::MAX` while no page is
        /// loaded.
        buf_start: u64,
        dirty:     bool,
        page:      usize,
    },
}

/// One-element-at-a-time cursor over a `[start, end)` range.
///
/// Disk-backed cursors page `block_size / elementSize` elements at a time;
/// WRITE-only pages are committed wholesale, so write-only cursors must set
/// every position they pass over.
pub struct StorageIterator<'a, T: Element> {
    inner:       IterInner<'a, T>,
    mode:        AccessMode,
    direction:   Direction,
    /// Storage-relative index of the current element.
    pos:         u64,
    remaining:   u64,
    /// Element offset of the storage view inside its backing.
    base_offset: u64,
    closed:      bool,
}

impl<'a, T: Element> StorageIterator<'a, T> {
    pub(crate) fn new(
        inner: IterInner<'a, T>,
        mode: AccessMode,
        direction: Direction,
        start: u64,
        end: u64,
        base_offset: u64,
    ) -> Self {
        let pos = match direction {
            Direction::Forward => start,
            Direction::Reverse => end.saturating_sub(1),
        };
        Self {
            inner,
            mode,
            direction,
            pos,
            remaining: end - start,
            base_offset,
            closed: false,
        }
    }

    pub fn has_next(&self) -> bool {
        self.remaining > 0
    }

    pub fn get(&mut self) -> Result<T> {
        if !self.mode.reads() {
            return Err(Error::Internal("get on a write-only iterator"));
        }
        if self.remaining == 0 {
            return Err(Error::Internal("get on an exhausted iterator"));
        }
        if matches!(self.inner, IterInner::Disk { .. }) {
            self.load_page()?;
        }
        let pos = self.pos;
        let base = self.base_offset;
        match &self.inner {
            IterInner::MemRead { guard } => Ok(guard[(base + pos) as usize]),
            IterInner::MemWrite { guard } => Ok(guard[(base + pos) as usize]),
            IterInner::Disk { buf, buf_start, .. } => Ok(buf[(pos - buf_start) as usize]),
        }
    }

    pub fn set(&mut self, value: T) -> Result<()> {
        if !self.mode.writes() {
            return Err(Error::Internal("set on a read-only iterator"));
        }
        if self.remaining == 0 {
            return Err(Error::Internal("set on an exhausted iterator"));
        }
        if matches!(self.inner, IterInner::Disk { .. }) {
            self.load_page()?;
        }
        let pos = self.pos;
        let base = self.base_offset;
        match &mut self.inner {
            IterInner::MemWrite { guard } => {
                guard[(base + pos) as usize] = value;
                Ok(())
            }
            IterInner::MemRead { .. } => unreachable!("writable iterator holds a write guard"),
            IterInner::Disk {
                buf,
                buf_start,
                dirty,
                ..
            } => {
                buf[(pos - *buf_start) as usize] = value;
                *dirty = true;
                Ok(())
            }
        }
    }

    /// Advances past the current element; an error once the range is
    /// exhausted.
    pub fn next(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(Error::Internal("iterator advanced past its end"));
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            self.pos = match self.direction {
                Direction::Forward => self.pos + 1,
                Direction::Reverse => self.pos - 1,
            };
        }
        Ok(())
    }

    /// Ensures the page holding `self.pos` is resident, flushing the
    /// previous page first.
    fn load_page(&mut self) -> Result<()> {
        let pos = self.pos;
        let base = self.base_offset;
        let mode = self.mode;
        let direction = self.direction;
        let remaining = self.remaining;
        let IterInner::Disk {
            backing,
            buf,
            buf_start,
            dirty,
            page,
        } = &mut self.inner
        else {
            return Ok(());
        };
        if *buf_start != u64::MAX {
            let held = buf.len() as u64;
            if pos >= *buf_start && pos < *buf_start + held {
                return Ok(());
            }
        }
        if *dirty {
            let byte_offset = (base + *buf_start) * T::BYTES;
            backing.write_at(byte_offset, bytemuck::cast_slice(buf.as_slice()))?;
            *dirty = false;
        }
        // Clip the page to the remaining range so whole-page commits never
        // touch elements outside the iteration.
        let span = (*page as u64).min(remaining).max(1);
        let start = match direction {
            Direction::Forward => pos,
            Direction::Reverse => pos + 1 - span,
        };
        buf.clear();
        buf.resize(span as usize, T::default());
        if mode.reads() {
            backing.read_at(
                (base + start) * T::BYTES,
                bytemuck::cast_slice_mut(buf.as_mut_slice()),
            )?;
        }
        *buf_start = start;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let base = self.base_offset;
        if let IterInner::Disk {
            backing,
            buf,
            buf_start,
            dirty,
            ..
        } = &mut self.inner
        {
            if *dirty {
                let byte_offset = (base + *buf_start) * T::BYTES;
                backing.write_at(byte_offset, bytemuck::cast_slice(buf.as_slice()))?;
                *dirty = false;
            }
        }
        Ok(())
    }

    /// Flushes any dirty page and releases the cursor.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.flush()
    }
}

impl<T: Element> Drop for StorageIterator<'_, T> {
    fn drop(&mut self) {
        if !self.closed && self.flush().is_err() {
            warn!("failed to flush iterator page on drop");
        }
    }
}
