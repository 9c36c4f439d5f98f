use {
    crate::{
        access::{AccessInner, AccessMode, ArrayAccess},
        disk::DiskBacking,
        iter::{Direction, IterInner, StorageIterator},
        memory::MemoryBacking,
        transposed::TransposedArray,
    },
    apmul_common::{Context, Element, Error, Result},
    std::{
        io::{Read, Write},
        sync::Arc,
    },
    tracing::{debug, instrument},
};

#[derive(Clone)]
enum Backing<T: Element> {
    Memory(Arc<MemoryBacking<T>>),
    Disk(Arc<DiskBacking>),
}

/// A sequence of elements transparently backed by either a memory array or
/// a scratch file, chosen purely from the configured thresholds.
///
/// Subsequence views share the backing; writes through the root are visible
/// through every overlapping view, and the backing is destroyed exactly
/// once when the last handle drops (disk files are unlinked eagerly).
pub struct DataStorage<T: Element> {
    backing:   Backing<T>,
    offset:    u64,
    length:    u64,
    read_only: bool,
    is_view:   bool,
    cached:    bool,
}

impl<T: Element> DataStorage<T> {
    /// At-rest storage sized `size_bytes`; memory-backed below the memory
    /// threshold, disk-backed above it.
    pub fn new(ctx: &Context, size_bytes: u64) -> Result<Self> {
        let length = size_bytes / T::BYTES;
        if size_bytes <= ctx.memory_threshold {
            Self::new_memory(length)
        } else {
            Self::new_disk(ctx, length)
        }
    }

    /// Transient storage; prefers memory up to the larger cached bound.
    pub fn new_cached(ctx: &Context, size_bytes: u64) -> Result<Self> {
        let length = size_bytes / T::BYTES;
        let mut storage = if size_bytes <= ctx.max_memory_block_size {
            Self::new_memory(length)?
        } else {
            Self::new_disk(ctx, length)?
        };
        storage.cached = true;
        Ok(storage)
    }

    fn new_memory(length: u64) -> Result<Self> {
        let len = usize::try_from(length).map_err(|_| Error::SizeTooLarge)?;
        len.checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::SizeTooLarge)?;
        Ok(Self {
            backing:   Backing::Memory(Arc::new(MemoryBacking::new(len))),
            offset:    0,
            length,
            read_only: false,
            is_view:   false,
            cached:    false,
        })
    }

    fn new_disk(ctx: &Context, length: u64) -> Result<Self> {
        let backing = DiskBacking::create(ctx)?;
        backing.set_byte_len(0, length * T::BYTES)?;
        Ok(Self {
            backing:   Backing::Disk(Arc::new(backing)),
            offset:    0,
            length,
            read_only: false,
            is_view:   false,
            cached:    false,
        })
    }

    /// Converts a cached storage into an at-rest one, migrating it to disk
    /// when it has outgrown the memory threshold.
    #[instrument(skip_all, fields(elements = storage.length))]
    pub fn promote(ctx: &Context, storage: Self) -> Result<Self> {
        let bytes = storage.length * T::BYTES;
        match &storage.backing {
            Backing::Memory(_) if storage.cached && bytes > ctx.memory_threshold => {
                debug!(bytes, "migrating cached storage to disk");
                let mut target = Self::new_disk(ctx, storage.length)?;
                target.copy_from(ctx, &storage, storage.length)?;
                Ok(target)
            }
            _ => {
                let mut storage = storage;
                storage.cached = false;
                Ok(storage)
            }
        }
    }

    /// Number of elements.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_disk_backed(&self) -> bool {
        matches!(self.backing, Backing::Disk(_))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_view(&self) -> bool {
        self.is_view
    }

    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Whether two storages share one backing (e.g. a view and its root).
    pub fn same_backing(a: &Self, b: &Self) -> bool {
        match (&a.backing, &b.backing) {
            (Backing::Memory(x), Backing::Memory(y)) => Arc::ptr_eq(x, y),
            (Backing::Disk(x), Backing::Disk(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Whether two storages denote the same element sequence: one backing,
    /// one range.
    pub fn same_sequence(a: &Self, b: &Self) -> bool {
        Self::same_backing(a, b) && a.offset == b.offset && a.length == b.length
    }

    /// Resizes to `new_length` elements; grow zero-pads, shrink truncates.
    /// Only permitted on non-view, writable roots.
    pub fn set_size(&mut self, new_length: u64) -> Result<()> {
        if self.is_view {
            return Err(Error::Internal("set_size on a subsequence view"));
        }
        if self.read_only {
            return Err(Error::Internal("set_size on a read-only storage"));
        }
        match &self.backing {
            Backing::Memory(memory) => {
                let len = usize::try_from(new_length).map_err(|_| Error::SizeTooLarge)?;
                len.checked_mul(std::mem::size_of::<T>())
                    .ok_or(Error::SizeTooLarge)?;
                memory.resize(len)?;
            }
            Backing::Disk(disk) => {
                disk.set_byte_len(self.length * T::BYTES, new_length * T::BYTES)?;
            }
        }
        self.length = new_length;
        Ok(())
    }

    /// Resizes to `count` elements and copies `min(other.len, count)` of
    /// `other`; the remainder is zero. Disk-to-disk copies run a direct
    /// channel transfer, every other combination a block-buffered loop.
    #[instrument(skip_all, fields(count))]
    pub fn copy_from(&mut self, ctx: &Context, other: &Self, count: u64) -> Result<()> {
        self.set_size(count)?;
        let copied = other.length.min(count);
        let block = (ctx.block_size / T::BYTES).max(1);
        match (&self.backing, &other.backing) {
            (Backing::Disk(dst), Backing::Disk(src)) if !Arc::ptr_eq(dst, src) => {
                dst.transfer_from(
                    src,
                    other.offset * T::BYTES,
                    self.offset * T::BYTES,
                    copied * T::BYTES,
                )?;
            }
            _ => {
                let mut position = 0;
                while position < copied {
                    let len = block.min(copied - position);
                    let source = other.get_array(AccessMode::Read, position, len)?;
                    let mut target = self.get_array(AccessMode::Write, position, len)?;
                    target.as_mut_slice().copy_from_slice(source.as_slice());
                    target.close()?;
                    source.close()?;
                    position += len;
                }
            }
        }
        // Zero the tail; a shrunken-then-regrown backing may hold stale data.
        let mut position = copied;
        while position < count {
            let len = block.min(count - position);
            let mut target = self.get_array(AccessMode::Write, position, len)?;
            target.as_mut_slice().fill(T::default());
            target.close()?;
            position += len;
        }
        Ok(())
    }

    /// A view sharing this backing, read-only iff the parent is.
    pub fn subsequence(&self, offset: u64, length: u64) -> Result<Self> {
        if offset
            .checked_add(length)
            .is_none_or(|end| end > self.length)
        {
            return Err(Error::Internal("subsequence out of range"));
        }
        Ok(Self {
            backing:   self.backing.clone(),
            offset:    self.offset + offset,
            length,
            read_only: self.read_only,
            is_view:   true,
            cached:    self.cached,
        })
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        if offset
            .checked_add(length)
            .is_none_or(|end| end > self.length)
        {
            return Err(Error::Internal("storage access out of range"));
        }
        Ok(())
    }

    fn check_mode(&self, mode: AccessMode) -> Result<()> {
        if mode.writes() && self.read_only {
            return Err(Error::Internal("write access to a read-only storage"));
        }
        Ok(())
    }

    /// Borrows `length` elements starting at `offset` for the declared
    /// mode.
    pub fn get_array(
        &self,
        mode: AccessMode,
        offset: u64,
        length: u64,
    ) -> Result<ArrayAccess<'_, T>> {
        self.check_range(offset, length)?;
        self.check_mode(mode)?;
        let len = usize::try_from(length).map_err(|_| Error::SizeTooLarge)?;
        let absolute = self.offset + offset;
        let inner = match &self.backing {
            Backing::Memory(memory) => {
                let offset = usize::try_from(absolute).map_err(|_| Error::SizeTooLarge)?;
                if mode == AccessMode::Read {
                    AccessInner::MemRead {
                        guard: memory.read()?,
                        offset,
                    }
                } else {
                    AccessInner::MemWrite {
                        guard: memory.write()?,
                        offset,
                    }
                }
            }
            Backing::Disk(disk) => {
                let mut buf = vec![T::default(); len];
                if mode.reads() {
                    disk.read_at(absolute * T::BYTES, bytemuck::cast_slice_mut(buf.as_mut_slice()))?;
                }
                AccessInner::Disk {
                    backing: disk.as_ref(),
                    buf,
                    byte_offset: absolute * T::BYTES,
                    dirty: false,
                }
            }
        };
        Ok(ArrayAccess::new(inner, mode, len))
    }

    /// Transposed view of the `columns × rows` submatrix starting at
    /// `start_column` of the on-disk `rows × (len/rows)` matrix. Memory
    /// backings reject this: they are already random-access.
    pub fn get_transposed_array(
        &self,
        mode: AccessMode,
        start_column: u64,
        columns: u64,
        rows: u64,
    ) -> Result<TransposedArray<'_, T>> {
        let Backing::Disk(disk) = &self.backing else {
            return Err(Error::Internal("transposed access on a memory storage"));
        };
        self.check_mode(mode)?;
        if rows == 0 || self.length % rows != 0 {
            return Err(Error::Internal("transposed access with a ragged row count"));
        }
        let row_length = self.length / rows;
        if start_column
            .checked_add(columns)
            .is_none_or(|end| end > row_length)
        {
            return Err(Error::Internal("transposed access out of range"));
        }
        TransposedArray::open(
            disk.as_ref(),
            mode,
            self.offset,
            start_column,
            usize::try_from(columns).map_err(|_| Error::SizeTooLarge)?,
            usize::try_from(rows).map_err(|_| Error::SizeTooLarge)?,
            row_length,
        )
    }

    /// Forward cursor over `[start, end)`.
    pub fn iterator(
        &self,
        mode: AccessMode,
        start: u64,
        end: u64,
    ) -> Result<StorageIterator<'_, T>> {
        self.cursor(mode, start, end, Direction::Forward)
    }

    /// Reverse cursor walking `end − 1` down to `start`.
    pub fn reverse_iterator(
        &self,
        mode: AccessMode,
        start: u64,
        end: u64,
    ) -> Result<StorageIterator<'_, T>> {
        self.cursor(mode, start, end, Direction::Reverse)
    }

    fn cursor(
        &self,
        mode: AccessMode,
        start: u64,
        end: u64,
        direction: Direction,
    ) -> Result<StorageIterator<'_, T>> {
        if start > end {
            return Err(Error::Internal("iterator range is inverted"));
        }
        self.check_range(start, end - start)?;
        self.check_mode(mode)?;
        let inner = match &self.backing {
            Backing::Memory(memory) => {
                usize::try_from(self.offset + end).map_err(|_| Error::SizeTooLarge)?;
                if mode == AccessMode::Read {
                    IterInner::MemRead {
                        guard: memory.read()?,
                    }
                } else {
                    IterInner::MemWrite {
                        guard: memory.write()?,
                    }
                }
            }
            Backing::Disk(disk) => IterInner::Disk {
                backing:   disk.as_ref(),
                buf:       Vec::new(),
                buf_start: u64::MAX,
                dirty:     false,
                page:      usize::try_from(disk.block_bytes / T::BYTES)
                    .map_err(|_| Error::SizeTooLarge)?
                    .max(1),
            },
        };
        Ok(StorageIterator::new(
            inner,
            mode,
            direction,
            start,
            end,
            self.offset,
        ))
    }

    /// Streams element count then raw little-endian bytes.
    pub fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
        sink.write_all(&self.length.to_le_bytes())
            .map_err(|cause| Error::io("<sink>", cause))?;
        match &self.backing {
            Backing::Memory(memory) => {
                let guard = memory.read()?;
                let start = self.offset as usize;
                let end = start + self.length as usize;
                sink.write_all(bytemuck::cast_slice(&guard[start..end]))
                    .map_err(|cause| Error::io("<sink>", cause))?;
            }
            Backing::Disk(disk) => {
                disk.stream_to(sink, self.offset * T::BYTES, self.length * T::BYTES)?;
            }
        }
        Ok(())
    }

    /// Recreates a storage previously written with [`Self::write_to`].
    pub fn read_from(ctx: &Context, source: &mut dyn Read) -> Result<Self> {
        let mut header = [0u8; 8];
        source
            .read_exact(&mut header)
            .map_err(|cause| Error::io("<source>", cause))?;
        let length = u64::from_le_bytes(header);
        let bytes = length.checked_mul(T::BYTES).ok_or(Error::SizeTooLarge)?;
        let storage = Self::new(ctx, bytes)?;
        let block = (ctx.block_size / T::BYTES).max(1);
        let mut position = 0;
        while position < length {
            let len = block.min(length - position);
            let mut target = storage.get_array(AccessMode::Write, position, len)?;
            source
                .read_exact(bytemuck::cast_slice_mut(target.as_mut_slice()))
                .map_err(|cause| Error::io("<source>", cause))?;
            target.close()?;
            position += len;
        }
        Ok(storage)
    }
}
