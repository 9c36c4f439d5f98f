use {
    crate::scratch,
    apmul_common::{Context, Error, Result},
    std::{
        fs::{File, OpenOptions},
        io::{self, Read, Seek, SeekFrom, Write},
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    },
    tracing::debug,
};

/// Scratch-file backing for one disk storage.
///
/// The file is created eagerly, registered for cleanup, and unlinked when
/// the last handle drops. Transfers go through seek + exact read/write
/// loops; any failed operation gets one retry behind a cleanup sweep.
pub(crate) struct DiskBacking {
    path:        PathBuf,
    file:        Mutex<File>,
    /// Set when an operation failed even after the retry; the storage is
    /// no longer usable and only waits to be dropped.
    poisoned:    AtomicBool,
    /// I/O granularity for iterators and buffered copies.
    pub block_bytes: u64,
    /// L1 size steering the transposed-array tiling.
    pub l1_bytes:    u64,
}

impl DiskBacking {
    pub fn create(ctx: &Context) -> Result<Self> {
        let path = ctx.filenames().next();
        let file = match Self::open_new(&path) {
            Ok(file) => file,
            Err(_first) => {
                // One retry after reclaiming freed scratch files.
                scratch::gc();
                Self::open_new(&path)
                    .map_err(|cause| Error::io(path.display().to_string(), cause))?
            }
        };
        scratch::register(&path);
        debug!(path = %path.display(), "created scratch file");
        Ok(Self {
            path,
            file: Mutex::new(file),
            poisoned: AtomicBool::new(false),
            block_bytes: ctx.block_size,
            l1_bytes: ctx.cache_l1_size,
        })
    }

    fn open_new(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
    }

    fn filename(&self) -> String {
        self.path.display().to_string()
    }

    /// Runs `op` on the file, retrying once after a cleanup sweep. `op`
    /// must be self-contained (seek included) so the retry starts fresh.
    /// A second failure poisons the backing.
    fn with_file<R>(&self, mut op: impl FnMut(&mut File) -> io::Result<R>) -> Result<R> {
        if self.poisoned.load(Ordering::Relaxed) {
            return Err(Error::Internal("storage poisoned by an earlier i/o failure"));
        }
        let mut file = self.file.lock().map_err(|_| Error::Interrupted)?;
        match op(&mut file) {
            Ok(value) => Ok(value),
            Err(_first) => {
                scratch::gc();
                op(&mut file).map_err(|cause| {
                    self.poisoned.store(true, Ordering::Relaxed);
                    Error::io(self.filename(), cause)
                })
            }
        }
    }

    pub fn read_at(&self, byte_offset: u64, buf: &mut [u8]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(byte_offset))?;
            file.read_exact(buf)
        })
    }

    pub fn write_at(&self, byte_offset: u64, buf: &[u8]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(byte_offset))?;
            file.write_all(buf)
        })
    }

    /// Truncates or extends the file; grown space is zero-filled
    /// explicitly in `block_bytes` chunks.
    pub fn set_byte_len(&self, old_len: u64, new_len: u64) -> Result<()> {
        let block = self.block_bytes as usize;
        self.with_file(|file| {
            file.set_len(new_len)?;
            if new_len > old_len {
                file.seek(SeekFrom::Start(old_len))?;
                let zeros = vec![0u8; block.min((new_len - old_len) as usize)];
                let mut remaining = new_len - old_len;
                while remaining > 0 {
                    let chunk = zeros.len().min(remaining as usize);
                    file.write_all(&zeros[..chunk])?;
                    remaining -= chunk as u64;
                }
            }
            Ok(())
        })
    }

    /// Direct channel-to-channel transfer between two distinct backings.
    pub fn transfer_from(
        &self,
        other: &DiskBacking,
        src_byte_offset: u64,
        dst_byte_offset: u64,
        bytes: u64,
    ) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Err(Error::Internal("disk transfer within one backing"));
        }
        // Lock in address order so concurrent opposite-direction copies
        // cannot deadlock.
        let (first, second) = if (self as *const DiskBacking) < (other as *const DiskBacking) {
            (&self.file, &other.file)
        } else {
            (&other.file, &self.file)
        };
        let mut a = first.lock().map_err(|_| Error::Interrupted)?;
        let mut b = second.lock().map_err(|_| Error::Interrupted)?;
        let (dst, src) = if std::ptr::eq(first, &self.file) {
            (&mut *a, &mut *b)
        } else {
            (&mut *b, &mut *a)
        };
        let run = |dst: &mut File, src: &mut File| -> io::Result<()> {
            src.seek(SeekFrom::Start(src_byte_offset))?;
            dst.seek(SeekFrom::Start(dst_byte_offset))?;
            let mut limited = Read::by_ref(src).take(bytes);
            let copied = io::copy(&mut limited, dst)?;
            if copied != bytes {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short scratch-file transfer",
                ));
            }
            Ok(())
        };
        match run(&mut *dst, &mut *src) {
            Ok(()) => Ok(()),
            Err(_first) => {
                scratch::gc();
                run(&mut *dst, &mut *src).map_err(|cause| {
                    self.poisoned.store(true, Ordering::Relaxed);
                    Error::io(self.filename(), cause)
                })
            }
        }
    }

    /// Streams `bytes` starting at `byte_offset` into `sink`.
    pub fn stream_to(
        &self,
        sink: &mut dyn Write,
        byte_offset: u64,
        bytes: u64,
    ) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| Error::Interrupted)?;
        let mut stream = |file: &mut File| -> io::Result<()> {
            file.seek(SeekFrom::Start(byte_offset))?;
            let mut limited = Read::by_ref(file).take(bytes);
            let copied = io::copy(&mut limited, sink)?;
            if copied != bytes {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short scratch-file stream",
                ));
            }
            Ok(())
        };
        stream(&mut file).map_err(|cause| Error::io(self.filename(), cause))
    }
}

impl Drop for DiskBacking {
    fn drop(&mut self) {
        scratch::unregister_and_delete(&self.path);
    }
}
