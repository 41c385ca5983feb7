//! Shared region management
//!
//! A pool's header, TOC and ring live in one [`SharedRegion`]. The engine
//! only talks to the trait, so the ring algorithm is the same over a file
//! mapping shared between processes and over plain process memory.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{PoolError, Result};

/// Byte-addressed shared memory with a cross-process writer lock
pub trait SharedRegion: Send + Sync {
    /// Region size in bytes
    fn len(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Copy `bytes` into the region at `offset`
    fn write(&self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// The 64-bit word at `offset`
    ///
    /// # Panics
    ///
    /// If `offset` is not 8-aligned or the word lies outside the region.
    fn word(&self, offset: usize) -> &AtomicU64;

    /// Block until this caller holds the writer lock
    fn lock(&self) -> Result<RegionGuard<'_>>;

    /// Push written bytes to the backing store
    fn flush(&self) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writer lock, released on drop
pub struct RegionGuard<'a> {
    _local: MutexGuard<'a, ()>,
    #[cfg(unix)]
    file: Option<&'a std::fs::File>,
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(file) = self.file {
            unix_impl::unlock(file);
        }
    }
}

fn check_range(len: usize, offset: usize, n: usize) -> Result<()> {
    match offset.checked_add(n) {
        Some(end) if end <= len => Ok(()),
        _ => Err(PoolError::corrupt(format!(
            "access of {} bytes at {} outside region of {} bytes",
            n, offset, len
        ))),
    }
}

/// Region in ordinary process memory, shared between threads
pub struct InMemoryRegion {
    words: Box<[AtomicU64]>,
    lock: Mutex<()>,
}

impl InMemoryRegion {
    /// Zeroed region of at least `len` bytes, rounded up to whole words
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(8)).map(|_| AtomicU64::new(0)).collect();
        Self { words, lock: Mutex::new(()) }
    }
}

impl SharedRegion for InMemoryRegion {
    fn len(&self) -> usize {
        self.words.len() * 8
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_range(self.len(), offset, buf.len())?;
        let mut pos = offset;
        let mut rest = &mut buf[..];
        while !rest.is_empty() {
            let within = pos % 8;
            let take = (8 - within).min(rest.len());
            let word = self.words[pos / 8].load(Ordering::Acquire).to_ne_bytes();
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(take);
            head.copy_from_slice(&word[within..within + take]);
            pos += take;
            rest = tail;
        }
        Ok(())
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_range(self.len(), offset, bytes.len())?;
        let mut pos = offset;
        let mut rest = bytes;
        while !rest.is_empty() {
            let within = pos % 8;
            let take = (8 - within).min(rest.len());
            let cell = &self.words[pos / 8];
            let mut word = cell.load(Ordering::Relaxed).to_ne_bytes();
            word[within..within + take].copy_from_slice(&rest[..take]);
            cell.store(u64::from_ne_bytes(word), Ordering::Release);
            pos += take;
            rest = &rest[take..];
        }
        Ok(())
    }

    fn word(&self, offset: usize) -> &AtomicU64 {
        assert!(offset % 8 == 0, "unaligned word offset {}", offset);
        &self.words[offset / 8]
    }

    fn lock(&self) -> Result<RegionGuard<'_>> {
        Ok(RegionGuard {
            _local: self.lock.lock(),
            #[cfg(unix)]
            file: None,
        })
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
pub use unix_impl::{check_in_use, lock_unused, MmapRegion};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    use memmap2::MmapRaw;
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use tracing::{debug, warn};

    /// File mapping shared between processes
    ///
    /// The backing file is held under a shared `flock` for the life of the
    /// mapping, which is how other processes tell the pool is in use. The
    /// writer lock is an exclusive `flock` on a separate lock file, taken
    /// together with an in-process mutex because `flock` does not exclude
    /// threads sharing one descriptor.
    pub struct MmapRegion {
        path: PathBuf,
        map: MmapRaw,
        _file: File,
        lock_file: File,
        local: Mutex<()>,
    }

    impl MmapRegion {
        /// Create and map a new zeroed file of `len` bytes
        pub fn create(path: impl AsRef<Path>, len: usize, lock_path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)?;
            file.set_len(len as u64)?;
            let region = Self::map(path, file, lock_path.as_ref())?;
            debug!(path = %path.display(), len, "created mapped region");
            Ok(region)
        }

        /// Map an existing file
        pub fn open(path: impl AsRef<Path>, lock_path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            Self::map(path, file, lock_path.as_ref())
        }

        fn map(path: &Path, file: File, lock_path: &Path) -> Result<Self> {
            flock(file.as_raw_fd(), FlockArg::LockShared)?;
            // a dispose or resize may have unlinked the file while we waited
            let linked = std::fs::metadata(path)?;
            let opened = file.metadata()?;
            if linked.ino() != opened.ino() || linked.dev() != opened.dev() {
                return Err(PoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} was replaced while opening", path.display()),
                )));
            }
            let map = MmapRaw::map_raw(&file)?;
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(lock_path)?;
            Ok(Self {
                path: path.to_path_buf(),
                map,
                _file: file,
                lock_file,
                local: Mutex::new(()),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl SharedRegion for MmapRegion {
        fn len(&self) -> usize {
            self.map.len()
        }

        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
            check_range(self.len(), offset, buf.len())?;
            unsafe {
                std::ptr::copy_nonoverlapping(self.map.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
            }
            Ok(())
        }

        fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
            check_range(self.len(), offset, bytes.len())?;
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.map.as_mut_ptr().add(offset), bytes.len());
            }
            Ok(())
        }

        fn word(&self, offset: usize) -> &AtomicU64 {
            assert!(offset % 8 == 0, "unaligned word offset {}", offset);
            assert!(offset + 8 <= self.len(), "word offset {} outside region", offset);
            // the mapping is page aligned, so 8-aligned offsets are aligned words
            unsafe { &*(self.map.as_ptr().add(offset) as *const AtomicU64) }
        }

        fn lock(&self) -> Result<RegionGuard<'_>> {
            let local = self.local.lock();
            loop {
                match flock(self.lock_file.as_raw_fd(), FlockArg::LockExclusive) {
                    Ok(()) => break,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(RegionGuard { _local: local, file: Some(&self.lock_file) })
        }

        fn flush(&self) -> Result<()> {
            self.map.flush()?;
            Ok(())
        }
    }

    pub(super) fn unlock(file: &File) {
        if let Err(e) = flock(file.as_raw_fd(), FlockArg::Unlock) {
            warn!(error = %e, "failed to release writer lock");
        }
    }

    /// `Err(InUse)` while any process holds a mapping of the file at `path`
    pub fn check_in_use(path: impl AsRef<Path>) -> Result<()> {
        let file = lock_unused(path)?;
        unlock(&file);
        Ok(())
    }

    /// Hold the file at `path` exclusively, so nothing can map it until
    /// the returned file is dropped; `Err(InUse)` if something already has
    pub fn lock_unused(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        let file = File::open(path)?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(file),
            Err(Errno::EWOULDBLOCK) => Err(PoolError::InUse(path.display().to_string())),
            Err(e) => Err(e.into()),
        }
    }

    // Safety: all access to the mapping goes through bounds-checked copies,
    // atomics, or the writer lock
    unsafe impl Send for MmapRegion {}
    unsafe impl Sync for MmapRegion {}
}
