//! Pool hoses
//!
//! A [`Hose`] is one caller's cursor onto a pool. Hoses opened by
//! [`crate::Pools::participate`] share nothing but the backing file; a
//! hose made with `clone` shares its parent's mapping and keeps its own
//! position.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use plasma_slaw::{FetchRequest, FetchedParts, Protein, Slaw};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::context::{self, LOCK_FILE, POOL_FILE};
use crate::engine::{PoolEngine, PoolInfo, StoredEntry, TimeComparison, WriteGuard};
use crate::error::{Awaited, PoolError, Progress, Result, Timeout};
use crate::layout::flags;
use crate::notify::{self, Waiter, Waker};
use crate::options::{self, OptionChanges};
use crate::region::MmapRegion;

/// A protein read from a pool
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved {
    pub index: u64,
    /// Seconds since the Unix epoch
    pub stamp: f64,
    pub protein: Protein,
}

impl Retrieved {
    fn from_entry(entry: StoredEntry) -> Result<Self> {
        Ok(Self { index: entry.index, stamp: entry.stamp, protein: entry.protein()? })
    }
}

/// One read in a [`Hose::fetch`] batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOp {
    pub index: u64,
    pub request: FetchRequest,
}

impl FetchOp {
    pub fn new(index: u64, request: FetchRequest) -> Self {
        Self { index, request }
    }
}

/// The part of a protein a [`FetchOp`] asked for
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Index actually read, which differs from the request when clamped
    pub index: u64,
    pub stamp: f64,
    pub parts: FetchedParts,
}

/// Results of a [`Hose::fetch`], in request order
#[derive(Debug)]
pub struct FetchBatch {
    pub results: Vec<Result<Fetched>>,
    pub oldest_index: Option<u64>,
    pub newest_index: Option<u64>,
}

/// One process's attachment to a pool's backing file
pub(crate) struct PoolHandle {
    name: String,
    dir: PathBuf,
    spin_limit: u32,
    engine: RwLock<Option<Arc<PoolEngine>>>,
}

impl PoolHandle {
    pub fn open(name: &str, dir: &Path, spin_limit: u32) -> Result<Self> {
        let engine = Self::open_engine(name, dir, spin_limit)?;
        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            spin_limit,
            engine: RwLock::new(Some(engine)),
        })
    }

    fn open_engine(name: &str, dir: &Path, spin_limit: u32) -> Result<Arc<PoolEngine>> {
        let region = MmapRegion::open(dir.join(POOL_FILE), dir.join(LOCK_FILE)).map_err(|e| match e {
            PoolError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => PoolError::NoSuchPool(name.to_string()),
            e => e,
        })?;
        Ok(Arc::new(PoolEngine::open(Arc::new(region), spin_limit)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The live engine, reattaching if a resize replaced the backing file
    pub fn engine(&self) -> Result<Arc<PoolEngine>> {
        let current = self.engine.read().clone().ok_or_else(|| PoolError::NoSuchPool(self.name.clone()))?;
        if !current.is_retired() {
            return Ok(current);
        }
        self.refresh(&current)
    }

    fn refresh(&self, stale: &Arc<PoolEngine>) -> Result<Arc<PoolEngine>> {
        let mut slot = self.engine.write();
        if slot.as_ref().is_some_and(|e| Arc::ptr_eq(e, stale)) {
            let engine = Self::open_engine(&self.name, &self.dir, self.spin_limit)?;
            debug!(pool = %self.name, capacity = engine.capacity(), "reattached to resized pool");
            *slot = Some(engine);
        }
        slot.clone().ok_or_else(|| PoolError::NoSuchPool(self.name.clone()))
    }

    /// Unmap the backing file
    fn release(&self) {
        self.engine.write().take();
    }

    /// Run `op` under the writer lock of the current backing file
    fn with_lock<T>(&self, op: impl FnOnce(&WriteGuard<'_>) -> Result<T>) -> Result<T> {
        loop {
            let engine = self.engine()?;
            let guard = engine.lock()?;
            if guard.is_retired() {
                drop(guard);
                self.refresh(&engine)?;
                continue;
            }
            return op(&guard);
        }
    }

    fn deposit(&self, protein: &Protein) -> Result<(u64, f64)> {
        let deposited = self.with_lock(|g| g.deposit(protein))?;
        if let Err(e) = notify::notify_all(&self.dir) {
            warn!(pool = %self.name, error = %e, "failed to notify waiters");
        }
        Ok(deposited)
    }

    fn resize(&self, size: u64) -> Result<Progress> {
        let capacity = options::ring_capacity(size)?;
        let progress = self.with_lock(|g| {
            let old = g.engine();
            if old.flags() & flags::RESIZABLE == 0 {
                return Err(PoolError::Unsupported("pool is not resizable".into()));
            }
            if capacity == old.capacity() {
                return Ok(Progress::NothingToDo);
            }
            let live = self.dir.join(POOL_FILE);
            let scratch = self.dir.join(format!("{}.{}.resize", POOL_FILE, Uuid::new_v4().simple()));
            let replaced = self.replace_backing(g, &live, &scratch, capacity);
            if replaced.is_err() {
                let _ = fs::remove_file(&scratch);
            }
            let kept = replaced?;
            g.retire();
            debug!(pool = %self.name, from = old.capacity(), to = capacity, kept, "resized pool");
            Ok(Progress::Done)
        })?;
        if progress == Progress::Done {
            self.engine()?;
            context::update_conf(&self.dir, |o| o.size = capacity)?;
        }
        Ok(progress)
    }

    /// Build a pool of `capacity` bytes at `scratch`, copy what fits and
    /// move it over `live`
    fn replace_backing(&self, g: &WriteGuard<'_>, live: &Path, scratch: &Path, capacity: u64) -> Result<u64> {
        let old = g.engine();
        let len = PoolEngine::required_len(capacity, old.toc_capacity())?;
        let region = MmapRegion::create(scratch, len, self.dir.join(LOCK_FILE))?;
        let meta = fs::metadata(live)?;
        fs::set_permissions(scratch, meta.permissions())?;
        if let Err(e) = nix::unistd::chown(
            scratch,
            Some(nix::unistd::Uid::from_raw(meta.uid())),
            Some(nix::unistd::Gid::from_raw(meta.gid())),
        ) {
            warn!(error = %e, "could not carry pool file ownership across resize");
        }
        let target = PoolEngine::format(Arc::new(region), capacity, old.toc_capacity(), old.flags(), self.spin_limit)?;
        let kept = g.copy_into(&target)?;
        target.flush()?;
        fs::rename(scratch, live)?;
        Ok(kept)
    }

    fn change_options(&self, changes: &OptionChanges) -> Result<Progress> {
        let (set, clear) = changes.flag_delta();
        let progress = self.with_lock(|g| Ok(g.change_flags(set, clear)))?;
        if progress == Progress::Done {
            context::update_conf(&self.dir, |o| {
                o.stop_when_full = changes.stop_when_full.unwrap_or(o.stop_when_full);
                o.frozen = changes.frozen.unwrap_or(o.frozen);
                o.auto_dispose = changes.auto_dispose.unwrap_or(o.auto_dispose);
                o.checksum = changes.checksum.unwrap_or(o.checksum);
            })?;
        }
        Ok(progress)
    }
}

/// A cursor onto a pool
///
/// The position is the index `next` will read. A hose is not meant for
/// use by several threads at once; share the pool by opening or cloning
/// more hoses.
pub struct Hose {
    pool: Arc<PoolHandle>,
    name: String,
    index: u64,
    waiter: Option<Waiter>,
    withdrawn: bool,
}

impl Hose {
    /// A hose positioned past the newest protein
    pub(crate) fn attach(pool: Arc<PoolHandle>) -> Result<Self> {
        let index = pool.engine()?.next_index()?;
        let name = pool.name().to_string();
        debug!(pool = %name, index, "participating");
        Ok(Self { pool, name, index, waiter: None, withdrawn: false })
    }

    /// Name of the pool
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Diagnostic name of this hose
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Current position
    pub fn index(&self) -> u64 {
        self.index
    }

    fn engine(&self) -> Result<Arc<PoolEngine>> {
        self.pool.engine()
    }

    // ---- pool-wide operations ----

    /// Append a protein; returns its index and timestamp
    #[instrument(level = "trace", skip(self, protein), fields(pool = %self.pool.name()))]
    pub fn deposit(&self, protein: &Protein) -> Result<(u64, f64)> {
        self.pool.deposit(protein)
    }

    pub fn oldest_index(&self) -> Result<u64> {
        self.engine()?.oldest_index()
    }

    pub fn newest_index(&self) -> Result<u64> {
        self.engine()?.newest_index()
    }

    /// Read `index` without moving the cursor
    pub fn nth(&self, index: u64) -> Result<Retrieved> {
        Retrieved::from_entry(self.engine()?.entry(index)?)
    }

    /// Read parts of several proteins at once
    ///
    /// With `clamp`, a request outside the live range reads the oldest or
    /// newest protein instead of failing.
    pub fn fetch(&self, ops: &[FetchOp], clamp: bool) -> Result<FetchBatch> {
        let engine = self.engine()?;
        let results = ops
            .iter()
            .map(|op| {
                let mut index = op.index;
                loop {
                    match engine.entry(index) {
                        Ok(entry) => {
                            let parts = entry.fetch(&op.request)?;
                            return Ok(Fetched { index, stamp: entry.stamp, parts });
                        }
                        Err(PoolError::NoSuchProtein) if clamp => {
                            let clamped = match engine.index_range()? {
                                Some((oldest, _)) if index < oldest => oldest,
                                Some((_, newest)) if index > newest => newest,
                                _ => return Err(PoolError::NoSuchProtein),
                            };
                            trace!(requested = index, clamped, "clamped fetch index");
                            index = clamped;
                        }
                        Err(e) => return Err(e),
                    }
                }
            })
            .collect();
        let range = engine.index_range()?;
        Ok(FetchBatch {
            results,
            oldest_index: range.map(|(oldest, _)| oldest),
            newest_index: range.map(|(_, newest)| newest),
        })
    }

    /// Evict every protein below `index`
    pub fn advance_oldest(&self, index: u64) -> Result<Progress> {
        self.pool.with_lock(|g| g.advance_oldest(index))
    }

    /// Change the ring size, keeping as many of the newest proteins as fit
    pub fn resize(&self, size: u64) -> Result<Progress> {
        self.pool.resize(size)
    }

    pub fn change_options(&self, changes: &OptionChanges) -> Result<Progress> {
        self.pool.change_options(changes)
    }

    pub fn info(&self) -> Result<PoolInfo> {
        self.engine()?.info(self.pool.name())
    }

    // ---- positioning ----

    /// Move to `index`, clamped to the live range (or one past it)
    pub fn seek_to(&mut self, index: u64) -> Result<()> {
        match self.engine()?.index_range()? {
            Some((oldest, newest)) => {
                self.index = index.clamp(oldest, newest + 1);
                Ok(())
            }
            None => Err(PoolError::NoSuchProtein),
        }
    }

    pub fn seek_by(&mut self, delta: i64) -> Result<()> {
        self.seek_to(self.index.saturating_add_signed(delta))
    }

    pub fn frwd_by(&mut self, n: u64) -> Result<()> {
        self.seek_to(self.index.saturating_add(n))
    }

    pub fn back_by(&mut self, n: u64) -> Result<()> {
        self.seek_to(self.index.saturating_sub(n))
    }

    /// Move to the protein stamped closest to `stamp`
    pub fn seek_to_time(&mut self, stamp: f64, bound: TimeComparison) -> Result<()> {
        self.index = self.engine()?.index_for_time(stamp, bound)?;
        Ok(())
    }

    /// Move by `lapse` seconds from the current protein's timestamp
    pub fn seek_by_time(&mut self, lapse: f64, bound: TimeComparison) -> Result<()> {
        let engine = self.engine()?;
        let base = engine.stamp_of(self.index)?;
        self.index = engine.index_for_time(base + lapse, bound)?;
        Ok(())
    }

    /// Move to the oldest protein; nothing to do on an empty pool
    pub fn rewind(&mut self) -> Result<()> {
        if let Some((oldest, _)) = self.engine()?.index_range()? {
            self.index = oldest;
        }
        Ok(())
    }

    /// Move to the newest protein
    pub fn to_last(&mut self) -> Result<()> {
        if let Some((_, newest)) = self.engine()?.index_range()? {
            self.index = newest;
        }
        Ok(())
    }

    /// Move past the newest protein, where only future deposits are read
    pub fn runout(&mut self) -> Result<()> {
        self.index = self.engine()?.next_index()?;
        Ok(())
    }

    /// Skip ahead over proteins evicted since this hose last read;
    /// returns the new position
    pub fn to_first_unseen(&mut self) -> Result<u64> {
        let engine = self.engine()?;
        let first = match engine.index_range()? {
            Some((oldest, _)) => oldest,
            None => engine.next_index()?,
        };
        self.index = self.index.max(first);
        Ok(self.index)
    }

    // ---- reading ----

    /// The protein at the cursor, without moving
    pub fn curr(&self) -> Result<Retrieved> {
        self.nth(self.index)
    }

    /// Read the protein at the cursor and step past it
    ///
    /// A cursor that has fallen behind the evicted end reads the oldest
    /// protein instead.
    pub fn next(&mut self) -> Result<Retrieved> {
        let engine = self.engine()?;
        let mut at = self.index;
        loop {
            match engine.entry(at) {
                Ok(entry) => {
                    self.index = at + 1;
                    return Retrieved::from_entry(entry);
                }
                Err(PoolError::NoSuchProtein) => match engine.oldest_index() {
                    Ok(oldest) if oldest > at => at = oldest,
                    Ok(_) | Err(PoolError::NoSuchProtein) => return Err(PoolError::NoSuchProtein),
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Step back one and read the protein there, leaving the cursor on it
    pub fn prev(&mut self) -> Result<Retrieved> {
        if self.index == 0 {
            return Err(PoolError::NoSuchProtein);
        }
        let newest = self.newest_index()?;
        self.index = self.index.min(newest + 1) - 1;
        self.curr()
    }

    /// Read forward to the next protein whose descrips match `search`
    ///
    /// On failure the cursor is left where it was.
    pub fn probe_frwd(&mut self, search: &Slaw) -> Result<Retrieved> {
        let saved = self.index;
        loop {
            match self.next() {
                Ok(r) if r.protein.search(search) => return Ok(r),
                Ok(_) => {}
                Err(e) => {
                    self.index = saved;
                    return Err(e);
                }
            }
        }
    }

    /// Read backward to the previous protein whose descrips match `search`
    pub fn probe_back(&mut self, search: &Slaw) -> Result<Retrieved> {
        let saved = self.index;
        loop {
            match self.prev() {
                Ok(r) if r.protein.search(search) => return Ok(r),
                Ok(_) => {}
                Err(e) => {
                    self.index = saved;
                    return Err(e);
                }
            }
        }
    }

    // ---- waiting ----

    fn waiter(&mut self) -> Result<&Waiter> {
        if self.waiter.is_none() {
            self.waiter = Some(Waiter::register(self.pool.dir())?);
        }
        self.waiter
            .as_ref()
            .ok_or_else(|| PoolError::Fifo("notification fifo missing".into()))
    }

    /// Let [`Hose::wake_up`] and this hose's [`Waker`]s interrupt waits
    pub fn enable_wakeup(&mut self) -> Result<()> {
        self.waiter()?.enable();
        Ok(())
    }

    /// A handle that wakes this hose from another thread
    pub fn waker(&mut self) -> Result<Waker> {
        Ok(self.waiter()?.waker())
    }

    /// Interrupt the current or next wait; does nothing unless wakeup was
    /// enabled
    pub fn wake_up(&mut self) -> Result<()> {
        self.waker()?.wake()
    }

    /// Notification fd and what it had pending
    pub(crate) fn drain_notifications(&mut self) -> Result<(std::os::unix::io::RawFd, notify::Drained)> {
        let waiter = self.waiter()?;
        Ok((waiter.fd(), waiter.drain()?))
    }

    /// Read the next protein, blocking until one is deposited
    pub fn await_next(&mut self, timeout: Timeout) -> Result<Awaited<Retrieved>> {
        match self.next() {
            Ok(r) => return Ok(Awaited::Ready(r)),
            Err(PoolError::NoSuchProtein) => {}
            Err(e) => return Err(e),
        }
        if timeout == Timeout::NoWait {
            return Ok(Awaited::TimedOut);
        }
        let deadline = timeout.deadline();
        loop {
            let (fd, drained) = self.drain_notifications()?;
            trace!(pool = %self.pool.name(), deposited = drained.deposited, woken = drained.woken, "drained notifications");
            match self.next() {
                Ok(r) => {
                    // leave the wakeup for the next wait
                    if drained.woken {
                        self.wake_up()?;
                    }
                    return Ok(Awaited::Ready(r));
                }
                Err(PoolError::NoSuchProtein) => {}
                Err(e) => return Err(e),
            }
            if drained.woken {
                return Ok(Awaited::Woken);
            }
            if !notify::wait_readable(&[fd], deadline)? {
                trace!(pool = %self.pool.name(), index = self.index, "await timed out");
                return Ok(Awaited::TimedOut);
            }
        }
    }

    /// Block until a protein matching `search` arrives; `timeout` covers
    /// the whole search
    pub fn await_probe_frwd(&mut self, search: &Slaw, timeout: Timeout) -> Result<Awaited<Retrieved>> {
        let saved = self.index;
        let deadline = timeout.deadline();
        loop {
            let left = match deadline {
                None => Timeout::Forever,
                Some(d) => Timeout::from(d.saturating_duration_since(std::time::Instant::now())),
            };
            match self.await_next(left) {
                Ok(Awaited::Ready(r)) if r.protein.search(search) => return Ok(Awaited::Ready(r)),
                Ok(Awaited::Ready(_)) => {}
                Ok(other) => {
                    self.index = saved;
                    return Ok(other);
                }
                Err(e) => {
                    self.index = saved;
                    return Err(e);
                }
            }
        }
    }

    // ---- lifecycle ----

    /// Detach from the pool, disposing it if it is marked auto-dispose and
    /// nothing else is attached
    pub fn withdraw(mut self) -> Result<()> {
        self.detach()
    }

    fn detach(&mut self) -> Result<()> {
        if self.withdrawn {
            return Ok(());
        }
        self.withdrawn = true;
        self.waiter = None;
        debug!(pool = %self.pool.name(), hose = %self.name, "withdrawing");
        if Arc::strong_count(&self.pool) > 1 {
            return Ok(());
        }
        let auto_dispose = self.engine()?.flags() & flags::AUTO_DISPOSE != 0;
        if !auto_dispose {
            return Ok(());
        }
        // drop our own mapping before checking for others
        self.pool.release();
        match context::remove_pool_dir(self.pool.dir()) {
            Ok(()) => {
                debug!(pool = %self.pool.name(), "auto-disposed pool");
                Ok(())
            }
            Err(PoolError::InUse(_)) | Err(PoolError::NoSuchPool(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Clone for Hose {
    /// A hose on the same pool at the same position, with its own
    /// notification state
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            name: self.name.clone(),
            index: self.index,
            waiter: None,
            withdrawn: false,
        }
    }
}

impl Drop for Hose {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(pool = %self.pool.name(), error = %e, "error withdrawing hose");
        }
    }
}

impl std::fmt::Debug for Hose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hose")
            .field("pool", &self.pool.name())
            .field("name", &self.name)
            .field("index", &self.index)
            .finish()
    }
}
