//! Pool storage engine
//!
//! Deposits, eviction and resizing run under the region's writer lock.
//! Reads take no lock: header fields are published under a sequence
//! counter, and a reader that copies an entry re-checks the oldest live
//! offset afterwards, so a copy raced by a wrapping writer is detected
//! and retried rather than returned.

use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use plasma_slaw::{FetchRequest, FetchedParts, Protein, ProteinView};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace, warn};

use crate::error::{PoolError, Progress, Result};
use crate::layout::{self, flags, EntryHeader, CHECK_PRESENT, ENTRY_HEADER, JUMPBACK, QUANTUM, WRAP_MARKER};
use crate::region::{RegionGuard, SharedRegion};
use crate::toc::{Toc, TocEntry};

/// Default number of reader retries while a writer publishes
pub const DEFAULT_SPIN_LIMIT: u32 = 1000;

/// Tie-break for time-based lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeComparison {
    /// Nearest stamp, preferring the earlier entry on a tie
    #[default]
    Closest,
    /// Latest entry stamped at or before the time
    ClosestLower,
    /// Earliest entry stamped at or after the time
    ClosestHigher,
}

/// A protein as stored in a pool
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub index: u64,
    /// Seconds since the Unix epoch
    pub stamp: f64,
    bytes: Vec<u8>,
}

impl StoredEntry {
    /// The encoded protein
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn view(&self) -> Result<ProteinView<'_>> {
        Ok(ProteinView::parse(&self.bytes)?)
    }

    pub fn protein(&self) -> Result<Protein> {
        Ok(Protein::decode(&self.bytes)?)
    }

    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchedParts> {
        Ok(self.view()?.fetch(request)?)
    }
}

/// Pool state for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: String,
    pub capacity: u64,
    pub bytes_used: u64,
    pub toc_capacity: u64,
    pub checksum: bool,
    pub stop_when_full: bool,
    pub frozen: bool,
    pub auto_dispose: bool,
    pub sync: bool,
    pub resizable: bool,
    pub single_file: bool,
    pub oldest_index: Option<u64>,
    pub newest_index: Option<u64>,
    pub last_stamp: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    oldest_index: u64,
    next_index: u64,
    oldest_v: u64,
    newest_v: u64,
    write_v: u64,
}

impl Snapshot {
    fn is_empty(&self) -> bool {
        self.oldest_index >= self.next_index
    }

    fn newest_index(&self) -> u64 {
        self.next_index - 1
    }
}

fn now_stamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
}

/// Ring buffer of proteins over a [`SharedRegion`]
pub struct PoolEngine {
    region: Arc<dyn SharedRegion>,
    ring_start: u64,
    capacity: u64,
    toc_capacity: u64,
    spin_limit: u32,
}

impl PoolEngine {
    /// Region bytes needed for a ring of `capacity` bytes
    pub fn required_len(capacity: u64, toc_capacity: u64) -> Result<usize> {
        layout::region_len(capacity, toc_capacity)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| {
                PoolError::BadConfig(format!(
                    "a {} byte ring with {} TOC entries does not fit in memory",
                    capacity, toc_capacity
                ))
            })
    }

    /// Write an empty pool into `region`
    pub fn format(
        region: Arc<dyn SharedRegion>,
        capacity: u64,
        toc_capacity: u64,
        pool_flags: u64,
        spin_limit: u32,
    ) -> Result<Self> {
        if capacity == 0 || capacity % QUANTUM != 0 {
            return Err(PoolError::InvalidSize { size: capacity, min: QUANTUM, max: u64::MAX });
        }
        let needed = Self::required_len(capacity, toc_capacity)?;
        if region.len() < needed {
            return Err(PoolError::corrupt(format!(
                "region of {} bytes cannot hold a pool needing {}",
                region.len(),
                needed
            )));
        }
        let engine = Self {
            ring_start: needed as u64 - capacity,
            capacity,
            toc_capacity,
            spin_limit,
            region,
        };
        engine.store(layout::RING_START, engine.ring_start);
        engine.store(layout::CAPACITY, capacity);
        engine.store(layout::FLAGS, pool_flags & !flags::RETIRED);
        engine.store(layout::TOC_CAPACITY, toc_capacity);
        for field in [
            layout::SEQ,
            layout::OLDEST_V,
            layout::NEWEST_V,
            layout::WRITE_V,
            layout::OLDEST_INDEX,
            layout::NEXT_INDEX,
            layout::LAST_STAMP,
        ] {
            engine.store(field, 0);
        }
        Toc::init(engine.region.as_ref(), layout::TOC_BASE, toc_capacity);
        // magic last, so nobody opens a half-formatted pool
        engine.store(layout::MAGIC_OFFSET, layout::magic_word());
        debug!(capacity, toc_capacity, "formatted pool");
        Ok(engine)
    }

    /// Attach to a pool already formatted in `region`
    pub fn open(region: Arc<dyn SharedRegion>, spin_limit: u32) -> Result<Self> {
        if region.len() < layout::TOC_BASE {
            return Err(PoolError::corrupt("backing region too small for a pool header"));
        }
        let mut magic = [0u8; 8];
        region.read(layout::MAGIC_OFFSET, &mut magic)?;
        if magic[..4] != layout::MAGIC {
            return Err(PoolError::corrupt("not a pool backing file"));
        }
        if magic[4] != layout::POOL_FORMAT_VERSION {
            return Err(PoolError::WrongVersion(magic[4]));
        }
        if magic[5] != layout::TYPE_MMAP {
            return Err(PoolError::BadType(format!("backing type {}", magic[5])));
        }
        let word = |off: usize| region.word(off).load(Ordering::Acquire);
        let (ring_start, capacity, toc_capacity) =
            (word(layout::RING_START), word(layout::CAPACITY), word(layout::TOC_CAPACITY));
        if capacity == 0
            || capacity % QUANTUM != 0
            || Some(ring_start) != layout::ring_start(toc_capacity)
            || ring_start.checked_add(capacity).map_or(true, |end| (region.len() as u64) < end)
        {
            error!(ring_start, capacity, toc_capacity, len = region.len(), "inconsistent pool header");
            return Err(PoolError::corrupt("inconsistent pool header"));
        }
        Toc::open(region.as_ref(), layout::TOC_BASE, toc_capacity)?;
        Ok(Self { region, ring_start, capacity, toc_capacity, spin_limit })
    }

    fn field(&self, offset: usize) -> &AtomicU64 {
        self.region.word(offset)
    }

    fn load(&self, offset: usize) -> u64 {
        self.field(offset).load(Ordering::Acquire)
    }

    fn store(&self, offset: usize, value: u64) {
        self.field(offset).store(value, Ordering::Release)
    }

    fn toc(&self) -> Toc<'_> {
        Toc::attach(self.region.as_ref(), layout::TOC_BASE)
    }

    /// Ring bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn toc_capacity(&self) -> u64 {
        self.toc_capacity
    }

    pub fn flags(&self) -> u64 {
        self.load(layout::FLAGS)
    }

    /// True once a resize has moved the pool to a new backing region
    pub fn is_retired(&self) -> bool {
        self.flags() & flags::RETIRED != 0
    }

    fn phys(&self, v: u64) -> usize {
        (self.ring_start + v % self.capacity) as usize
    }

    fn ring_word(&self, v: u64) -> u64 {
        self.region.word(self.phys(v)).load(Ordering::Acquire)
    }

    fn raw_snapshot(&self) -> Snapshot {
        Snapshot {
            oldest_index: self.load(layout::OLDEST_INDEX),
            next_index: self.load(layout::NEXT_INDEX),
            oldest_v: self.load(layout::OLDEST_V),
            newest_v: self.load(layout::NEWEST_V),
            write_v: self.load(layout::WRITE_V),
        }
    }

    /// Consistent copy of the header, spinning while a writer publishes
    fn snapshot(&self) -> Result<Snapshot> {
        let seq = self.field(layout::SEQ);
        for spins in 0..=self.spin_limit {
            let before = seq.load(Ordering::Acquire);
            if before & 1 == 0 {
                let snap = self.raw_snapshot();
                fence(Ordering::Acquire);
                if seq.load(Ordering::Relaxed) == before {
                    return Ok(snap);
                }
            }
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        // a writer died mid-publish or is stalled; the lock repairs the header
        warn!(spin_limit = self.spin_limit, "pool header stayed busy, taking the writer lock");
        let _guard = self.lock()?;
        Ok(self.raw_snapshot())
    }

    fn publish(&self, update: impl FnOnce()) {
        let seq = self.field(layout::SEQ);
        seq.fetch_add(1, Ordering::AcqRel);
        update();
        seq.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::SeqCst);
    }

    /// Whether the entry at `v` may have been overwritten
    fn stompled(&self, v: u64) -> bool {
        fence(Ordering::SeqCst);
        v < self.load(layout::OLDEST_V)
    }

    /// Whether anything was evicted after `snap` was taken
    fn evicted_since(&self, snap: &Snapshot) -> bool {
        fence(Ordering::SeqCst);
        self.load(layout::OLDEST_V) != snap.oldest_v
    }

    fn plausible(&self, v: u64, h: &EntryHeader) -> bool {
        h.size >= 2 * plasma_slaw::ilk::OCT as u64
            && h.size <= self.capacity
            && v % self.capacity + layout::entry_size(h.size) <= self.capacity
    }

    /// Entry header at `v`; `Ok(None)` when entries were overwritten
    /// under the reader
    fn header_at(&self, v: u64, expect: u64, snap: &Snapshot) -> Result<Option<EntryHeader>> {
        let mut buf = [0u8; ENTRY_HEADER as usize];
        self.region.read(self.phys(v), &mut buf)?;
        let h = EntryHeader::from_bytes(&buf);
        if h.index == expect && self.plausible(v, &h) {
            return Ok(Some(h));
        }
        if self.evicted_since(snap) {
            return Ok(None);
        }
        error!(offset = v, expect, found = h.index, "corrupt pool entry header");
        Err(PoolError::corrupt(format!("bad entry header for index {} at offset {}", expect, v)))
    }

    /// Start of the entry after the one at `v`
    fn next_v(&self, v: u64, h: &EntryHeader) -> u64 {
        let next = v + layout::entry_size(h.size);
        if next % self.capacity != 0 && self.ring_word(next) == WRAP_MARKER {
            next.next_multiple_of(self.capacity)
        } else {
            next
        }
    }

    /// Start of the entry before the one at `v`
    fn prev_v(&self, v: u64, snap: &Snapshot) -> Result<Option<u64>> {
        let step_back = |v: u64| -> Option<u64> {
            if v < JUMPBACK {
                return None;
            }
            let jb = self.ring_word(v - JUMPBACK);
            (jb > 0 && jb % QUANTUM == 0 && jb <= self.capacity && jb <= v).then(|| v - jb)
        };
        let mut prev = step_back(v);
        if let Some(p) = prev {
            if self.ring_word(p) == WRAP_MARKER {
                prev = step_back(p);
            }
        }
        match prev {
            Some(p) => Ok(Some(p)),
            None if self.evicted_since(snap) => Ok(None),
            None => Err(PoolError::corrupt(format!("bad jumpback before offset {}", v))),
        }
    }

    /// A TOC hint is used only if the entry it names is really there
    fn confirm(&self, hint: &TocEntry, snap: &Snapshot) -> bool {
        if hint.index < snap.oldest_index
            || hint.index >= snap.next_index
            || hint.offset < snap.oldest_v
            || hint.offset > snap.newest_v
            || hint.offset % QUANTUM != 0
        {
            return false;
        }
        let mut buf = [0u8; ENTRY_HEADER as usize];
        if self.region.read(self.phys(hint.offset), &mut buf).is_err() {
            return false;
        }
        let h = EntryHeader::from_bytes(&buf);
        h.index == hint.index && self.plausible(hint.offset, &h)
    }

    /// Virtual offset of `index`, walking from the nearest known entry
    fn locate(&self, index: u64, snap: &Snapshot) -> Result<Option<u64>> {
        let newest = snap.newest_index();
        let mut forward = (snap.oldest_index, snap.oldest_v);
        let mut backward = (newest, snap.newest_v);
        if let Some((lower, upper)) = self.toc().find_index(index) {
            if let Some(l) = lower.filter(|l| l.index <= index && l.index > forward.0 && self.confirm(l, snap)) {
                forward = (l.index, l.offset);
            }
            if let Some(u) = upper.filter(|u| u.index > index && u.index < backward.0 && self.confirm(u, snap)) {
                backward = (u.index, u.offset);
            }
        }

        if index - forward.0 <= backward.0 - index {
            let (mut i, mut v) = forward;
            while i < index {
                let Some(h) = self.header_at(v, i, snap)? else { return Ok(None) };
                v = self.next_v(v, &h);
                i += 1;
            }
            Ok(Some(v))
        } else {
            let (mut i, mut v) = backward;
            while i > index {
                let Some(p) = self.prev_v(v, snap)? else { return Ok(None) };
                v = p;
                i -= 1;
            }
            Ok(Some(v))
        }
    }

    /// Locate `index` and read its header, retrying past stompled reads
    fn resolve(&self, index: u64) -> Result<(u64, EntryHeader)> {
        for _ in 0..=self.spin_limit {
            let snap = self.snapshot()?;
            if snap.is_empty() || index < snap.oldest_index || index >= snap.next_index {
                return Err(PoolError::NoSuchProtein);
            }
            let Some(v) = self.locate(index, &snap)? else { continue };
            if let Some(h) = self.header_at(v, index, &snap)? {
                return Ok((v, h));
            }
        }
        Err(PoolError::NoSuchProtein)
    }

    pub fn oldest_index(&self) -> Result<u64> {
        let snap = self.snapshot()?;
        if snap.is_empty() {
            return Err(PoolError::NoSuchProtein);
        }
        Ok(snap.oldest_index)
    }

    pub fn newest_index(&self) -> Result<u64> {
        let snap = self.snapshot()?;
        if snap.is_empty() {
            return Err(PoolError::NoSuchProtein);
        }
        Ok(snap.newest_index())
    }

    /// Oldest and newest index from one consistent snapshot, `None` when
    /// the pool is empty
    pub fn index_range(&self) -> Result<Option<(u64, u64)>> {
        let snap = self.snapshot()?;
        Ok((!snap.is_empty()).then(|| (snap.oldest_index, snap.newest_index())))
    }

    /// Index the next deposit will receive
    pub fn next_index(&self) -> Result<u64> {
        Ok(self.snapshot()?.next_index)
    }

    /// Copy out the entry at `index`
    #[instrument(level = "trace", skip(self))]
    pub fn entry(&self, index: u64) -> Result<StoredEntry> {
        for _ in 0..=self.spin_limit {
            let (v, h) = self.resolve(index)?;
            let mut bytes = vec![0u8; h.size as usize];
            self.region.read(self.phys(v) + ENTRY_HEADER as usize, &mut bytes)?;
            if self.stompled(v) {
                warn!(index, "entry overwritten while reading, retrying");
                continue;
            }
            if let Some(stored) = h.checksum() {
                let actual = layout::checksum(h.stamp, index, &bytes);
                if actual != stored {
                    error!(index, stored, actual, "pool entry checksum mismatch");
                    return Err(PoolError::corrupt(format!("checksum mismatch at index {}", index)));
                }
            }
            trace!(index, len = bytes.len(), "read entry");
            return Ok(StoredEntry { index, stamp: h.stamp, bytes });
        }
        Err(PoolError::NoSuchProtein)
    }

    /// Decoded protein and timestamp at `index`
    pub fn nth(&self, index: u64) -> Result<(Protein, f64)> {
        let entry = self.entry(index)?;
        Ok((entry.protein()?, entry.stamp))
    }

    /// Timestamp of `index` without copying its protein
    pub fn stamp_of(&self, index: u64) -> Result<f64> {
        Ok(self.resolve(index)?.1.stamp)
    }

    /// Index whose timestamp best matches `stamp` under `bound`
    pub fn index_for_time(&self, stamp: f64, bound: TimeComparison) -> Result<u64> {
        let snap = self.snapshot()?;
        if snap.is_empty() {
            return Err(PoolError::NoSuchProtein);
        }
        let (oldest, newest) = (snap.oldest_index, snap.newest_index());

        let first = self.stamp_of(oldest)?;
        if first >= stamp {
            if first > stamp && bound == TimeComparison::ClosestLower {
                return Err(PoolError::NoSuchProtein);
            }
            return Ok(oldest);
        }

        // narrow the search with the TOC, trusting only confirmed hints
        let (mut lo, mut hi) = (oldest, newest);
        if let Some((lower, upper)) = self.toc().find_stamp(stamp) {
            if let Some(l) = lower.filter(|l| l.index > lo && l.index <= hi) {
                if self.stamp_of(l.index).is_ok_and(|s| s <= stamp) {
                    lo = l.index;
                }
            }
            if let Some(u) = upper.filter(|u| u.index > lo && u.index < hi) {
                if self.stamp_of(u.index).is_ok_and(|s| s > stamp) {
                    hi = u.index;
                }
            }
        }

        // last index stamped at or before `stamp`
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.stamp_of(mid)? <= stamp {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let (prev, prev_stamp) = (lo, self.stamp_of(lo)?);
        if prev_stamp == stamp || bound == TimeComparison::ClosestLower {
            return Ok(prev);
        }
        if prev == newest {
            return match bound {
                TimeComparison::ClosestHigher => Err(PoolError::NoSuchProtein),
                _ => Ok(prev),
            };
        }
        let post = prev + 1;
        if bound == TimeComparison::ClosestHigher {
            return Ok(post);
        }
        let post_stamp = self.stamp_of(post)?;
        Ok(if post_stamp - stamp >= stamp - prev_stamp { prev } else { post })
    }

    /// Bytes of ring between the oldest entry and the write position
    pub fn bytes_used(&self) -> Result<u64> {
        let snap = self.snapshot()?;
        Ok(if snap.is_empty() { 0 } else { (snap.write_v - snap.oldest_v).min(self.capacity) })
    }

    pub fn info(&self, name: &str) -> Result<PoolInfo> {
        let snap = self.snapshot()?;
        let f = self.flags();
        let has = |bit: u64| f & bit != 0;
        let empty = snap.is_empty();
        Ok(PoolInfo {
            name: name.to_string(),
            pool_type: "mmap".to_string(),
            capacity: self.capacity,
            bytes_used: self.bytes_used()?,
            toc_capacity: self.toc_capacity,
            checksum: has(flags::CHECKSUM),
            stop_when_full: has(flags::STOP_WHEN_FULL),
            frozen: has(flags::FROZEN),
            auto_dispose: has(flags::AUTO_DISPOSE),
            sync: has(flags::SYNC),
            resizable: has(flags::RESIZABLE),
            single_file: has(flags::SINGLE_FILE),
            oldest_index: (!empty).then_some(snap.oldest_index),
            newest_index: (!empty).then(|| snap.newest_index()),
            last_stamp: (!empty).then(|| f64::from_bits(self.load(layout::LAST_STAMP))),
        })
    }

    /// Push the backing region to storage
    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    /// Take the writer lock
    pub fn lock(&self) -> Result<WriteGuard<'_>> {
        let guard = self.region.lock()?;
        let seq = self.field(layout::SEQ);
        let s = seq.load(Ordering::Acquire);
        if s & 1 != 0 {
            warn!(seq = s, "previous writer died while publishing, repairing header");
            seq.store(s + 1, Ordering::Release);
        }
        Ok(WriteGuard { engine: self, _guard: guard })
    }

    /// Lock and deposit
    pub fn deposit(&self, protein: &Protein) -> Result<(u64, f64)> {
        self.lock()?.deposit(protein)
    }

    pub fn advance_oldest(&self, to_index: u64) -> Result<Progress> {
        self.lock()?.advance_oldest(to_index)
    }
}

/// Writer access to a pool; the lock is held until drop
pub struct WriteGuard<'a> {
    engine: &'a PoolEngine,
    _guard: RegionGuard<'a>,
}

impl WriteGuard<'_> {
    pub fn engine(&self) -> &PoolEngine {
        self.engine
    }

    pub fn is_retired(&self) -> bool {
        self.engine.is_retired()
    }

    /// Walk forward from the oldest entry until `done` says stop
    fn walk_oldest(&self, snap: &Snapshot, mut done: impl FnMut(u64, u64) -> bool) -> Result<(u64, u64)> {
        let e = self.engine;
        let (mut v, mut i) = (snap.oldest_v, snap.oldest_index);
        while i < snap.next_index && !done(v, i) {
            let h = e
                .header_at(v, i, snap)?
                .ok_or_else(|| PoolError::corrupt("entry overwritten under the writer lock"))?;
            i += 1;
            v = if i == snap.next_index { snap.write_v } else { e.next_v(v, &h) };
        }
        Ok((v, i))
    }

    /// Append `protein`, evicting the oldest entries as needed
    #[instrument(level = "trace", skip(self, protein))]
    pub fn deposit(&self, protein: &Protein) -> Result<(u64, f64)> {
        let e = self.engine;
        let bytes = protein.encode();
        let size = layout::entry_size(bytes.len() as u64);
        if size > e.capacity {
            return Err(PoolError::ProteinBiggerThanPool { size: bytes.len() as u64, capacity: e.capacity });
        }
        let pool_flags = e.flags();
        if pool_flags & flags::FROZEN != 0 {
            return Err(PoolError::Frozen);
        }

        let snap = e.raw_snapshot();
        let cap = e.capacity;
        let room = cap - snap.write_v % cap;
        let filler = (size > room).then_some(room);
        let start = snap.write_v + filler.unwrap_or(0);
        let end = start + size;

        let (mut oldest_v, oldest_index) = self.walk_oldest(&snap, |v, _| v + cap >= end)?;
        if oldest_index == snap.next_index {
            oldest_v = start;
        }
        if oldest_index != snap.oldest_index && pool_flags & flags::STOP_WHEN_FULL != 0 {
            return Err(PoolError::Full);
        }

        let index = snap.next_index;
        let stamp = now_stamp().max(f64::from_bits(e.load(layout::LAST_STAMP)));
        e.publish(|| {
            e.store(layout::OLDEST_V, oldest_v);
            e.store(layout::OLDEST_INDEX, oldest_index);
        });

        if let Some(room) = filler {
            e.region.write(e.phys(snap.write_v), &WRAP_MARKER.to_ne_bytes())?;
            e.region.write(e.phys(start - JUMPBACK), &room.to_ne_bytes())?;
        }
        let check = if pool_flags & flags::CHECKSUM != 0 {
            CHECK_PRESENT | u64::from(layout::checksum(stamp, index, &bytes))
        } else {
            0
        };
        let header = EntryHeader { stamp, index, size: bytes.len() as u64, check };
        let at = e.phys(start);
        e.region.write(at, &header.to_bytes())?;
        e.region.write(at + ENTRY_HEADER as usize, &bytes)?;
        e.region.write(at + (size - JUMPBACK) as usize, &size.to_ne_bytes())?;
        fence(Ordering::Release);

        e.publish(|| {
            e.store(layout::NEWEST_V, start);
            e.store(layout::WRITE_V, end);
            e.store(layout::LAST_STAMP, stamp.to_bits());
            e.store(layout::NEXT_INDEX, index + 1);
        });
        e.toc().append(TocEntry { index, offset: start, stamp }, oldest_v);
        if pool_flags & flags::SYNC != 0 {
            e.region.flush()?;
        }
        trace!(index, stamp, bytes = bytes.len(), evicted = oldest_index - snap.oldest_index, "deposited");
        Ok((index, stamp))
    }

    /// Evict every entry below `to_index`
    pub fn advance_oldest(&self, to_index: u64) -> Result<Progress> {
        let e = self.engine;
        let snap = e.raw_snapshot();
        if snap.is_empty() || to_index <= snap.oldest_index {
            return Ok(Progress::NothingToDo);
        }
        let target = to_index.min(snap.next_index);
        let (v, i) = self.walk_oldest(&snap, |_, i| i >= target)?;
        e.publish(|| {
            e.store(layout::OLDEST_V, v);
            e.store(layout::OLDEST_INDEX, i);
        });
        debug!(from = snap.oldest_index, to = i, "advanced oldest");
        Ok(Progress::Done)
    }

    /// Set and clear header flag bits
    pub fn change_flags(&self, set: u64, clear: u64) -> Progress {
        let e = self.engine;
        let old = e.flags();
        let new = (old | set) & !clear;
        if new == old {
            return Progress::NothingToDo;
        }
        e.store(layout::FLAGS, new);
        debug!(old, new, "changed pool flags");
        Progress::Done
    }

    /// Mark this backing region as replaced
    pub fn retire(&self) {
        let e = self.engine;
        e.store(layout::FLAGS, e.flags() | flags::RETIRED);
    }

    /// Copy the newest entries that fit into the freshly formatted
    /// `target`, keeping their indices; returns how many were kept
    pub fn copy_into(&self, target: &PoolEngine) -> Result<u64> {
        let e = self.engine;
        let snap = e.raw_snapshot();
        let mut chosen = Vec::new();
        if !snap.is_empty() {
            let (mut v, mut i, mut total) = (snap.newest_v, snap.newest_index(), 0u64);
            loop {
                let h = e
                    .header_at(v, i, &snap)?
                    .ok_or_else(|| PoolError::corrupt("entry overwritten under the writer lock"))?;
                let size = layout::entry_size(h.size);
                if total + size > target.capacity {
                    break;
                }
                total += size;
                chosen.push((v, h));
                if i == snap.oldest_index {
                    break;
                }
                v = e
                    .prev_v(v, &snap)?
                    .ok_or_else(|| PoolError::corrupt("entry overwritten under the writer lock"))?;
                i -= 1;
            }
            chosen.reverse();
        }

        let toc = target.toc();
        let (mut tv, mut newest_v) = (0u64, 0u64);
        let mut buf = Vec::new();
        for (v, h) in &chosen {
            let size = layout::entry_size(h.size);
            buf.resize(size as usize, 0);
            e.region.read(e.phys(*v), &mut buf)?;
            target.region.write(target.phys(tv), &buf)?;
            toc.append(TocEntry { index: h.index, offset: tv, stamp: h.stamp }, 0);
            newest_v = tv;
            tv += size;
        }

        let kept = chosen.len() as u64;
        let first = chosen.first().map_or(snap.next_index, |(_, h)| h.index);
        target.publish(|| {
            target.store(layout::OLDEST_V, 0);
            target.store(layout::OLDEST_INDEX, first);
            target.store(layout::NEWEST_V, newest_v);
            target.store(layout::WRITE_V, tv);
            target.store(layout::LAST_STAMP, e.load(layout::LAST_STAMP));
            target.store(layout::NEXT_INDEX, snap.next_index);
        });
        debug!(kept, dropped = snap.next_index - snap.oldest_index - kept, "copied pool entries");
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::InMemoryRegion;
    use plasma_slaw::Slaw;

    fn engine(capacity: u64, pool_flags: u64) -> PoolEngine {
        let len = PoolEngine::required_len(capacity, 8).unwrap();
        PoolEngine::format(Arc::new(InMemoryRegion::new(len)), capacity, 8, pool_flags, 100).unwrap()
    }

    fn numbered(i: u64) -> Protein {
        Protein::builder().descrip("n").ingest("i", i).rude(&vec![i as u8; (i % 40) as usize]).build()
    }

    #[test]
    fn test_empty_pool() {
        let e = engine(1024, 0);
        assert!(matches!(e.oldest_index(), Err(PoolError::NoSuchProtein)));
        assert!(matches!(e.newest_index(), Err(PoolError::NoSuchProtein)));
        assert!(matches!(e.entry(0), Err(PoolError::NoSuchProtein)));
        assert_eq!(e.bytes_used().unwrap(), 0);
    }

    #[test]
    fn test_deposit_and_read() {
        let e = engine(4096, 0);
        let a = Protein::builder().ingest("k", 1i64).build();
        let b = Protein::builder().descrip("x").build();
        assert_eq!(e.deposit(&a).unwrap().0, 0);
        let (ib, sb) = e.deposit(&b).unwrap();
        assert_eq!(ib, 1);
        assert_eq!(e.nth(0).unwrap().0, a);
        let (got, stamp) = e.nth(1).unwrap();
        assert_eq!(got, b);
        assert_eq!(stamp, sb);
        assert!(e.stamp_of(0).unwrap() <= sb);
        assert!(matches!(e.entry(2), Err(PoolError::NoSuchProtein)));
    }

    #[test]
    fn test_wraparound_keeps_live_range_intact() {
        let e = engine(1024, 0);
        for i in 0..200 {
            assert_eq!(e.deposit(&numbered(i)).unwrap().0, i);
        }
        let (oldest, newest) = (e.oldest_index().unwrap(), e.newest_index().unwrap());
        assert!(oldest > 0);
        assert_eq!(newest, 199);
        for i in oldest..=newest {
            assert_eq!(e.nth(i).unwrap().0, numbered(i), "index {}", i);
        }
        for i in [0, oldest - 1] {
            assert!(matches!(e.entry(i), Err(PoolError::NoSuchProtein)));
        }
        assert!(e.bytes_used().unwrap() <= 1024);
    }

    #[test]
    fn test_bigger_than_pool_leaves_pool_unchanged() {
        let e = engine(1024, 0);
        let huge = Protein::builder().rude(&[0u8; 2048]).build();
        assert!(matches!(e.deposit(&huge), Err(PoolError::ProteinBiggerThanPool { .. })));
        assert!(matches!(e.oldest_index(), Err(PoolError::NoSuchProtein)));
        e.deposit(&numbered(1)).unwrap();
        assert!(matches!(e.deposit(&huge), Err(PoolError::ProteinBiggerThanPool { .. })));
        assert_eq!((e.oldest_index().unwrap(), e.newest_index().unwrap()), (0, 0));
    }

    #[test]
    fn test_stop_when_full_and_frozen() {
        let e = engine(1024, flags::STOP_WHEN_FULL);
        let mut stored = 0;
        loop {
            match e.deposit(&numbered(5)) {
                Ok(_) => stored += 1,
                Err(PoolError::Full) => break,
                Err(other) => panic!("unexpected {}", other),
            }
        }
        assert!(stored > 0);
        assert_eq!(e.oldest_index().unwrap(), 0);

        let g = e.lock().unwrap();
        assert_eq!(g.change_flags(flags::FROZEN, flags::STOP_WHEN_FULL), Progress::Done);
        assert_eq!(g.change_flags(flags::FROZEN, 0), Progress::NothingToDo);
        assert!(matches!(g.deposit(&numbered(1)), Err(PoolError::Frozen)));
    }

    #[test]
    fn test_advance_oldest() {
        let e = engine(4096, 0);
        for i in 0..5 {
            e.deposit(&numbered(i)).unwrap();
        }
        assert_eq!(e.advance_oldest(0).unwrap(), Progress::NothingToDo);
        assert_eq!(e.advance_oldest(3).unwrap(), Progress::Done);
        assert_eq!(e.oldest_index().unwrap(), 3);
        assert_eq!(e.nth(3).unwrap().0, numbered(3));
        assert_eq!(e.advance_oldest(3).unwrap(), Progress::NothingToDo);

        // past the newest empties the pool, and indices keep counting
        assert_eq!(e.advance_oldest(100).unwrap(), Progress::Done);
        assert!(matches!(e.oldest_index(), Err(PoolError::NoSuchProtein)));
        assert_eq!(e.deposit(&numbered(9)).unwrap().0, 5);
        assert_eq!(e.oldest_index().unwrap(), 5);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let region = Arc::new(InMemoryRegion::new(PoolEngine::required_len(1024, 8).unwrap()));
        let e = PoolEngine::format(region.clone(), 1024, 8, flags::CHECKSUM, 100).unwrap();
        e.deposit(&Protein::builder().rude(b"precious").build()).unwrap();
        assert!(e.entry(0).is_ok());

        // flip a rude byte inside the stored protein
        let at = e.phys(0) + ENTRY_HEADER as usize + 16;
        let mut byte = [0u8];
        region.read(at, &mut byte).unwrap();
        region.write(at, &[byte[0] ^ 0xff]).unwrap();
        assert!(matches!(e.entry(0), Err(PoolError::Corrupt(_))));
    }

    #[test]
    fn test_oversized_geometry_is_an_error() {
        assert!(matches!(PoolEngine::required_len(u64::MAX - 15, 8), Err(PoolError::BadConfig(_))));
        assert!(matches!(PoolEngine::required_len(1024, u64::MAX), Err(PoolError::BadConfig(_))));
        let region = Arc::new(InMemoryRegion::new(PoolEngine::required_len(1024, 8).unwrap()));
        assert!(PoolEngine::format(region.clone(), 1024, u64::MAX, 0, 100).is_err());

        // a header claiming a ring past the end of the address space
        PoolEngine::format(region.clone(), 1024, 8, 0, 100).unwrap();
        region.word(layout::CAPACITY).store(u64::MAX - 15, Ordering::Release);
        assert!(matches!(PoolEngine::open(region, 100), Err(PoolError::Corrupt(_))));
    }

    #[test]
    fn test_index_for_time() {
        let e = engine(4096, 0);
        for i in 0..4 {
            e.deposit(&numbered(i)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let stamps: Vec<f64> = (0..4).map(|i| e.stamp_of(i).unwrap()).collect();
        let mid = (stamps[1] + stamps[2]) / 2.0;

        assert_eq!(e.index_for_time(stamps[2], TimeComparison::Closest).unwrap(), 2);
        assert_eq!(e.index_for_time(mid, TimeComparison::ClosestLower).unwrap(), 1);
        assert_eq!(e.index_for_time(mid, TimeComparison::ClosestHigher).unwrap(), 2);
        assert_eq!(e.index_for_time(stamps[1] + 0.0001, TimeComparison::Closest).unwrap(), 1);
        assert_eq!(e.index_for_time(0.0, TimeComparison::Closest).unwrap(), 0);
        assert!(matches!(e.index_for_time(0.0, TimeComparison::ClosestLower), Err(PoolError::NoSuchProtein)));
        assert_eq!(e.index_for_time(stamps[3] + 10.0, TimeComparison::Closest).unwrap(), 3);
        assert!(matches!(
            e.index_for_time(stamps[3] + 10.0, TimeComparison::ClosestHigher),
            Err(PoolError::NoSuchProtein)
        ));
    }

    #[test]
    fn test_copy_into_smaller_keeps_newest() {
        let e = engine(4096, 0);
        for i in 0..30 {
            e.deposit(&numbered(i)).unwrap();
        }
        let small = engine(1024, 0);
        let kept = e.lock().unwrap().copy_into(&small).unwrap();
        assert!(kept > 0 && kept < 30);
        assert_eq!(small.newest_index().unwrap(), 29);
        assert_eq!(small.oldest_index().unwrap(), 30 - kept);
        for i in 30 - kept..30 {
            assert_eq!(small.nth(i).unwrap().0, numbered(i));
        }
        assert_eq!(small.deposit(&numbered(30)).unwrap().0, 30);
    }

    #[test]
    fn test_concurrent_deposits_are_contiguous() {
        let e = Arc::new(engine(64 * 1024, 0));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let e = Arc::clone(&e);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| e.deposit(&Protein::builder().ingest("t", t as i64).ingest("i", i as i64).build()).unwrap().0)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_reader_races_wrapping_writer() {
        let e = Arc::new(engine(2048, 0));
        let writer = {
            let e = Arc::clone(&e);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    e.deposit(&numbered(i)).unwrap();
                }
            })
        };
        let mut seen = 0;
        while !writer.is_finished() {
            if let Ok(newest) = e.newest_index() {
                match e.nth(newest.saturating_sub(3)) {
                    Ok((p, _)) => {
                        assert_eq!(p.find_ingest(&Slaw::string("i")).map(|s| s.to_unt64().unwrap()), Some(newest.saturating_sub(3)));
                        seen += 1;
                    }
                    Err(PoolError::NoSuchProtein) => {}
                    Err(other) => panic!("reader saw {}", other),
                }
            }
        }
        writer.join().unwrap();
        assert!(seen > 0 || e.newest_index().unwrap() == 1999);
    }
}
