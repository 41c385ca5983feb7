//! Pool table of contents
//!
//! A fixed-capacity circular index from protein index to virtual offset
//! and timestamp. Entry `n` describes index `first + n * step`; when the
//! table fills, entries below the oldest live offset are dropped and, if
//! that is not enough, every other entry is discarded and the step
//! doubles. Lookups only ever produce hints: the writer updates the table
//! without excluding readers, so callers confirm a hit against the entry
//! header it points at.

use std::sync::atomic::Ordering;

use tracing::{debug, error};

use crate::error::{PoolError, Result};
use crate::region::SharedRegion;

const SIGNATURE: u64 = 0x00BE_EF00_FEED_0011;
const UNKNOWN_OFFSET: u64 = u64::MAX;
const UNKNOWN_STAMP: f64 = -1.0;

const SIG: usize = 0;
const CAPACITY: usize = 8;
const COUNT: usize = 16;
const START: usize = 24;
const STEP: usize = 32;
const FIRST: usize = 40;
const LAST: usize = 48;
const ENTRIES: usize = 64;
const ENTRY_BYTES: usize = 16;

/// One located protein
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TocEntry {
    pub index: u64,
    pub offset: u64,
    pub stamp: f64,
}

pub(crate) struct Toc<'a> {
    region: &'a dyn SharedRegion,
    base: usize,
}

fn normalize_capacity(c: u64) -> u64 {
    let c = c.max(2);
    c.saturating_add(c & 1)
}

impl<'a> Toc<'a> {
    /// Bytes a table of `capacity` entries needs, `None` past `u64::MAX`
    pub fn room(capacity: u64) -> Option<u64> {
        normalize_capacity(capacity)
            .checked_mul(ENTRY_BYTES as u64)?
            .checked_add(ENTRIES as u64)
    }

    /// Format an empty table at `base`
    pub fn init(region: &'a dyn SharedRegion, base: usize, capacity: u64) -> Self {
        let toc = Self { region, base };
        toc.set(CAPACITY, normalize_capacity(capacity));
        toc.set(COUNT, 0);
        toc.set(START, 0);
        toc.set(STEP, 1);
        toc.set(FIRST, 0);
        toc.set(LAST, 0);
        toc.set(SIG, SIGNATURE);
        toc
    }

    /// A table already checked with [`Toc::open`]
    pub fn attach(region: &'a dyn SharedRegion, base: usize) -> Self {
        Self { region, base }
    }

    pub fn open(region: &'a dyn SharedRegion, base: usize, expected_capacity: u64) -> Result<Self> {
        let toc = Self { region, base };
        if toc.get(SIG) != SIGNATURE {
            error!(signature = toc.get(SIG), "bad TOC signature");
            return Err(PoolError::corrupt("bad TOC signature"));
        }
        if toc.capacity() != normalize_capacity(expected_capacity) {
            return Err(PoolError::corrupt(format!(
                "TOC capacity {} does not match header {}",
                toc.capacity(),
                expected_capacity
            )));
        }
        Ok(toc)
    }

    fn get(&self, field: usize) -> u64 {
        self.region.word(self.base + field).load(Ordering::Acquire)
    }

    fn set(&self, field: usize, value: u64) {
        self.region.word(self.base + field).store(value, Ordering::Release)
    }

    pub fn capacity(&self) -> u64 {
        self.get(CAPACITY)
    }

    pub fn count(&self) -> u64 {
        self.get(COUNT).min(self.capacity())
    }

    pub fn step(&self) -> u64 {
        self.get(STEP).max(1)
    }

    fn slot(&self, n: u64) -> usize {
        let pos = (self.get(START).wrapping_add(n)) % self.capacity();
        self.base + ENTRIES + ENTRY_BYTES * pos as usize
    }

    fn entry_at(&self, n: u64) -> (u64, f64) {
        let slot = self.slot(n);
        let offset = self.region.word(slot).load(Ordering::Acquire);
        let stamp = f64::from_bits(self.region.word(slot + 8).load(Ordering::Acquire));
        (offset, stamp)
    }

    fn put_at(&self, n: u64, offset: u64, stamp: f64) {
        let slot = self.slot(n);
        self.region.word(slot + 8).store(stamp.to_bits(), Ordering::Release);
        self.region.word(slot).store(offset, Ordering::Release);
    }

    fn index_of(&self, n: u64) -> u64 {
        self.get(FIRST).wrapping_add(n.wrapping_mul(self.step()))
    }

    fn n_for_index(&self, index: u64) -> u64 {
        let first = self.get(FIRST);
        if index < first {
            0
        } else {
            (index - first) / self.step()
        }
    }

    fn known(&self, n: u64) -> Option<TocEntry> {
        let (offset, stamp) = self.entry_at(n);
        (offset != UNKNOWN_OFFSET).then(|| TocEntry { index: self.index_of(n), offset, stamp })
    }

    /// First known entry after position `n`
    fn next_known(&self, n: u64) -> Option<(u64, TocEntry)> {
        (n + 1..self.count()).find_map(|i| self.known(i).map(|e| (i, e)))
    }

    /// Nearest entries at or below and above `index`
    pub fn find_index(&self, index: u64) -> Option<(Option<TocEntry>, Option<TocEntry>)> {
        let count = self.count();
        if count == 0 || index < self.get(FIRST) {
            return None;
        }
        let n = if index < self.get(LAST) {
            self.n_for_index(index).min(count - 1)
        } else {
            count - 1
        };
        Some((self.known(n), self.next_known(n).map(|(_, e)| e)))
    }

    /// Entries bracketing `stamp`: the last at or before it and the one
    /// after that
    pub fn find_stamp(&self, stamp: f64) -> Option<(Option<TocEntry>, Option<TocEntry>)> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        if stamp < self.entry_at(0).1 {
            return Some((None, self.known(0)));
        }
        let (mut lo, mut hi, mut mid) = (0u64, count, 0u64);
        while lo < hi {
            mid = (lo + hi) / 2;
            let s = self.entry_at(mid).1;
            if s == stamp {
                break;
            }
            if s < stamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        while mid > 0 && self.entry_at(mid).1 > stamp {
            mid -= 1;
        }
        Some((self.known(mid), self.next_known(mid).map(|(_, e)| e)))
    }

    /// Record a newly deposited protein; `oldest_offset` lets a full table
    /// drop entries that have been evicted from the ring
    pub fn append(&self, entry: TocEntry, oldest_offset: u64) {
        if self.get(COUNT) == 0 {
            self.set(FIRST, entry.index);
        }
        let n = self.n_for_index(entry.index);
        let mut count = self.get(COUNT);
        if n >= count {
            while n > count && count < self.capacity() {
                self.put_at(count, UNKNOWN_OFFSET, UNKNOWN_STAMP);
                count += 1;
                self.set(COUNT, count);
            }
            self.garbage_collect(oldest_offset);
            self.compact();
            let count = self.get(COUNT);
            self.put_at(count, entry.offset, entry.stamp);
            self.set(COUNT, count + 1);
        }
        self.set(LAST, entry.index);
    }

    fn garbage_collect(&self, oldest_offset: u64) {
        let count = self.get(COUNT);
        if count < self.capacity() {
            return;
        }
        let mut kill = 0;
        while kill < count && self.entry_at(kill).0 < oldest_offset {
            kill += 1;
        }
        if kill > 0 {
            self.set(FIRST, self.index_of(kill));
            self.set(START, (self.get(START) + kill) % self.capacity());
            self.set(COUNT, count - kill);
        }
    }

    fn compact(&self) {
        let count = self.get(COUNT);
        if count < self.capacity() {
            return;
        }
        let half = count / 2;
        for i in 1..half {
            let (offset, stamp) = self.entry_at(2 * i);
            self.put_at(i, offset, stamp);
        }
        self.set(COUNT, half);
        self.set(STEP, self.step() * 2);
        debug!(step = self.step(), "compacted TOC");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::InMemoryRegion;

    fn table(capacity: u64) -> InMemoryRegion {
        let region = InMemoryRegion::new(Toc::room(capacity).unwrap() as usize);
        Toc::init(&region, 0, capacity);
        region
    }

    fn entry(index: u64) -> TocEntry {
        TocEntry { index, offset: index * 64, stamp: index as f64 }
    }

    #[test]
    fn test_capacity_normalized() {
        let region = table(5);
        let toc = Toc::open(&region, 0, 5).unwrap();
        assert_eq!(toc.capacity(), 6);
        assert!(Toc::open(&region, 0, 8).is_err());
        assert!(Toc::open(&InMemoryRegion::new(256), 0, 6).is_err());
    }

    #[test]
    fn test_room_overflow_is_none() {
        assert_eq!(Toc::room(5), Some(64 + 16 * 6));
        assert_eq!(Toc::room(u64::MAX), None);
        assert_eq!(Toc::room(u64::MAX / 8), None);
    }

    #[test]
    fn test_find_index_exact() {
        let region = table(8);
        let toc = Toc::open(&region, 0, 8).unwrap();
        assert!(toc.find_index(0).is_none());
        for i in 0..5 {
            toc.append(entry(i), 0);
        }
        let (lower, upper) = toc.find_index(2).unwrap();
        assert_eq!(lower, Some(entry(2)));
        assert_eq!(upper, Some(entry(3)));
        let (lower, upper) = toc.find_index(10).unwrap();
        assert_eq!(lower, Some(entry(4)));
        assert_eq!(upper, None);
    }

    #[test]
    fn test_compaction_doubles_step() {
        let region = table(4);
        let toc = Toc::open(&region, 0, 4).unwrap();
        for i in 0..20 {
            toc.append(entry(i), 0);
        }
        assert!(toc.step() > 1);
        assert!(toc.count() <= toc.capacity());
        // every hint lies at or below the requested index
        for i in 0..20 {
            let (lower, _) = toc.find_index(i).unwrap();
            let lower = lower.unwrap();
            assert!(lower.index <= i);
            assert_eq!(lower, entry(lower.index));
        }
    }

    #[test]
    fn test_garbage_collect_evicted() {
        let region = table(4);
        let toc = Toc::open(&region, 0, 4).unwrap();
        for i in 0..4 {
            toc.append(entry(i), 0);
        }
        // entries below offset 192 (index 3) are gone from the ring
        toc.append(entry(4), 192);
        assert_eq!(toc.step(), 1);
        assert!(toc.find_index(2).is_none());
        assert_eq!(toc.find_index(4).unwrap().0, Some(entry(4)));
    }

    #[test]
    fn test_find_stamp() {
        let region = table(16);
        let toc = Toc::open(&region, 0, 16).unwrap();
        for i in 1..6 {
            toc.append(entry(i), 0);
        }
        assert_eq!(toc.find_stamp(0.5).unwrap(), (None, Some(entry(1))));
        assert_eq!(toc.find_stamp(3.0).unwrap(), (Some(entry(3)), Some(entry(4))));
        assert_eq!(toc.find_stamp(3.5).unwrap(), (Some(entry(3)), Some(entry(4))));
        assert_eq!(toc.find_stamp(9.0).unwrap(), (Some(entry(5)), None));
    }
}
