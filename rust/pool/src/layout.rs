//! Backing region layout
//!
//! ```text
//! +--------------------+ 0
//! | header words       |
//! +--------------------+ TOC_BASE
//! | TOC                |
//! +--------------------+ ring_start
//! | ring of entries    | capacity bytes
//! +--------------------+
//! ```
//!
//! Entries are addressed by virtual offsets that only grow; an entry at
//! virtual offset `v` lives at `ring_start + v % capacity` and never
//! straddles the end of the ring. Each entry is
//!
//! ```text
//! [stamp f64][index u64][size u64][check u64][protein ...][pad][jumpback u64]
//! ```
//!
//! padded to a multiple of 16 bytes, with the jumpback (the entry size) in
//! its last word so the previous entry can be found from any entry start.
//! When the next entry does not fit before the end of the ring, a filler
//! runs to the end: `WRAP_MARKER` in its first word and its own size in
//! its last.

use crate::toc::Toc;

/// Bytes every pool entry and the ring capacity are multiples of
pub const QUANTUM: u64 = 16;

pub(crate) const MAGIC: [u8; 4] = [0xff, 0xff, 0x0b, 0x10];
pub const POOL_FORMAT_VERSION: u8 = 1;
pub(crate) const TYPE_MMAP: u8 = 2;

// header word offsets
pub(crate) const MAGIC_OFFSET: usize = 0;
pub(crate) const RING_START: usize = 8;
pub(crate) const CAPACITY: usize = 16;
pub(crate) const FLAGS: usize = 24;
pub(crate) const TOC_CAPACITY: usize = 32;
pub(crate) const SEQ: usize = 40;
pub(crate) const OLDEST_V: usize = 48;
pub(crate) const NEWEST_V: usize = 56;
pub(crate) const WRITE_V: usize = 64;
pub(crate) const OLDEST_INDEX: usize = 72;
pub(crate) const NEXT_INDEX: usize = 80;
pub(crate) const LAST_STAMP: usize = 88;
pub(crate) const TOC_BASE: usize = 128;

pub(crate) const ENTRY_HEADER: u64 = 32;
pub(crate) const JUMPBACK: u64 = 8;
pub(crate) const WRAP_MARKER: u64 = u64::MAX;
pub(crate) const CHECK_PRESENT: u64 = 1 << 32;

/// Flag bits stored in the header
pub mod flags {
    pub const CHECKSUM: u64 = 1;
    pub const STOP_WHEN_FULL: u64 = 1 << 1;
    pub const FROZEN: u64 = 1 << 2;
    pub const AUTO_DISPOSE: u64 = 1 << 3;
    pub const SYNC: u64 = 1 << 4;
    pub const RESIZABLE: u64 = 1 << 5;
    pub const SINGLE_FILE: u64 = 1 << 6;
    /// Set on a backing file that a resize has replaced
    pub const RETIRED: u64 = 1 << 63;
}

/// `n` rounded up to a multiple of `to`, `None` past `u64::MAX`
pub(crate) fn round_up(n: u64, to: u64) -> Option<u64> {
    n.checked_next_multiple_of(to)
}

/// Bytes an entry holding `protein_len` bytes of protein occupies;
/// saturates at `u64::MAX` for lengths no ring can hold
pub fn entry_size(protein_len: u64) -> u64 {
    protein_len
        .checked_add(ENTRY_HEADER + JUMPBACK)
        .and_then(|n| round_up(n, QUANTUM))
        .unwrap_or(u64::MAX)
}

/// Offset of the ring for a TOC of `toc_capacity` entries
pub(crate) fn ring_start(toc_capacity: u64) -> Option<u64> {
    round_up((TOC_BASE as u64).checked_add(Toc::room(toc_capacity)?)?, QUANTUM)
}

/// Total backing size for a ring of `capacity` bytes
pub(crate) fn region_len(capacity: u64, toc_capacity: u64) -> Option<u64> {
    ring_start(toc_capacity)?.checked_add(capacity)
}

/// First word of the header
pub(crate) fn magic_word() -> u64 {
    u64::from_ne_bytes([MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], POOL_FORMAT_VERSION, TYPE_MMAP, 0, 0])
}

/// CRC over an entry's identity and protein bytes
pub(crate) fn checksum(stamp: f64, index: u64, protein: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&stamp.to_ne_bytes());
    hasher.update(&index.to_ne_bytes());
    hasher.update(protein);
    hasher.finalize()
}

/// Fixed fields at the start of every entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct EntryHeader {
    pub stamp: f64,
    pub index: u64,
    pub size: u64,
    pub check: u64,
}

impl EntryHeader {
    pub fn to_bytes(self) -> [u8; ENTRY_HEADER as usize] {
        let mut out = [0u8; ENTRY_HEADER as usize];
        out[0..8].copy_from_slice(&self.stamp.to_ne_bytes());
        out[8..16].copy_from_slice(&self.index.to_ne_bytes());
        out[16..24].copy_from_slice(&self.size.to_ne_bytes());
        out[24..32].copy_from_slice(&self.check.to_ne_bytes());
        out
    }

    pub fn from_bytes(b: &[u8; ENTRY_HEADER as usize]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&b[i..i + 8]);
            u64::from_ne_bytes(w)
        };
        Self {
            stamp: f64::from_bits(word(0)),
            index: word(8),
            size: word(16),
            check: word(24),
        }
    }

    /// Stored CRC, if the entry carries one
    pub fn checksum(self) -> Option<u32> {
        (self.check & CHECK_PRESENT != 0).then_some(self.check as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_sizes() {
        assert_eq!(entry_size(0), 48);
        assert_eq!(entry_size(16), 64);
        assert_eq!(entry_size(24), 64);
        assert_eq!(entry_size(32), 80);
        assert_eq!(entry_size(100) % QUANTUM, 0);
    }

    #[test]
    fn test_ring_start_aligned() {
        for toc in [0, 1, 7, 100] {
            let start = ring_start(toc).unwrap();
            assert_eq!(start % QUANTUM, 0);
            assert!(start > TOC_BASE as u64);
        }
    }

    #[test]
    fn test_oversized_layouts_do_not_overflow() {
        assert_eq!(round_up(u64::MAX - 3, QUANTUM), None);
        assert_eq!(round_up(17, QUANTUM), Some(32));
        assert_eq!(entry_size(u64::MAX - 8), u64::MAX);
        assert_eq!(ring_start(u64::MAX), None);
        assert_eq!(region_len(u64::MAX - 15, 16), None);
        assert_eq!(region_len(1024, 16), ring_start(16).map(|s| s + 1024));
    }

    #[test]
    fn test_entry_header_bytes() {
        let h = EntryHeader { stamp: 12.5, index: 7, size: 64, check: CHECK_PRESENT | 0xdead };
        assert_eq!(EntryHeader::from_bytes(&h.to_bytes()), h);
        assert_eq!(h.checksum(), Some(0xdead));
        assert_eq!(EntryHeader { check: 0, ..h }.checksum(), None);
        assert_ne!(checksum(1.0, 0, b"abc"), checksum(1.0, 1, b"abc"));
    }
}
