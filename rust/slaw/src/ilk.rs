//! Header oct ("ilk") layout
//!
//! Every slaw starts with one 64-bit header oct. The top nibble selects the
//! variant; the remaining bits carry lengths, counts, inline payload or the
//! numeric personality. The constants here are the wire contract and must
//! not change.

/// Bytes per oct
pub const OCT: usize = 8;

pub(crate) const NIBBLE_SHIFT: u32 = 60;
pub(crate) const WEE_STRING_LEN_SHIFT: u32 = 56;
pub(crate) const FULL_STRING_PAD_SHIFT: u32 = 56;
pub(crate) const WEE_CONTAINER_COUNT_SHIFT: u32 = 56;

pub(crate) const OCTLEN_MASK: u64 = 0x00ff_ffff_ffff_ffff;

pub(crate) const PROTEIN_ILK: u64 = 0x1000_0000_0000_0000;
pub(crate) const SWAPPED_ILK: u64 = 0x0000_0000_0000_0010;
pub(crate) const PROTEIN_ILKMASK: u64 = 0xf000_0000_0000_00f0;

pub(crate) const CONS_ILK: u64 = 0x6200_0000_0000_0000;
pub(crate) const CONS_ILKMASK: u64 = 0xff00_0000_0000_0000;

pub(crate) const BOOL_ILK: u64 = 0x2000_0000_0000_0000;
pub(crate) const BOOL_ILKMASK: u64 = 0xffff_ffff_ffff_fffe;
pub(crate) const NIL_ILK: u64 = 0x2000_0000_0000_0002;

/// Containers with fewer children keep the count in the header
pub(crate) const MAX_WEE_CONTAINER: u64 = 15;

pub(crate) const NUMERIC_ILK: u64 = 0x8000_0000_0000_0000;
pub(crate) const NUMERIC_ARRAY_FLAG: u64 = 0x4000_0000_0000_0000;
pub(crate) const NUMERIC_FLOAT_FLAG: u64 = 0x2000_0000_0000_0000;
pub(crate) const NUMERIC_UNSIGNED_FLAG: u64 = 0x1000_0000_0000_0000;
pub(crate) const NUMERIC_COMPLEX_FLAG: u64 = 0x0200_0000_0000_0000;
pub(crate) const NUMERIC_SIZE_SHIFT: u32 = 58;
pub(crate) const NUMERIC_VEC_SHIFT: u32 = 54;
pub(crate) const NUMERIC_BSIZE_SHIFT: u32 = 46;
pub(crate) const NUMERIC_UNIT_BSIZE_MASK: u64 = 0xff;
pub(crate) const NUMERIC_BREADTH_MASK: u64 = 0x0000_3fff_ffff_ffff;

/// Component count per vector code, three bits each, indexed by the code
pub(crate) const VECTOR_WIDTHS: u32 = 0o54324321;

// Second oct of a protein
pub(crate) const PROTEIN_NONSTD_FLAG: u64 = 0x8000_0000_0000_0000;
pub(crate) const PROTEIN_DESCRIPS_FLAG: u64 = 0x4000_0000_0000_0000;
pub(crate) const PROTEIN_INGESTS_FLAG: u64 = 0x2000_0000_0000_0000;
pub(crate) const PROTEIN_VERY_RUDE_FLAG: u64 = 0x0800_0000_0000_0000;
pub(crate) const PROTEIN_RUDE_PRESENT_MASK: u64 = 0x0f00_0000_0000_0000;
pub(crate) const PROTEIN_WEE_RUDE_MASK: u64 = 0x0700_0000_0000_0000;
pub(crate) const PROTEIN_WEE_RUDE_SHIFT: u32 = 56;
pub(crate) const PROTEIN_VERY_RUDE_MASK: u64 = 0x07ff_ffff_ffff_ffff;

/// Variant selector held in the top four bits of a header oct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nibble {
    SwappedProtein,
    Protein,
    Symbol,
    WeeString,
    List,
    Map,
    Cons,
    FullString,
    SingletonInt,
    SingletonUnt,
    SingletonFloat,
    ArrayInt,
    ArrayUnt,
    ArrayFloat,
}

impl Nibble {
    /// Classify a header oct, `None` for the reserved nibbles 11 and 15
    pub fn of(ilk: u64) -> Option<Nibble> {
        Some(match ilk >> NIBBLE_SHIFT {
            0 => Nibble::SwappedProtein,
            1 => Nibble::Protein,
            2 => Nibble::Symbol,
            3 => Nibble::WeeString,
            4 => Nibble::List,
            5 => Nibble::Map,
            6 => Nibble::Cons,
            7 => Nibble::FullString,
            8 => Nibble::SingletonInt,
            9 => Nibble::SingletonUnt,
            10 => Nibble::SingletonFloat,
            12 => Nibble::ArrayInt,
            13 => Nibble::ArrayUnt,
            14 => Nibble::ArrayFloat,
            _ => return None,
        })
    }

    pub(crate) fn bits(self) -> u64 {
        let n: u64 = match self {
            Nibble::SwappedProtein => 0,
            Nibble::Protein => 1,
            Nibble::Symbol => 2,
            Nibble::WeeString => 3,
            Nibble::List => 4,
            Nibble::Map => 5,
            Nibble::Cons => 6,
            Nibble::FullString => 7,
            Nibble::SingletonInt => 8,
            Nibble::SingletonUnt => 9,
            Nibble::SingletonFloat => 10,
            Nibble::ArrayInt => 12,
            Nibble::ArrayUnt => 13,
            Nibble::ArrayFloat => 14,
        };
        n << NIBBLE_SHIFT
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Nibble::SingletonInt
                | Nibble::SingletonUnt
                | Nibble::SingletonFloat
                | Nibble::ArrayInt
                | Nibble::ArrayUnt
                | Nibble::ArrayFloat
        )
    }
}

/// Protein length in octs, packed around the byte-order marker nibble
pub(crate) fn protein_ilk(octlen: u64) -> u64 {
    PROTEIN_ILK | (octlen & 0xf) | ((octlen & !0xf) << 4)
}

pub(crate) fn protein_octlen(ilk: u64) -> u64 {
    let ilk = ilk & !PROTEIN_ILKMASK;
    (ilk & 0xf) | (ilk >> 4)
}

pub(crate) fn is_protein(ilk: u64) -> bool {
    ilk & PROTEIN_ILKMASK == PROTEIN_ILK
}

pub(crate) fn is_swapped_protein(ilk: u64) -> bool {
    ilk & PROTEIN_ILKMASK == SWAPPED_ILK
}

/// Octs occupied by the slaw whose header is `ilk`, `None` when the header
/// names no known variant
pub fn octlen_of_ilk(ilk: u64) -> Option<u64> {
    let nibble = Nibble::of(ilk)?;
    let bsize = 1 + ((ilk >> NUMERIC_BSIZE_SHIFT) & NUMERIC_UNIT_BSIZE_MASK);
    Some(match nibble {
        Nibble::SwappedProtein => protein_octlen(ilk.swap_bytes()),
        Nibble::Protein => protein_octlen(ilk),
        Nibble::Symbol | Nibble::WeeString => 1,
        Nibble::List | Nibble::Map | Nibble::Cons | Nibble::FullString => ilk & OCTLEN_MASK,
        Nibble::SingletonInt | Nibble::SingletonUnt | Nibble::SingletonFloat => {
            if bsize <= 4 {
                1
            } else {
                1 + (bsize + 7) / 8
            }
        }
        Nibble::ArrayInt | Nibble::ArrayUnt | Nibble::ArrayFloat => {
            let breadth = ilk & NUMERIC_BREADTH_MASK;
            1 + (bsize.saturating_mul(breadth)).div_ceil(8)
        }
    })
}
