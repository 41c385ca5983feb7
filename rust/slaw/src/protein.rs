//! Proteins: descrips, ingests and rude data framed as one slaw
//!
//! Wire layout, in octs:
//!
//! ```text
//! [0]     protein ilk with embedded octlen
//! [1]     flags: descrips/ingests present, wee or very rude length;
//!         up to 7 rude bytes live in this oct's special bytes
//! [2..]   descrips slaw, ingests slaw, very rude bytes padded to 8
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::codec::{self, put_oct, ByteOrder};
use crate::error::Result;
use crate::ilk::{
    protein_ilk, OCT, PROTEIN_DESCRIPS_FLAG, PROTEIN_INGESTS_FLAG, PROTEIN_VERY_RUDE_FLAG,
    PROTEIN_WEE_RUDE_SHIFT,
};
use crate::slaw::{Slaw, SlawMap};
use crate::view::ProteinView;

/// Largest rude payload stored inside the flags oct
pub const MAX_WEE_RUDE: usize = 7;

/// How [`Protein::search_ex`] matches a list needle against the descrips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// In order, other descrips may sit in between
    #[default]
    Gap,
    /// In order and adjacent
    Contig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Protein {
    descrips: Option<Slaw>,
    ingests: Option<Slaw>,
    rude: Bytes,
}

fn ingests_are_map_shaped(s: &Slaw) -> bool {
    match s {
        Slaw::Map(_) => true,
        Slaw::List(items) => items.iter().all(Slaw::is_cons),
        _ => false,
    }
}

impl Protein {
    /// Protein without rude data. Descrips that are not a list and ingests
    /// that are not map-shaped are dropped.
    pub fn new(descrips: Option<Slaw>, ingests: Option<Slaw>) -> Self {
        Self::with_rude(descrips, ingests, Bytes::new())
    }

    pub fn with_rude(descrips: Option<Slaw>, ingests: Option<Slaw>, rude: impl Into<Bytes>) -> Self {
        let descrips = descrips.filter(|d| {
            let ok = d.is_list();
            if !ok {
                warn!("dropping descrips of type {:?}", d.slaw_type());
            }
            ok
        });
        let ingests = ingests.filter(|i| {
            let ok = ingests_are_map_shaped(i);
            if !ok {
                warn!("dropping ingests of type {:?}", i.slaw_type());
            }
            ok
        });
        Self { descrips, ingests, rude: rude.into() }
    }

    pub fn builder() -> ProteinBuilder {
        ProteinBuilder::default()
    }

    pub fn descrips(&self) -> Option<&Slaw> {
        self.descrips.as_ref()
    }

    pub fn ingests(&self) -> Option<&Slaw> {
        self.ingests.as_ref()
    }

    pub fn rude(&self) -> &[u8] {
        &self.rude
    }

    pub fn into_parts(self) -> (Option<Slaw>, Option<Slaw>, Bytes) {
        (self.descrips, self.ingests, self.rude)
    }

    /// No descrips, no ingests and no rude data
    pub fn is_empty(&self) -> bool {
        self.descrips.is_none() && self.ingests.is_none() && self.rude.is_empty()
    }

    pub fn has_descrip(&self, descrip: &Slaw) -> bool {
        self.descrips
            .as_ref()
            .and_then(|d| d.list_find(descrip))
            .is_some()
    }

    /// True when the descrips contain `needle` in order, gaps allowed
    pub fn search(&self, needle: &Slaw) -> bool {
        self.search_ex(needle, SearchMode::Gap).is_some()
    }

    /// Descrip position where `needle` matches. A needle that is not a list
    /// is looked up as a single descrip.
    pub fn search_ex(&self, needle: &Slaw, mode: SearchMode) -> Option<usize> {
        let descrips = self.descrips.as_ref()?;
        if !needle.is_list() {
            return descrips.list_find(needle);
        }
        match mode {
            SearchMode::Gap => descrips.list_gapsearch(needle),
            SearchMode::Contig => descrips.list_contigsearch(needle),
        }
    }

    pub fn find_ingest(&self, key: &Slaw) -> Option<&Slaw> {
        self.ingests.as_ref()?.map_find(key)
    }

    fn very_rude(&self) -> bool {
        self.rude.len() > MAX_WEE_RUDE
    }

    /// Encoded length in octs
    pub fn octlen(&self) -> u64 {
        let parts: u64 = [&self.descrips, &self.ingests]
            .into_iter()
            .flatten()
            .map(codec::octlen)
            .sum();
        let rude = if self.very_rude() {
            self.rude.len().div_ceil(OCT) as u64
        } else {
            0
        };
        2 + parts + rude
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.octlen() as usize * OCT
    }

    pub fn encode(&self) -> Bytes {
        self.encode_with_order(ByteOrder::NATIVE)
    }

    pub fn encode_with_order(&self, order: ByteOrder) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode_into(order, &mut buf);
        buf.freeze()
    }

    pub(crate) fn encode_into(&self, order: ByteOrder, buf: &mut BytesMut) {
        put_oct(buf, order, protein_ilk(self.octlen()));

        let mut flags = 0u64;
        if self.descrips.is_some() {
            flags |= PROTEIN_DESCRIPS_FLAG;
        }
        if self.ingests.is_some() {
            flags |= PROTEIN_INGESTS_FLAG;
        }
        let rude_len = self.rude.len();
        if self.very_rude() {
            put_oct(buf, order, flags | PROTEIN_VERY_RUDE_FLAG | rude_len as u64);
        } else {
            let mut oct = order.oct_bytes(flags | ((rude_len as u64) << PROTEIN_WEE_RUDE_SHIFT));
            oct[order.special_range(rude_len)].copy_from_slice(&self.rude);
            buf.put_slice(&oct);
        }

        for part in [&self.descrips, &self.ingests].into_iter().flatten() {
            codec::encode_into(part, order, buf);
        }
        if self.very_rude() {
            buf.put_slice(&self.rude);
            buf.put_bytes(0, rude_len.div_ceil(OCT) * OCT - rude_len);
        }
    }

    /// Decode a protein in either byte order
    pub fn decode(bytes: &[u8]) -> Result<Protein> {
        ProteinView::parse(bytes)?.to_protein()
    }

    /// Decode a protein known to be in `order`
    pub fn decode_with_order(bytes: &[u8], order: ByteOrder) -> Result<Protein> {
        ProteinView::parse_with_order(bytes, order)?.to_protein()
    }
}

impl fmt::Display for Protein {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protein(")?;
        match &self.descrips {
            Some(d) => write!(f, "descrips: {}", d)?,
            None => write!(f, "descrips: -")?,
        }
        match &self.ingests {
            Some(i) => write!(f, ", ingests: {}", i)?,
            None => write!(f, ", ingests: -")?,
        }
        write!(f, ", rude: {} bytes)", self.rude.len())
    }
}

/// Incremental protein construction
#[derive(Debug, Default)]
pub struct ProteinBuilder {
    descrips: Option<Vec<Slaw>>,
    ingests: Option<SlawMap>,
    rude: BytesMut,
}

impl ProteinBuilder {
    pub fn descrip(mut self, descrip: impl Into<Slaw>) -> Self {
        self.descrips.get_or_insert_with(Vec::new).push(descrip.into());
        self
    }

    pub fn descrips<I, T>(mut self, descrips: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Slaw>,
    {
        self.descrips
            .get_or_insert_with(Vec::new)
            .extend(descrips.into_iter().map(Into::into));
        self
    }

    /// Bind `key` to `value`, replacing an earlier binding of the same key
    pub fn ingest(mut self, key: impl Into<Slaw>, value: impl Into<Slaw>) -> Self {
        self.ingests
            .get_or_insert_with(SlawMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn rude(mut self, bytes: &[u8]) -> Self {
        self.rude.put_slice(bytes);
        self
    }

    pub fn build(self) -> Protein {
        Protein {
            descrips: self.descrips.map(Slaw::List),
            ingests: self.ingests.map(Slaw::Map),
            rude: self.rude.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlawError;
    use crate::ilk::{Nibble, PROTEIN_NONSTD_FLAG};

    fn sample() -> Protein {
        Protein::builder()
            .descrips(["hand", "pointing", "left"])
            .ingest("x", 1.5f64)
            .ingest("name", "wand")
            .build()
    }

    #[test]
    fn test_roundtrip_both_orders() {
        let protein_list = vec![
            sample(),
            Protein::default(),
            Protein::with_rude(None, None, vec![1u8, 2, 3]),
            Protein::with_rude(Some(Slaw::list(vec!["r"])), None, vec![9u8; 7]),
            Protein::with_rude(None, Some(Slaw::map([("k", 1i32)])), vec![0xabu8; 21]),
        ];
        for p in protein_list {
            for order in [ByteOrder::Little, ByteOrder::Big] {
                let bytes = p.encode_with_order(order);
                assert_eq!(bytes.len(), p.len());
                assert_eq!(Protein::decode(&bytes).unwrap(), p, "{}", p);
                assert_eq!(Protein::decode_with_order(&bytes, order).unwrap(), p);
            }
        }
    }

    #[test]
    fn test_header_layout() {
        let p = Protein::with_rude(Some(Slaw::list(vec!["a"])), None, vec![0x11u8, 0x22]);
        let bytes = p.encode_with_order(ByteOrder::Little);
        // ilk oct + flags oct + one-oct list + one-oct wee string
        assert_eq!(bytes.len(), 32);
        assert_eq!(Nibble::of(u64::from_le_bytes(bytes[..8].try_into().unwrap())), Some(Nibble::Protein));
        let oct2 = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_ne!(oct2 & PROTEIN_DESCRIPS_FLAG, 0);
        assert_eq!(oct2 & PROTEIN_INGESTS_FLAG, 0);
        assert_eq!(&bytes[8..10], &[0x11, 0x22]);
        assert_eq!(bytes[15], 0x42);
    }

    #[test]
    fn test_very_rude_padding() {
        let p = Protein::with_rude(None, None, vec![7u8; 9]);
        let bytes = p.encode();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[16..25], &[7u8; 9]);
        assert!(bytes[25..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clamps_malformed_components() {
        let p = Protein::new(Some(Slaw::string("not a list")), Some(Slaw::list(vec![1i32])));
        assert!(p.descrips().is_none());
        assert!(p.ingests().is_none());
        assert!(p.is_empty());
        let list_ingests = Protein::new(None, Some(Slaw::list(vec![Slaw::cons("a", 1i32)])));
        assert_eq!(list_ingests.find_ingest(&"a".into()), Some(&Slaw::from(1i32)));
    }

    #[test]
    fn test_search_modes() {
        let p = sample();
        assert!(p.has_descrip(&"pointing".into()));
        assert!(!p.has_descrip(&"right".into()));
        assert!(p.search(&Slaw::list(vec!["hand", "left"])));
        assert_eq!(p.search_ex(&Slaw::list(vec!["hand", "left"]), SearchMode::Contig), None);
        assert_eq!(p.search_ex(&Slaw::list(vec!["pointing", "left"]), SearchMode::Contig), Some(1));
        assert_eq!(p.search_ex(&"left".into(), SearchMode::Contig), Some(2));
        assert!(!Protein::default().search(&"hand".into()));
    }

    #[test]
    fn test_find_ingest() {
        let p = sample();
        assert_eq!(p.find_ingest(&"name".into()).and_then(Slaw::as_str), Some("wand"));
        assert!(p.find_ingest(&"missing".into()).is_none());
    }

    #[test]
    fn test_nonstandard_rejected() {
        let mut bytes = BytesMut::from(&sample().encode_with_order(ByteOrder::Little)[..]);
        let oct2 = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) | PROTEIN_NONSTD_FLAG;
        bytes[8..16].copy_from_slice(&oct2.to_le_bytes());
        assert!(matches!(Protein::decode(&bytes), Err(SlawError::CorruptProtein(_))));
    }

    #[test]
    fn test_nested_in_slaw() {
        let s = Slaw::list(vec![Slaw::from(sample()), Slaw::Nil]);
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let bytes = codec::encode_with_order(&s, order);
            assert_eq!(codec::decode(&bytes, order).unwrap(), s);
        }
    }
}
