//! Zero-copy protein views and partial fetches
//!
//! A [`ProteinView`] locates the descrips, ingests and rude byte ranges of
//! an encoded protein from its two header octs and the headers of its
//! parts, without decoding the parts themselves.

use std::ops::Range;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{self, read_oct_at, ByteOrder};
use crate::error::{Result, SlawError};
use crate::ilk::{
    is_protein, is_swapped_protein, protein_octlen, Nibble, MAX_WEE_CONTAINER, OCT,
    PROTEIN_DESCRIPS_FLAG, PROTEIN_INGESTS_FLAG, PROTEIN_NONSTD_FLAG, PROTEIN_RUDE_PRESENT_MASK,
    PROTEIN_VERY_RUDE_FLAG, PROTEIN_VERY_RUDE_MASK, PROTEIN_WEE_RUDE_MASK, PROTEIN_WEE_RUDE_SHIFT,
    WEE_CONTAINER_COUNT_SHIFT,
};
use crate::protein::Protein;

#[derive(Debug, Clone)]
pub struct ProteinView<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
    descrips: Option<Range<usize>>,
    ingests: Option<Range<usize>>,
    rude: Range<usize>,
}

/// Byte order of the protein at the start of `bytes`
pub fn detect_order(bytes: &[u8]) -> Result<ByteOrder> {
    let native = read_oct_at(bytes, 0, ByteOrder::NATIVE)
        .map_err(|e| SlawError::corrupt_protein(e.to_string()))?;
    if is_protein(native) {
        Ok(ByteOrder::NATIVE)
    } else if is_swapped_protein(native) {
        Ok(ByteOrder::NATIVE.swapped())
    } else {
        Err(SlawError::corrupt_protein(format!(
            "header oct {:#018x} does not represent a protein",
            native
        )))
    }
}

/// Children of the list or map at the start of `bytes`, read from its
/// header alone
fn container_count(bytes: &[u8], order: ByteOrder) -> Option<u64> {
    let ilk = read_oct_at(bytes, 0, order).ok()?;
    match Nibble::of(ilk)? {
        Nibble::List | Nibble::Map => {
            let count = (ilk >> WEE_CONTAINER_COUNT_SHIFT) & MAX_WEE_CONTAINER;
            if count == MAX_WEE_CONTAINER {
                read_oct_at(bytes, OCT, order).ok()
            } else {
                Some(count)
            }
        }
        _ => None,
    }
}

impl<'a> ProteinView<'a> {
    /// Parse the header of a protein in either byte order
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let order = detect_order(bytes)?;
        Self::parse_with_order(bytes, order)
    }

    pub fn parse_with_order(bytes: &'a [u8], order: ByteOrder) -> Result<Self> {
        let bad = |what: &str| SlawError::corrupt_protein(what.to_owned());
        let ilk = read_oct_at(bytes, 0, order).map_err(|_| bad("truncated protein header"))?;
        if !is_protein(ilk) {
            return Err(SlawError::corrupt_protein(format!(
                "header oct {:#018x} does not represent a protein",
                ilk
            )));
        }
        let octlen = protein_octlen(ilk);
        let len = usize::try_from(octlen)
            .ok()
            .filter(|&o| o >= 2)
            .and_then(|o| o.checked_mul(OCT))
            .filter(|&l| l <= bytes.len())
            .ok_or_else(|| {
                SlawError::corrupt_protein(format!(
                    "protein claims {} octs, {} bytes available",
                    octlen,
                    bytes.len()
                ))
            })?;
        let bytes = &bytes[..len];
        let oct2 = read_oct_at(bytes, OCT, order).map_err(|_| bad("truncated protein flags"))?;
        if oct2 & PROTEIN_NONSTD_FLAG != 0 {
            return Err(bad("nonstandard protein"));
        }

        let mut pos = 2 * OCT;
        let mut part = |flag: u64| -> Result<Option<Range<usize>>> {
            if oct2 & flag == 0 {
                return Ok(None);
            }
            let octs = codec::checked_octlen(&bytes[pos..], order)
                .map_err(|e| SlawError::corrupt_protein(e.to_string()))?;
            let range = pos..pos + octs * OCT;
            pos = range.end;
            Ok(Some(range))
        };
        let descrips = part(PROTEIN_DESCRIPS_FLAG)?;
        let ingests = part(PROTEIN_INGESTS_FLAG)?;

        let rude = if oct2 & PROTEIN_RUDE_PRESENT_MASK == 0 {
            pos..pos
        } else if oct2 & PROTEIN_VERY_RUDE_FLAG != 0 {
            let rude_len = usize::try_from(oct2 & PROTEIN_VERY_RUDE_MASK)
                .map_err(|_| bad("rude length overflows"))?;
            let end = pos
                .checked_add(rude_len)
                .filter(|&end| end <= len)
                .ok_or_else(|| bad("rude data runs past the protein"))?;
            pos..end
        } else {
            let rude_len = ((oct2 & PROTEIN_WEE_RUDE_MASK) >> PROTEIN_WEE_RUDE_SHIFT) as usize;
            let special = order.special_range(rude_len);
            OCT + special.start..OCT + special.end
        };

        Ok(Self { bytes, order, descrips, ingests, rude })
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// The whole encoded protein
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn descrips_bytes(&self) -> Option<&'a [u8]> {
        self.descrips.clone().map(|r| &self.bytes[r])
    }

    pub fn ingests_bytes(&self) -> Option<&'a [u8]> {
        self.ingests.clone().map(|r| &self.bytes[r])
    }

    pub fn rude(&self) -> &'a [u8] {
        &self.bytes[self.rude.clone()]
    }

    /// Number of descrips, if they are a list
    pub fn descrip_count(&self) -> Option<u64> {
        container_count(self.descrips_bytes()?, self.order)
    }

    /// Number of ingests, if they are a map or list
    pub fn ingest_count(&self) -> Option<u64> {
        container_count(self.ingests_bytes()?, self.order)
    }

    pub fn descrips(&self) -> Result<Option<crate::Slaw>> {
        self.descrips_bytes()
            .map(|b| codec::decode(b, self.order))
            .transpose()
    }

    pub fn ingests(&self) -> Result<Option<crate::Slaw>> {
        self.ingests_bytes()
            .map(|b| codec::decode(b, self.order))
            .transpose()
    }

    pub fn to_protein(&self) -> Result<Protein> {
        Ok(Protein::with_rude(
            self.descrips()?,
            self.ingests()?,
            Bytes::copy_from_slice(self.rude()),
        ))
    }

    /// Build the trimmed protein `request` asks for, decoding only the
    /// wanted parts
    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchedParts> {
        let rude = self.rude();
        let wanted_rude: &[u8] = match request.rude_offset {
            None => &[],
            Some(offset) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(rude.len());
                let available = rude.len() - start;
                let take = request
                    .rude_length
                    .map_or(available, |l| usize::try_from(l).unwrap_or(usize::MAX).min(available));
                &rude[start..start + take]
            }
        };

        let descrips = if request.want_descrips { self.descrips()? } else { None };
        let ingests = if request.want_ingests { self.ingests()? } else { None };
        let protein = Protein::with_rude(descrips, ingests, Bytes::copy_from_slice(wanted_rude));

        Ok(FetchedParts {
            total_bytes: self.total_bytes() as u64,
            descrip_bytes: self.descrips_bytes().map_or(0, |b| b.len() as u64),
            ingest_bytes: self.ingests_bytes().map_or(0, |b| b.len() as u64),
            rude_bytes: rude.len() as u64,
            num_descrips: self.descrip_count(),
            num_ingests: self.ingest_count(),
            protein,
        })
    }
}

/// Which parts of a protein a fetch should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub want_descrips: bool,
    pub want_ingests: bool,
    /// First rude byte to return; `None` returns no rude data
    pub rude_offset: Option<u64>,
    /// Rude bytes to return from the offset; `None` runs to the end
    pub rude_length: Option<u64>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self::whole()
    }
}

impl FetchRequest {
    pub fn whole() -> Self {
        Self { want_descrips: true, want_ingests: true, rude_offset: Some(0), rude_length: None }
    }

    pub fn descrips_only() -> Self {
        Self { want_descrips: true, want_ingests: false, rude_offset: None, rude_length: None }
    }

    pub fn ingests_only() -> Self {
        Self { want_descrips: false, want_ingests: true, rude_offset: None, rude_length: None }
    }

    pub fn rude_range(offset: u64, length: Option<u64>) -> Self {
        Self { want_descrips: false, want_ingests: false, rude_offset: Some(offset), rude_length: length }
    }
}

/// Sizes of the stored protein alongside the trimmed copy
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedParts {
    pub total_bytes: u64,
    pub descrip_bytes: u64,
    pub ingest_bytes: u64,
    pub rude_bytes: u64,
    /// `None` when the descrips are absent or not a list
    pub num_descrips: Option<u64>,
    /// `None` when the ingests are absent or not a map
    pub num_ingests: Option<u64>,
    pub protein: Protein,
}
