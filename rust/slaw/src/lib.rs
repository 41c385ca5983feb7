//! Slaw - Self-Describing Binary Values
//!
//! This crate provides the slaw value tree, its oct-based binary codec,
//! typed coercions and the protein framer used by plasma pools.

pub mod codec;
pub mod coerce;
pub mod error;
pub mod file;
pub mod ilk;
pub mod numeric;
pub mod ordering;
pub mod parse;
pub mod protein;
pub mod retort;
pub mod slaw;
pub mod view;

pub use codec::{decode, encode, encode_with_order, equal, ByteOrder};
pub use error::{Result, SlawError};
pub use file::{read_from_file, write_to_file};
pub use numeric::{NumKind, Numeric, NumericElement, NumericIlk, Primitive, Shape};
pub use ordering::semantic_compare;
pub use parse::{parse_float64, parse_int64, parse_unt64};
pub use protein::{Protein, ProteinBuilder, SearchMode};
pub use retort::Retort;
pub use slaw::{Slaw, SlawMap, SlawType};
pub use view::{FetchRequest, FetchedParts, ProteinView};

/// Re-export common types
pub mod prelude {
    pub use crate::{
        codec::ByteOrder,
        error::{Result, SlawError},
        protein::{Protein, SearchMode},
        slaw::{Slaw, SlawMap},
    };
}

/// Slaw encoding version written by this crate
pub const SLAW_VERSION: u8 = 2;
