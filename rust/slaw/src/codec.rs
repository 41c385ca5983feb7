//! Oct-based binary codec
//!
//! Encoding is infallible and always zero-fills padding. Decoding checks
//! every length against the input and reports `CorruptSlaw` instead of
//! reading past the end.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{Result, SlawError};
use crate::ilk::{
    octlen_of_ilk, Nibble, BOOL_ILK, BOOL_ILKMASK, CONS_ILK, CONS_ILKMASK,
    FULL_STRING_PAD_SHIFT, MAX_WEE_CONTAINER, NIL_ILK, OCT, OCTLEN_MASK,
    WEE_CONTAINER_COUNT_SHIFT, WEE_STRING_LEN_SHIFT,
};
use crate::numeric::{Numeric, NumericIlk};
use crate::protein::Protein;
use crate::slaw::{Slaw, SlawMap};

/// Byte order of an encoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::Big;

    pub fn swapped(self) -> ByteOrder {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    pub(crate) fn oct_bytes(self, v: u64) -> [u8; OCT] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    pub(crate) fn read_oct(self, b: [u8; OCT]) -> u64 {
        match self {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        }
    }

    /// Where the `len` low-order "special" bytes of an oct sit
    pub(crate) fn special_range(self, len: usize) -> std::ops::Range<usize> {
        match self {
            ByteOrder::Little => 0..len,
            ByteOrder::Big => OCT - len..OCT,
        }
    }
}

/// Encode in native byte order
pub fn encode(slaw: &Slaw) -> Bytes {
    encode_with_order(slaw, ByteOrder::NATIVE)
}

pub fn encode_with_order(slaw: &Slaw, order: ByteOrder) -> Bytes {
    let mut buf = BytesMut::with_capacity(slaw.encoded_len());
    encode_into(slaw, order, &mut buf);
    buf.freeze()
}

pub(crate) fn put_oct(buf: &mut BytesMut, order: ByteOrder, v: u64) {
    match order {
        ByteOrder::Little => buf.put_u64_le(v),
        ByteOrder::Big => buf.put_u64(v),
    }
}

fn patch_oct(buf: &mut BytesMut, at: usize, order: ByteOrder, v: u64) {
    buf[at..at + OCT].copy_from_slice(&order.oct_bytes(v));
}

fn pad_to_oct(buf: &mut BytesMut, start: usize) {
    let written = buf.len() - start;
    let rem = written % OCT;
    if rem != 0 {
        buf.put_bytes(0, OCT - rem);
    }
}

/// Little-endian primitives rewritten in `order`
fn ordered_primitives(data: &[u8], width: usize, order: ByteOrder) -> Vec<u8> {
    let mut out = data.to_vec();
    if order == ByteOrder::Big && width > 1 {
        for chunk in out.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
    out
}

pub(crate) fn encode_into(slaw: &Slaw, order: ByteOrder, buf: &mut BytesMut) {
    match slaw {
        Slaw::Nil => put_oct(buf, order, NIL_ILK),
        Slaw::Boolean(b) => put_oct(buf, order, BOOL_ILK | u64::from(*b)),
        Slaw::String(s) => encode_string(s.as_bytes(), order, buf),
        Slaw::Numeric(n) => encode_numeric(n, order, buf),
        Slaw::Cons(car, cdr) => {
            let start = buf.len();
            put_oct(buf, order, 0);
            encode_into(car, order, buf);
            encode_into(cdr, order, buf);
            let octlen = ((buf.len() - start) / OCT) as u64;
            patch_oct(buf, start, order, CONS_ILK | octlen);
        }
        Slaw::List(items) => encode_container(Nibble::List, items, order, buf),
        Slaw::Map(map) => encode_container(Nibble::Map, map.entries(), order, buf),
        Slaw::Protein(p) => p.encode_into(order, buf),
    }
}

fn encode_string(bytes: &[u8], order: ByteOrder, buf: &mut BytesMut) {
    let term_len = bytes.len() + 1;
    if bytes.len() < 7 {
        let header = Nibble::WeeString.bits() | ((term_len as u64) << WEE_STRING_LEN_SHIFT);
        let mut oct = order.oct_bytes(header);
        let range = order.special_range(term_len);
        let start = range.start;
        oct[start..start + bytes.len()].copy_from_slice(bytes);
        oct[start + bytes.len()] = 0;
        buf.put_slice(&oct);
        return;
    }
    let pad_len = term_len.div_ceil(OCT) * OCT;
    let pad = (pad_len - term_len) as u64;
    let octlen = (pad_len / OCT) as u64 + 1;
    put_oct(buf, order, Nibble::FullString.bits() | (pad << FULL_STRING_PAD_SHIFT) | octlen);
    buf.put_slice(bytes);
    buf.put_bytes(0, pad_len - bytes.len());
}

fn encode_numeric(n: &Numeric, order: ByteOrder, buf: &mut BytesMut) {
    let ilk = n.ilk();
    let payload = ordered_primitives(n.bytes(), ilk.width as usize, order);
    if !n.is_array() && ilk.unit_size() <= 4 {
        let mut oct = order.oct_bytes(n.header());
        let range = order.special_range(payload.len());
        oct[range].copy_from_slice(&payload);
        buf.put_slice(&oct);
        return;
    }
    put_oct(buf, order, n.header());
    let start = buf.len();
    buf.put_slice(&payload);
    pad_to_oct(buf, start);
}

fn encode_container(nibble: Nibble, items: &[Slaw], order: ByteOrder, buf: &mut BytesMut) {
    let start = buf.len();
    let count = items.len() as u64;
    let wee = count < MAX_WEE_CONTAINER;
    put_oct(buf, order, 0);
    if !wee {
        put_oct(buf, order, count);
    }
    for item in items {
        encode_into(item, order, buf);
    }
    let octlen = ((buf.len() - start) / OCT) as u64;
    let header_count = if wee { count } else { MAX_WEE_CONTAINER };
    let header = nibble.bits() | (header_count << WEE_CONTAINER_COUNT_SHIFT) | (octlen & OCTLEN_MASK);
    patch_oct(buf, start, order, header);
}

/// Length in octs of the encoding of `slaw`
pub fn octlen(slaw: &Slaw) -> u64 {
    match slaw {
        Slaw::Nil | Slaw::Boolean(_) => 1,
        Slaw::String(s) => {
            let n = s.len() as u64;
            if n < 7 {
                1
            } else {
                (n + 1).div_ceil(8) + 1
            }
        }
        Slaw::Numeric(n) => octlen_of_ilk(n.header()).unwrap_or(1),
        Slaw::Cons(car, cdr) => 1 + octlen(car) + octlen(cdr),
        Slaw::List(items) => container_octlen(items),
        Slaw::Map(map) => container_octlen(map.entries()),
        Slaw::Protein(p) => p.octlen(),
    }
}

fn container_octlen(items: &[Slaw]) -> u64 {
    let header = if (items.len() as u64) < MAX_WEE_CONTAINER { 1 } else { 2 };
    header + items.iter().map(octlen).sum::<u64>()
}

pub(crate) fn read_oct_at(bytes: &[u8], at: usize, order: ByteOrder) -> Result<u64> {
    let end = at
        .checked_add(OCT)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| SlawError::corrupt(format!("oct at byte {} past end of {}", at, bytes.len())))?;
    let mut b = [0u8; OCT];
    b.copy_from_slice(&bytes[at..end]);
    Ok(order.read_oct(b))
}

/// Octs claimed by the slaw at the start of `bytes`, checked against the
/// buffer length
pub fn checked_octlen(bytes: &[u8], order: ByteOrder) -> Result<usize> {
    let ilk = read_oct_at(bytes, 0, order)?;
    let octlen = octlen_of_ilk(ilk)
        .ok_or_else(|| SlawError::corrupt(format!("unknown header {:#018x}", ilk)))?;
    let len = usize::try_from(octlen)
        .ok()
        .filter(|&o| o > 0)
        .and_then(|o| o.checked_mul(OCT))
        .filter(|&l| l <= bytes.len())
        .ok_or_else(|| {
            SlawError::corrupt(format!(
                "header {:#018x} claims {} octs, {} bytes available",
                ilk,
                octlen,
                bytes.len()
            ))
        })?;
    Ok(len / OCT)
}

/// Decode exactly one slaw occupying the start of `bytes`
pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<Slaw> {
    decode_prefix(bytes, order).map(|(slaw, _)| slaw)
}

/// Decode the slaw at the start of `bytes`, returning it and the number of
/// bytes it occupied
pub fn decode_prefix(bytes: &[u8], order: ByteOrder) -> Result<(Slaw, usize)> {
    let octs = checked_octlen(bytes, order)?;
    let len = octs * OCT;
    let slaw = decode_exact(&bytes[..len], order)?;
    trace!(octs, "decoded slaw");
    Ok((slaw, len))
}

fn decode_exact(bytes: &[u8], order: ByteOrder) -> Result<Slaw> {
    let ilk = read_oct_at(bytes, 0, order)?;
    let nibble = Nibble::of(ilk)
        .ok_or_else(|| SlawError::corrupt(format!("reserved nibble in {:#018x}", ilk)))?;
    let mut header = [0u8; OCT];
    header.copy_from_slice(&bytes[..OCT]);
    match nibble {
        Nibble::Symbol => {
            if ilk == NIL_ILK {
                Ok(Slaw::Nil)
            } else if ilk & BOOL_ILKMASK == BOOL_ILK {
                Ok(Slaw::Boolean(ilk & 1 == 1))
            } else {
                Err(SlawError::corrupt(format!("unknown symbol {:#018x}", ilk)))
            }
        }
        Nibble::WeeString => {
            let term_len = ((ilk >> WEE_STRING_LEN_SHIFT) & 7) as usize;
            if term_len == 0 {
                return Err(SlawError::corrupt("wee string without terminator"));
            }
            let range = order.special_range(term_len);
            let start = range.start;
            to_string(&header[start..start + term_len - 1])
        }
        Nibble::FullString => {
            let pad = ((ilk >> FULL_STRING_PAD_SHIFT) & 7) as usize;
            let len = (bytes.len() - OCT)
                .checked_sub(pad)
                .filter(|&l| l >= OCT)
                .ok_or_else(|| SlawError::corrupt("full string too short"))?;
            to_string(&bytes[OCT..OCT + len - 1])
        }
        Nibble::Cons => {
            if ilk & CONS_ILKMASK != CONS_ILK {
                return Err(SlawError::corrupt(format!("bad cons header {:#018x}", ilk)));
            }
            let (car, used) = decode_prefix(&bytes[OCT..], order)?;
            let (cdr, _) = decode_prefix(&bytes[OCT + used..], order)?;
            Ok(Slaw::cons(car, cdr))
        }
        Nibble::List | Nibble::Map => {
            let items = decode_children(ilk, bytes, order)?;
            if nibble == Nibble::List {
                return Ok(Slaw::List(items));
            }
            if items.iter().any(|e| !e.is_cons()) {
                return Err(SlawError::corrupt("map entry is not a cons"));
            }
            Ok(Slaw::Map(SlawMap::from_entries_unchecked(items)))
        }
        Nibble::Protein => Protein::decode_with_order(bytes, order).map(Slaw::from),
        Nibble::SwappedProtein => Protein::decode_with_order(bytes, order.swapped()).map(Slaw::from),
        _ => decode_numeric(ilk, &header, bytes, order),
    }
}

fn to_string(bytes: &[u8]) -> Result<Slaw> {
    String::from_utf8(bytes.to_vec())
        .map(Slaw::String)
        .map_err(|e| SlawError::corrupt(format!("string is not utf-8: {}", e)))
}

fn decode_children(ilk: u64, bytes: &[u8], order: ByteOrder) -> Result<Vec<Slaw>> {
    let mut count = (ilk >> WEE_CONTAINER_COUNT_SHIFT) & MAX_WEE_CONTAINER;
    let mut at = OCT;
    if count == MAX_WEE_CONTAINER {
        count = read_oct_at(bytes, at, order)?;
        at += OCT;
    }
    // every child needs at least one oct
    if count > (bytes.len() / OCT) as u64 {
        return Err(SlawError::corrupt(format!("container claims {} children", count)));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, used) = decode_prefix(&bytes[at..], order)?;
        items.push(item);
        at += used;
    }
    Ok(items)
}

fn decode_numeric(ilk: u64, header: &[u8; OCT], bytes: &[u8], order: ByteOrder) -> Result<Slaw> {
    let (num_ilk, array, breadth): (NumericIlk, bool, u64) = NumericIlk::from_header(ilk)?;
    let unit = num_ilk.unit_size();
    let width = num_ilk.width as usize;
    let raw: &[u8] = if !array && unit <= 4 {
        &header[order.special_range(unit)]
    } else {
        let len = usize::try_from(breadth)
            .ok()
            .and_then(|b| b.checked_mul(unit))
            .filter(|&l| l <= bytes.len() - OCT)
            .ok_or_else(|| SlawError::corrupt("numeric payload past end"))?;
        &bytes[OCT..OCT + len]
    };
    let data = ordered_primitives(raw, width, order);
    Numeric::from_raw(num_ilk, array, data)
        .map(Slaw::Numeric)
        .map_err(|e| SlawError::corrupt(e.to_string()))
}

/// Byte-exact comparison of two encoded slawx, padding included
pub fn equal_encoded(a: &[u8], b: &[u8], order: ByteOrder) -> bool {
    match (checked_octlen(a, order), checked_octlen(b, order)) {
        (Ok(la), Ok(lb)) => la == lb && a[..la * OCT] == b[..lb * OCT],
        _ => false,
    }
}

/// Byte-exact equality through canonical encodings
pub fn equal(a: &Slaw, b: &Slaw) -> bool {
    encode(a) == encode(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Shape;

    fn roundtrip(s: &Slaw) {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let bytes = encode_with_order(s, order);
            assert_eq!(bytes.len() % OCT, 0);
            assert_eq!(bytes.len(), s.encoded_len(), "octlen for {}", s);
            let back = decode(&bytes, order).unwrap();
            assert_eq!(&back, s);
        }
    }

    #[test]
    fn test_wire_constants() {
        assert_eq!(&encode_with_order(&Slaw::Nil, ByteOrder::Big)[..], &0x2000000000000002u64.to_be_bytes());
        assert_eq!(
            &encode_with_order(&Slaw::Boolean(true), ByteOrder::Little)[..],
            &0x2000000000000001u64.to_le_bytes()
        );
    }

    #[test]
    fn test_wee_string_layout() {
        let le = encode_with_order(&Slaw::string("hi"), ByteOrder::Little);
        assert_eq!(&le[..3], b"hi\0");
        assert_eq!(le[7], 0x33);
        let be = encode_with_order(&Slaw::string("hi"), ByteOrder::Big);
        assert_eq!(&be[5..8], b"hi\0");
        assert_eq!(be[0], 0x33);
    }

    #[test]
    fn test_full_string_padding() {
        let s = Slaw::string("seven!!");
        let bytes = encode_with_order(&s, ByteOrder::Little);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[7] >> 4, 7);
        roundtrip(&s);
        roundtrip(&Slaw::string("exactly fifteen"));
        roundtrip(&Slaw::string(""));
    }

    #[test]
    fn test_numeric_roundtrips() {
        roundtrip(&Slaw::from(-5i8));
        roundtrip(&Slaw::from(0x1234u16));
        roundtrip(&Slaw::from(-123456i32));
        roundtrip(&Slaw::from(u64::MAX));
        roundtrip(&Slaw::from(3.25f32));
        roundtrip(&Slaw::from(-0.0f64));
        roundtrip(&Numeric::complex(1i16, -1i16).into());
        roundtrip(&Numeric::vector(&[1.0f64, 2.0, 3.0]).unwrap().into());
        roundtrip(&Numeric::multivector(&[7u8; 16]).unwrap().into());
        roundtrip(&Numeric::array(&[1i32, 2, 3]).into());
        roundtrip(&Numeric::array::<u8>(&[]).into());
        roundtrip(&Numeric::array_of(Shape::Vector(2), true, &[1.0f32, 2.0, 3.0, 4.0]).unwrap().into());
    }

    #[test]
    fn test_wee_numeric_is_inline() {
        let bytes = encode_with_order(&Slaw::from(0x01020304u32), ByteOrder::Big);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[4..], &[1, 2, 3, 4]);
        assert_eq!(encode(&Slaw::from(1i64)).len(), 16);
    }

    #[test]
    fn test_container_roundtrips() {
        let big: Vec<Slaw> = (0..40i32).map(Slaw::from).collect();
        roundtrip(&Slaw::List(big));
        roundtrip(&Slaw::list(Vec::<Slaw>::new()));
        roundtrip(&Slaw::cons("key", Slaw::list(vec![Slaw::Nil, Slaw::Boolean(false)])));
        roundtrip(&Slaw::map([("a", 1.5f64), ("b", 2.5f64)]));
    }

    #[test]
    fn test_truncated_input_is_corrupt() {
        let bytes = encode(&Slaw::list(vec![Slaw::string("a long enough string")]));
        for cut in [0, 7, 8, 16, bytes.len() - 8] {
            let err = decode(&bytes[..cut], ByteOrder::NATIVE).unwrap_err();
            assert!(matches!(err, SlawError::CorruptSlaw(_)), "cut {}", cut);
        }
    }

    #[test]
    fn test_map_with_non_cons_child_is_corrupt() {
        let mut bytes = BytesMut::from(&encode_with_order(&Slaw::list(vec![Slaw::Nil]), ByteOrder::Little)[..]);
        bytes[7] = (bytes[7] & 0x0f) | 0x50;
        assert!(decode(&bytes, ByteOrder::Little).is_err());
    }

    #[test]
    fn test_equal_encoded_sees_padding() {
        let a = encode_with_order(&Slaw::string("padding!"), ByteOrder::Little);
        let mut b = BytesMut::from(&a[..]);
        let last = b.len() - 1;
        b[last] = 0xaa;
        assert!(!equal_encoded(&a, &b, ByteOrder::Little));
        assert!(equal_encoded(&a, &a.clone(), ByteOrder::Little));
        // the decoded values do not see the garbage
        assert_eq!(decode(&a, ByteOrder::Little).unwrap(), decode(&b, ByteOrder::Little).unwrap());
    }
}
