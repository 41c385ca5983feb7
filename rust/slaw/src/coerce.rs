//! Coercion of slawx to native numbers and small float vectors
//!
//! Accepted inputs are booleans, scalar numerics, one-element arrays,
//! one-element lists of any of these, and numeric strings. Integer targets
//! never truncate: anything that would lose bits is a range error.
//! Float-to-integer conversions work on the IEEE-754 bit pattern rather
//! than trusting a native cast.

use crate::error::{Result, SlawError};
use crate::numeric::{Numeric, Primitive, Shape};
use crate::parse::{parse_float64, parse_int64, parse_unt64};
use crate::slaw::Slaw;

const EXPONENT_BITS: u32 = 11;
const FRACTION_BITS: u32 = 52;
const EXPONENT_MAX: u64 = (1 << EXPONENT_BITS) - 1;
const EXPONENT_BIAS: i32 = (1 << (EXPONENT_BITS - 1)) - 1;

/// Convert a non-negative float64 bit pattern to an integer, refusing any
/// value that is not exactly integral
fn float64_bits_to_unt64(bits: u64) -> Result<u64> {
    let fraction = bits & ((1 << FRACTION_BITS) - 1);
    let exponent = (bits >> FRACTION_BITS) & EXPONENT_MAX;
    let negative = bits >> 63 != 0;

    if fraction == 0 && exponent == 0 {
        return Ok(0);
    }
    if exponent == 0 || exponent == EXPONENT_MAX {
        return Err(SlawError::range("denormal, infinite or NaN float"));
    }
    if negative {
        return Err(SlawError::range("negative float to unsigned"));
    }

    let mut significand = fraction | (1 << FRACTION_BITS);
    let mut shift = exponent as i32 - EXPONENT_BIAS - FRACTION_BITS as i32;
    while shift > 0 {
        if significand >> 63 != 0 {
            return Err(SlawError::range("float exceeds 64 bits"));
        }
        significand <<= 1;
        shift -= 1;
    }
    while shift < 0 {
        if significand & 1 != 0 {
            return Err(SlawError::range("float has a fractional part"));
        }
        significand >>= 1;
        shift += 1;
    }
    Ok(significand)
}

fn float64_to_unt64(f: f64) -> Result<u64> {
    float64_bits_to_unt64(f.to_bits())
}

fn float64_to_int64(f: f64) -> Result<i64> {
    let bits = f.to_bits();
    let magnitude = float64_bits_to_unt64(bits & !(1 << 63))?;
    if bits >> 63 != 0 {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(SlawError::range(format!("{} underflows int64", f)));
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).map_err(|_| SlawError::range(format!("{} overflows int64", f)))
    }
}

fn int64_to_float64(n: i64) -> Result<f64> {
    let f = n as f64;
    match float64_to_int64(f) {
        Ok(back) if back == n => Ok(f),
        _ => Err(SlawError::range(format!("{} is not exact as float64", n))),
    }
}

fn unt64_to_float64(n: u64) -> Result<f64> {
    let f = n as f64;
    match float64_to_unt64(f) {
        Ok(back) if back == n => Ok(f),
        _ => Err(SlawError::range(format!("{} is not exact as float64", n))),
    }
}

/// Unwrap one-element lists, repeatedly
fn delistify(mut s: &Slaw) -> &Slaw {
    while let Slaw::List(items) = s {
        match items.as_slice() {
            [only] => s = only,
            _ => break,
        }
    }
    s
}

/// The single real scalar held by a numeric, if it holds exactly one
fn single_primitive(n: &Numeric) -> Option<Primitive> {
    if n.is_complex() || n.ilk().shape != Shape::Scalar || n.breadth() != 1 {
        return None;
    }
    n.primitive(0)
}

fn primitive_to_float64(p: Primitive) -> Result<f64> {
    match p {
        Primitive::Int(v) => int64_to_float64(v),
        Primitive::Unt(v) => unt64_to_float64(v),
        Primitive::F32(v) => Ok(f64::from(v)),
        Primitive::F64(v) => Ok(v),
    }
}

fn not_numeric(s: &Slaw) -> SlawError {
    SlawError::not_numeric(format!("cannot coerce a {:?}", s.slaw_type()))
}

impl Slaw {
    pub fn to_int64(&self) -> Result<i64> {
        let s = delistify(self);
        match s {
            Slaw::Boolean(b) => Ok(i64::from(*b)),
            Slaw::String(text) => parse_int64(text),
            Slaw::Numeric(n) => match single_primitive(n).ok_or_else(|| not_numeric(s))? {
                Primitive::Int(v) => Ok(v),
                Primitive::Unt(v) => {
                    i64::try_from(v).map_err(|_| SlawError::range(format!("{} overflows int64", v)))
                }
                Primitive::F32(v) => float64_to_int64(f64::from(v)),
                Primitive::F64(v) => float64_to_int64(v),
            },
            _ => Err(not_numeric(s)),
        }
    }

    pub fn to_unt64(&self) -> Result<u64> {
        let s = delistify(self);
        match s {
            Slaw::Boolean(b) => Ok(u64::from(*b)),
            Slaw::String(text) => parse_unt64(text),
            Slaw::Numeric(n) => match single_primitive(n).ok_or_else(|| not_numeric(s))? {
                Primitive::Int(v) => {
                    u64::try_from(v).map_err(|_| SlawError::range(format!("{} is negative", v)))
                }
                Primitive::Unt(v) => Ok(v),
                Primitive::F32(v) => float64_to_unt64(f64::from(v)),
                Primitive::F64(v) => float64_to_unt64(v),
            },
            _ => Err(not_numeric(s)),
        }
    }

    pub fn to_float64(&self) -> Result<f64> {
        let s = delistify(self);
        match s {
            Slaw::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Slaw::String(text) => parse_float64(text),
            Slaw::Numeric(n) => primitive_to_float64(single_primitive(n).ok_or_else(|| not_numeric(s))?),
            _ => Err(not_numeric(s)),
        }
    }

    /// `"true"`/`"false"` in any case, or any value coercing to 0 or 1
    pub fn to_boolean(&self) -> Result<bool> {
        let s = delistify(self);
        if let Slaw::String(text) = s {
            if text.eq_ignore_ascii_case("true") {
                return Ok(true);
            }
            if text.eq_ignore_ascii_case("false") {
                return Ok(false);
            }
        }
        match s.to_unt64()? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(SlawError::range(format!("{} is not a boolean", n))),
        }
    }

    pub fn to_float32(&self) -> Result<f32> {
        let f = self.to_float64()?;
        let narrow = f as f32;
        if f.is_finite() && narrow.is_infinite() {
            return Err(SlawError::range(format!("{} overflows float32", f)));
        }
        Ok(narrow)
    }

    /// Up to `capacity` float components from a list, a comma separated
    /// string, a real vector, or an array of real scalars
    pub fn to_vn(&self, capacity: usize) -> Result<Vec<f64>> {
        match self {
            Slaw::List(items) if items.len() <= capacity => {
                items.iter().map(Slaw::to_float64).collect()
            }
            Slaw::List(items) => Err(SlawError::WrongLength {
                expected: format!("at most {}", capacity),
                actual: items.len(),
            }),
            Slaw::String(text) => {
                let parts = text.split(',').map(|p| Slaw::string(p.trim_matches(' ')));
                Slaw::list(parts).to_vn(capacity)
            }
            Slaw::Numeric(n) if !n.is_complex() => numeric_components(n, capacity),
            _ => Err(not_numeric(self)),
        }
    }

    pub fn to_v2(&self) -> Result<[f64; 2]> {
        match self.to_vn(4)?.as_slice() {
            &[x, y] => Ok([x, y]),
            v => Err(SlawError::WrongLength { expected: "2".into(), actual: v.len() }),
        }
    }

    /// Three components; a two-component input gets `z = 0`
    pub fn to_v3(&self) -> Result<[f64; 3]> {
        match self.to_vn(4)?.as_slice() {
            &[x, y, z] => Ok([x, y, z]),
            &[x, y] => Ok([x, y, 0.0]),
            v => Err(SlawError::WrongLength { expected: "2 or 3".into(), actual: v.len() }),
        }
    }

    pub fn to_v4(&self) -> Result<[f64; 4]> {
        match self.to_vn(4)?.as_slice() {
            &[x, y, z, w] => Ok([x, y, z, w]),
            v => Err(SlawError::WrongLength { expected: "4".into(), actual: v.len() }),
        }
    }
}

fn numeric_components(n: &Numeric, capacity: usize) -> Result<Vec<f64>> {
    let shape = n.ilk().shape;
    let usable = match (shape, n.is_array()) {
        (Shape::Vector(_), false) => true,
        (Shape::Scalar, true) => {
            let breadth = n.breadth() as usize;
            if breadth > capacity {
                return Err(SlawError::WrongLength {
                    expected: format!("at most {}", capacity),
                    actual: breadth,
                });
            }
            if breadth == 0 {
                return Err(SlawError::WrongLength { expected: "at least 1".into(), actual: 0 });
            }
            true
        }
        _ => false,
    };
    if !usable {
        return Err(SlawError::not_numeric(format!("{:?} is not vector shaped", shape)));
    }
    (0..n.primitive_count())
        .map(|i| {
            n.primitive(i)
                .ok_or_else(|| SlawError::corrupt("numeric payload shorter than its breadth"))
                .and_then(primitive_to_float64)
        })
        .collect()
}

macro_rules! narrowing_coercions {
    ($($name:ident: $wide:ident -> $narrow:ty;)*) => {
        impl Slaw {
            $(
                #[doc = concat!("Coerce to `", stringify!($narrow), "`, a range error if it does not fit")]
                pub fn $name(&self) -> Result<$narrow> {
                    let v = self.$wide()?;
                    <$narrow>::try_from(v).map_err(|_| {
                        SlawError::range(format!("{} does not fit {}", v, stringify!($narrow)))
                    })
                }
            )*
        }
    };
}

narrowing_coercions! {
    to_int32: to_int64 -> i32;
    to_int16: to_int64 -> i16;
    to_int8: to_int64 -> i8;
    to_unt32: to_unt64 -> u32;
    to_unt16: to_unt64 -> u16;
    to_unt8: to_unt64 -> u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_range<T: std::fmt::Debug>(r: Result<T>) -> bool {
        matches!(r, Err(SlawError::Range(_)))
    }

    #[test]
    fn test_homemade_conversion() {
        assert_eq!(float64_to_unt64(0.0).unwrap(), 0);
        assert_eq!(float64_to_unt64(-0.0).unwrap(), 0);
        assert_eq!(float64_to_unt64(4096.0).unwrap(), 4096);
        assert_eq!(float64_to_unt64(18446744073709549568.0).unwrap(), 18446744073709549568);
        assert!(is_range(float64_to_unt64(18446744073709551616.0)));
        assert!(is_range(float64_to_unt64(0.5)));
        assert!(is_range(float64_to_unt64(-1.0)));
        assert!(is_range(float64_to_unt64(f64::NAN)));
        assert!(is_range(float64_to_unt64(f64::MIN_POSITIVE / 2.0)));
        assert_eq!(float64_to_int64(-9223372036854775808.0).unwrap(), i64::MIN);
        assert!(is_range(float64_to_int64(9223372036854775808.0)));
    }

    #[test]
    fn test_int_coercions() {
        assert_eq!(Slaw::from(-7i8).to_int64().unwrap(), -7);
        assert_eq!(Slaw::from(true).to_int64().unwrap(), 1);
        assert_eq!(Slaw::list(vec![Slaw::list(vec![Slaw::from(3u16)])]).to_int64().unwrap(), 3);
        assert_eq!(Slaw::from(Numeric::array(&[9i32])).to_int64().unwrap(), 9);
        assert_eq!(Slaw::string("0x20").to_int64().unwrap(), 32);
        assert_eq!(Slaw::from(12.0f32).to_int64().unwrap(), 12);
        assert!(is_range(Slaw::from(12.5f64).to_int64()));
        assert!(is_range(Slaw::from(u64::MAX).to_int64()));
        assert!(is_range(Slaw::from(-1i32).to_unt64()));
        assert!(matches!(Slaw::Nil.to_int64(), Err(SlawError::NotNumeric(_))));
        assert!(matches!(Slaw::from(Numeric::complex(1i32, 0)).to_int64(), Err(SlawError::NotNumeric(_))));
        assert!(matches!(Slaw::from(Numeric::array(&[1i32, 2])).to_int64(), Err(SlawError::NotNumeric(_))));
    }

    #[test]
    fn test_float_roundtrip_precision() {
        let exact = (1i64 << 53) - 1;
        let f = Slaw::from(exact).to_float64().unwrap();
        assert_eq!(Slaw::from(f).to_int64().unwrap(), exact);
        assert!(is_range(Slaw::from((1i64 << 53) + 1).to_float64()));
        assert!(is_range(Slaw::from(u64::MAX).to_float64()));
        assert_eq!(Slaw::string("2.5").to_float64().unwrap(), 2.5);
    }

    #[test]
    fn test_narrowing() {
        assert_eq!(Slaw::from(300i64).to_int16().unwrap(), 300);
        assert!(is_range(Slaw::from(300i64).to_int8()));
        assert!(is_range(Slaw::from(256u32).to_unt8()));
        assert!(is_range(Slaw::from(1e300f64).to_float32()));
        assert_eq!(Slaw::from(0.5f64).to_float32().unwrap(), 0.5);
    }

    #[test]
    fn test_boolean() {
        assert!(Slaw::string("TRUE").to_boolean().unwrap());
        assert!(!Slaw::string("False").to_boolean().unwrap());
        assert!(Slaw::from(1u8).to_boolean().unwrap());
        assert!(is_range(Slaw::from(2u8).to_boolean()));
        assert!(matches!(Slaw::string("yes").to_boolean(), Err(SlawError::NotNumeric(_))));
    }

    #[test]
    fn test_vectors() {
        let v = Slaw::from(Numeric::vector(&[1i32, 2, 3]).unwrap());
        assert_eq!(v.to_v3().unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(Slaw::string("1, 2").to_v3().unwrap(), [1.0, 2.0, 0.0]);
        assert_eq!(Slaw::list(vec![1.5f64, 2.5]).to_v2().unwrap(), [1.5, 2.5]);
        assert_eq!(Slaw::from(Numeric::array(&[1u8, 2, 3, 4])).to_v4().unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            Slaw::list(vec![1i32, 2, 3, 4, 5]).to_v4(),
            Err(SlawError::WrongLength { actual: 5, .. })
        ));
        assert!(matches!(Slaw::list(vec![1i32]).to_v2(), Err(SlawError::WrongLength { .. })));
        assert!(matches!(Slaw::from(7i32).to_v2(), Err(SlawError::NotNumeric(_))));
        assert!(matches!(Slaw::string("1,x").to_v2(), Err(SlawError::NotNumeric(_))));
    }
}
