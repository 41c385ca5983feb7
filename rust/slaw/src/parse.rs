//! Numeric string parsing
//!
//! The float parser never calls into a platform float parser or `pow`, so
//! a given string yields the same bits everywhere, and it reports precision
//! loss instead of rounding silently.

use crate::error::{Result, SlawError};

/// Largest significand span, in bits, accepted without loss
const MAX_SIGNIFICAND_BITS: u32 = 52;

enum Parsed {
    Finite { negative: bool, significand: u64, base: u32, exponent: i32 },
    Infinity { negative: bool },
    NaN,
}

fn starts_with_ignore_case(s: &[u8], word: &[u8]) -> bool {
    s.len() >= word.len() && s[..word.len()].eq_ignore_ascii_case(word)
}

fn parse_number(text: &str) -> Result<Parsed> {
    let not_numeric = || SlawError::not_numeric(format!("{:?} is not a number", text));
    let mut s = text.as_bytes();
    let mut negative = false;
    match s.first() {
        Some(b'-') => {
            negative = true;
            s = &s[1..];
        }
        Some(b'+') => s = &s[1..],
        _ => {}
    }
    let mut saw_point = false;
    if s.first() == Some(&b'.') {
        saw_point = true;
        s = &s[1..];
    }

    for word in [&b"infinity"[..], b"inf"] {
        if starts_with_ignore_case(s, word) && s.len() == word.len() {
            return Ok(Parsed::Infinity { negative });
        }
    }
    if starts_with_ignore_case(s, b"nan") && s.len() == 3 {
        return Ok(Parsed::NaN);
    }

    let hex = !saw_point && s.len() >= 2 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X');
    if hex {
        s = &s[2..];
    }
    let base: u32 = if hex { 2 } else { 10 };

    let mut significand: u64 = 0;
    let mut exponent: i32 = 0;
    let mut digits = 0usize;
    loop {
        let Some(&c) = s.first() else { break };
        if c == b'.' && !saw_point {
            saw_point = true;
            s = &s[1..];
            continue;
        }
        if !hex && (c == b'e' || c == b'E') {
            break;
        }
        let Some(dig) = (c as char).to_digit(16) else { break };
        if !hex && dig > 9 {
            return Err(not_numeric());
        }
        let shifted = if hex {
            significand.checked_mul(16)
        } else {
            significand.checked_mul(10)
        };
        significand = shifted
            .and_then(|v| v.checked_add(u64::from(dig)))
            .ok_or_else(|| SlawError::range(format!("significand of {:?} overflows", text)))?;
        if saw_point {
            exponent -= if hex { 4 } else { 1 };
        }
        digits += 1;
        s = &s[1..];
    }
    if digits == 0 {
        return Err(not_numeric());
    }

    if !s.is_empty() {
        let marker_ok = if hex {
            s[0] == b'p' || s[0] == b'P'
        } else {
            s[0] == b'e' || s[0] == b'E'
        };
        if !marker_ok {
            return Err(not_numeric());
        }
        s = &s[1..];
        let mut sign = 1i32;
        match s.first() {
            Some(b'-') => {
                sign = -1;
                s = &s[1..];
            }
            Some(b'+') => s = &s[1..],
            _ => {}
        }
        if s.is_empty() {
            return Err(not_numeric());
        }
        let mut exp: i32 = 0;
        for &c in s {
            if !c.is_ascii_digit() {
                return Err(not_numeric());
            }
            exp = exp.saturating_mul(10).saturating_add(i32::from(c - b'0'));
        }
        exponent = exponent.saturating_add(exp.saturating_mul(sign));
    }

    Ok(Parsed::Finite { negative, significand, base, exponent })
}

/// Parse a decimal or `0x` hexadecimal float, with `e` or `p` exponents,
/// `inf` and `nan`
pub fn parse_float64(text: &str) -> Result<f64> {
    let (negative, significand, base, exponent) = match parse_number(text)? {
        Parsed::NaN => return Ok(f64::NAN),
        Parsed::Infinity { negative } => {
            return Ok(if negative { f64::NEG_INFINITY } else { f64::INFINITY })
        }
        Parsed::Finite { negative, significand, base, exponent } => {
            (negative, significand, base, exponent)
        }
    };

    if significand != 0 {
        let span = 64 - significand.leading_zeros() - significand.trailing_zeros();
        if span > MAX_SIGNIFICAND_BITS {
            return Err(SlawError::range(format!("{:?} needs {} significant bits", text, span)));
        }
    }

    // exact: the significand spans at most 52 bits
    let mantissa = significand as f64;
    let magnitude = scale(mantissa, base, exponent);
    if magnitude.is_infinite() || (significand != 0 && magnitude == 0.0) {
        return Err(SlawError::range(format!("{:?} is out of range", text)));
    }
    Ok(if negative { -magnitude } else { magnitude })
}

/// `mantissa * base^exponent` using only exact or single-rounding steps
fn scale(mantissa: f64, base: u32, exponent: i32) -> f64 {
    if mantissa == 0.0 || exponent == 0 {
        return mantissa;
    }
    let steps = exponent.unsigned_abs();
    if base == 2 {
        let mut v = mantissa;
        for _ in 0..steps {
            v = if exponent > 0 { v * 2.0 } else { v / 2.0 };
            if v.is_infinite() || v == 0.0 {
                break;
            }
        }
        return v;
    }
    let mut power = 1.0f64;
    for _ in 0..steps {
        power *= 10.0;
        if power.is_infinite() {
            break;
        }
    }
    if exponent > 0 {
        mantissa * power
    } else {
        mantissa / power
    }
}

struct IntParts<'a> {
    negative: bool,
    radix: u32,
    digits: &'a str,
}

fn split_int(text: &str) -> Result<IntParts<'_>> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(SlawError::not_numeric(format!("{:?} is not an integer", text)));
    }
    Ok(IntParts { negative, radix, digits })
}

fn magnitude(parts: &IntParts<'_>, text: &str) -> Result<u64> {
    u64::from_str_radix(parts.digits, parts.radix)
        .map_err(|_| SlawError::range(format!("{:?} overflows 64 bits", text)))
}

/// Integer with C `strtoll` base-0 conventions: decimal, `0x` hex or
/// leading-zero octal, optional sign
pub fn parse_int64(text: &str) -> Result<i64> {
    let parts = split_int(text)?;
    let mag = magnitude(&parts, text)?;
    if parts.negative {
        if mag > i64::MIN.unsigned_abs() {
            return Err(SlawError::range(format!("{:?} underflows int64", text)));
        }
        Ok((mag as i64).wrapping_neg())
    } else {
        i64::try_from(mag).map_err(|_| SlawError::range(format!("{:?} overflows int64", text)))
    }
}

/// Unsigned variant of [`parse_int64`]; negative values other than zero are
/// a range error
pub fn parse_unt64(text: &str) -> Result<u64> {
    let parts = split_int(text)?;
    let mag = magnitude(&parts, text)?;
    if parts.negative && mag != 0 {
        return Err(SlawError::range(format!("{:?} is negative", text)));
    }
    Ok(mag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(r: Result<impl std::fmt::Debug>) -> bool {
        matches!(r, Err(SlawError::Range(_)))
    }

    fn not_numeric(r: Result<impl std::fmt::Debug>) -> bool {
        matches!(r, Err(SlawError::NotNumeric(_)))
    }

    #[test]
    fn test_decimal_floats() {
        assert_eq!(parse_float64("1.5").unwrap(), 1.5);
        assert_eq!(parse_float64("-0.25").unwrap(), -0.25);
        assert_eq!(parse_float64("+3e2").unwrap(), 300.0);
        assert_eq!(parse_float64("0.1").unwrap(), 0.1);
        assert_eq!(parse_float64("125E-2").unwrap(), 1.25);
        assert_eq!(parse_float64(".5").unwrap(), 0.5);
        assert_eq!(parse_float64("7.").unwrap(), 7.0);
    }

    #[test]
    fn test_hex_floats() {
        assert_eq!(parse_float64("0x10").unwrap(), 16.0);
        assert_eq!(parse_float64("0x1.8p1").unwrap(), 3.0);
        assert_eq!(parse_float64("-0xAp-2").unwrap(), -2.5);
        assert_eq!(parse_float64("0xe").unwrap(), 14.0);
    }

    #[test]
    fn test_special_values() {
        assert!(parse_float64("NaN").unwrap().is_nan());
        assert_eq!(parse_float64("-inf").unwrap(), f64::NEG_INFINITY);
        assert_eq!(parse_float64(".Inf").unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_float_errors() {
        assert!(not_numeric(parse_float64("")));
        assert!(not_numeric(parse_float64("1.2.3")));
        assert!(not_numeric(parse_float64("12abc")));
        assert!(not_numeric(parse_float64("1e")));
        assert_eq!(parse_float64("0x1e5").unwrap(), 485.0);
        assert!(range(parse_float64("1e400")));
        assert!(range(parse_float64("1e-400")));
        // 2^53 + 1 needs 54 bits
        assert!(range(parse_float64("9007199254740993")));
        assert!(range(parse_float64("123456789012345678901234567890")));
        assert_eq!(parse_float64("9007199254740992").unwrap(), 9007199254740992.0);
    }

    #[test]
    fn test_integers() {
        assert_eq!(parse_int64("42").unwrap(), 42);
        assert_eq!(parse_int64("-0x10").unwrap(), -16);
        assert_eq!(parse_int64("010").unwrap(), 8);
        assert_eq!(parse_int64("0").unwrap(), 0);
        assert_eq!(parse_int64("-9223372036854775808").unwrap(), i64::MIN);
        assert!(range(parse_int64("9223372036854775808")));
        assert!(not_numeric(parse_int64("08")));
        assert!(not_numeric(parse_int64("12 ")));
        assert!(not_numeric(parse_int64("0x")));
        assert_eq!(parse_unt64("18446744073709551615").unwrap(), u64::MAX);
        assert!(range(parse_unt64("-1")));
        assert!(range(parse_unt64("18446744073709551616")));
    }
}
