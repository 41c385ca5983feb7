//! Numeric slawx: one type covering every element kind, width, shape,
//! complexness and array-ness
//!
//! Element bytes are kept little-endian in memory regardless of the byte
//! order a value is later encoded in; the codec swaps per component.

use std::cmp::Ordering;

use crate::error::{Result, SlawError};
use crate::ilk::{
    NUMERIC_ARRAY_FLAG, NUMERIC_BREADTH_MASK, NUMERIC_BSIZE_SHIFT, NUMERIC_COMPLEX_FLAG,
    NUMERIC_FLOAT_FLAG, NUMERIC_ILK, NUMERIC_SIZE_SHIFT,
    NUMERIC_UNIT_BSIZE_MASK, NUMERIC_UNSIGNED_FLAG, NUMERIC_VEC_SHIFT, VECTOR_WIDTHS,
};

/// Element kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumKind {
    Int,
    Unt,
    Float,
}

/// Arrangement of components inside one numeric unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    /// Plain vector of 2, 3 or 4 components
    Vector(u8),
    /// Multivector of dimension 2..=5, holding `2^d` components
    MultiVector(u8),
}

impl Shape {
    /// Number of real-or-complex components
    pub fn components(self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n as usize,
            Shape::MultiVector(d) => 1usize << d,
        }
    }

    fn code(self) -> u64 {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(n) => n as u64 - 1,
            Shape::MultiVector(d) => d as u64 + 2,
        }
    }

    fn from_code(code: u64) -> Shape {
        let width = (7 & (VECTOR_WIDTHS >> (3 * code))) as u8;
        match code {
            0 => Shape::Scalar,
            1..=3 => Shape::Vector(width),
            _ => Shape::MultiVector(width),
        }
    }

    fn is_valid(self) -> bool {
        match self {
            Shape::Scalar => true,
            Shape::Vector(n) => (2..=4).contains(&n),
            Shape::MultiVector(d) => (2..=5).contains(&d),
        }
    }
}

/// Everything about a numeric type except array breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericIlk {
    pub kind: NumKind,
    /// Bytes per primitive: 1, 2, 4 or 8
    pub width: u8,
    pub complex: bool,
    pub shape: Shape,
}

impl NumericIlk {
    pub fn scalar(kind: NumKind, width: u8) -> Self {
        Self { kind, width, complex: false, shape: Shape::Scalar }
    }

    pub fn with_shape(self, shape: Shape) -> Self {
        Self { shape, ..self }
    }

    pub fn with_complex(self, complex: bool) -> Self {
        Self { complex, ..self }
    }

    /// Check the combination is one the wire format can express
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.width, 1 | 2 | 4 | 8) {
            return Err(SlawError::InvalidArgument(format!("numeric width {}", self.width)));
        }
        if self.kind == NumKind::Float && self.width < 4 {
            return Err(SlawError::InvalidArgument(format!("float width {}", self.width)));
        }
        if !self.shape.is_valid() {
            return Err(SlawError::InvalidArgument(format!("numeric shape {:?}", self.shape)));
        }
        if self.complex && matches!(self.shape, Shape::MultiVector(_)) {
            return Err(SlawError::InvalidArgument("complex multivector".into()));
        }
        Ok(())
    }

    /// Primitive values per unit
    pub fn primitives(&self) -> usize {
        self.shape.components() * if self.complex { 2 } else { 1 }
    }

    /// Bytes per unit (one scalar, vector or multivector)
    pub fn unit_size(&self) -> usize {
        self.width as usize * self.primitives()
    }

    fn size_code(&self) -> u64 {
        match self.width {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        }
    }

    /// Header bits shared by every value of this type
    pub fn personality(&self, array: bool) -> u64 {
        let mut ilk = NUMERIC_ILK
            | (self.size_code() << NUMERIC_SIZE_SHIFT)
            | (self.shape.code() << NUMERIC_VEC_SHIFT)
            | ((self.unit_size() as u64 - 1) << NUMERIC_BSIZE_SHIFT);
        if array {
            ilk |= NUMERIC_ARRAY_FLAG;
        }
        match self.kind {
            NumKind::Float => ilk |= NUMERIC_FLOAT_FLAG,
            NumKind::Unt => ilk |= NUMERIC_UNSIGNED_FLAG,
            NumKind::Int => {}
        }
        if self.complex {
            ilk |= NUMERIC_COMPLEX_FLAG;
        }
        ilk
    }

    /// Decode a numeric header into (type, is-array, breadth)
    pub fn from_header(ilk: u64) -> Result<(NumericIlk, bool, u64)> {
        if ilk & NUMERIC_ILK == 0 {
            return Err(SlawError::corrupt(format!("{:#018x} is not numeric", ilk)));
        }
        let kind = match (ilk & NUMERIC_FLOAT_FLAG != 0, ilk & NUMERIC_UNSIGNED_FLAG != 0) {
            (true, false) => NumKind::Float,
            (false, true) => NumKind::Unt,
            (false, false) => NumKind::Int,
            (true, true) => {
                return Err(SlawError::corrupt(format!("{:#018x} is unsigned float", ilk)))
            }
        };
        let width = 1u8 << ((ilk >> NUMERIC_SIZE_SHIFT) & 3);
        let complex = ilk & NUMERIC_COMPLEX_FLAG != 0;
        let shape = Shape::from_code((ilk >> NUMERIC_VEC_SHIFT) & 7);
        let parsed = NumericIlk { kind, width, complex, shape };
        parsed
            .validate()
            .map_err(|e| SlawError::corrupt(format!("numeric header {:#018x}: {}", ilk, e)))?;
        let bsize = 1 + ((ilk >> NUMERIC_BSIZE_SHIFT) & NUMERIC_UNIT_BSIZE_MASK);
        if bsize != parsed.unit_size() as u64 {
            return Err(SlawError::corrupt(format!(
                "numeric unit size {} does not match type ({})",
                bsize,
                parsed.unit_size()
            )));
        }
        let array = ilk & NUMERIC_ARRAY_FLAG != 0;
        let breadth = if array { ilk & NUMERIC_BREADTH_MASK } else { 1 };
        Ok((parsed, array, breadth))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust primitive that can be stored as a numeric slaw element
pub trait NumericElement: Copy + PartialEq + std::fmt::Debug + sealed::Sealed + 'static {
    const KIND: NumKind;
    const WIDTH: u8;

    fn put_le(self, out: &mut Vec<u8>);
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! numeric_element {
    ($($t:ty => $kind:ident, $width:literal;)*) => {
        $(
            impl sealed::Sealed for $t {}

            impl NumericElement for $t {
                const KIND: NumKind = NumKind::$kind;
                const WIDTH: u8 = $width;

                fn put_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn get_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; $width];
                    buf.copy_from_slice(&bytes[..$width]);
                    <$t>::from_le_bytes(buf)
                }
            }

            impl From<$t> for Numeric {
                fn from(value: $t) -> Self {
                    Numeric::scalar(value)
                }
            }
        )*
    };
}

numeric_element! {
    i8 => Int, 1;
    i16 => Int, 2;
    i32 => Int, 4;
    i64 => Int, 8;
    u8 => Unt, 1;
    u16 => Unt, 2;
    u32 => Unt, 4;
    u64 => Unt, 8;
    f32 => Float, 4;
    f64 => Float, 8;
}

/// One primitive read out of a numeric, widened without loss
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Int(i64),
    Unt(u64),
    F32(f32),
    F64(f64),
}

/// A numeric slaw value: scalar or array of units
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Numeric {
    ilk: NumericIlk,
    array: bool,
    data: Vec<u8>,
}

impl Numeric {
    /// Build from raw little-endian unit bytes, checking lengths
    pub fn from_raw(ilk: NumericIlk, array: bool, data: Vec<u8>) -> Result<Self> {
        ilk.validate()?;
        let unit = ilk.unit_size();
        if array {
            if data.len() % unit != 0 {
                return Err(SlawError::InvalidArgument(format!(
                    "{} bytes is not a whole number of {}-byte units",
                    data.len(),
                    unit
                )));
            }
            if (data.len() / unit) as u64 > NUMERIC_BREADTH_MASK {
                return Err(SlawError::range("numeric array breadth"));
            }
        } else if data.len() != unit {
            return Err(SlawError::InvalidArgument(format!(
                "expected {} bytes for one unit, got {}",
                unit,
                data.len()
            )));
        }
        Ok(Self { ilk, array, data })
    }

    fn pack<T: NumericElement>(ilk: NumericIlk, array: bool, values: &[T]) -> Self {
        let mut data = Vec::with_capacity(values.len() * T::WIDTH as usize);
        for v in values {
            v.put_le(&mut data);
        }
        Self { ilk, array, data }
    }

    fn elem_ilk<T: NumericElement>() -> NumericIlk {
        NumericIlk::scalar(T::KIND, T::WIDTH)
    }

    pub fn scalar<T: NumericElement>(value: T) -> Self {
        Self::pack(Self::elem_ilk::<T>(), false, &[value])
    }

    pub fn complex<T: NumericElement>(re: T, im: T) -> Self {
        Self::pack(Self::elem_ilk::<T>().with_complex(true), false, &[re, im])
    }

    /// A 2, 3 or 4 component vector
    pub fn vector<T: NumericElement>(components: &[T]) -> Result<Self> {
        let n = components.len();
        if !(2..=4).contains(&n) {
            return Err(SlawError::WrongLength { expected: "2..=4".into(), actual: n });
        }
        Ok(Self::pack(Self::elem_ilk::<T>().with_shape(Shape::Vector(n as u8)), false, components))
    }

    /// A vector of complex components given as (re, im) pairs
    pub fn complex_vector<T: NumericElement>(components: &[(T, T)]) -> Result<Self> {
        let n = components.len();
        if !(2..=4).contains(&n) {
            return Err(SlawError::WrongLength { expected: "2..=4".into(), actual: n });
        }
        let flat: Vec<T> = components.iter().flat_map(|&(re, im)| [re, im]).collect();
        let ilk = Self::elem_ilk::<T>().with_shape(Shape::Vector(n as u8)).with_complex(true);
        Ok(Self::pack(ilk, false, &flat))
    }

    /// A multivector; 4, 8, 16 or 32 components select dimension 2..=5
    pub fn multivector<T: NumericElement>(components: &[T]) -> Result<Self> {
        let d = match components.len() {
            4 => 2,
            8 => 3,
            16 => 4,
            32 => 5,
            n => return Err(SlawError::WrongLength { expected: "4, 8, 16 or 32".into(), actual: n }),
        };
        Ok(Self::pack(Self::elem_ilk::<T>().with_shape(Shape::MultiVector(d)), false, components))
    }

    /// Array of scalars
    pub fn array<T: NumericElement>(values: &[T]) -> Self {
        Self::pack(Self::elem_ilk::<T>(), true, values)
    }

    /// Array of units of any shape, given as flattened primitives
    pub fn array_of<T: NumericElement>(shape: Shape, complex: bool, primitives: &[T]) -> Result<Self> {
        let ilk = Self::elem_ilk::<T>().with_shape(shape).with_complex(complex);
        ilk.validate()?;
        if primitives.len() % ilk.primitives() != 0 {
            return Err(SlawError::WrongLength {
                expected: format!("multiple of {}", ilk.primitives()),
                actual: primitives.len(),
            });
        }
        Ok(Self::pack(ilk, true, primitives))
    }

    pub fn ilk(&self) -> NumericIlk {
        self.ilk
    }

    pub fn kind(&self) -> NumKind {
        self.ilk.kind
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    pub fn is_complex(&self) -> bool {
        self.ilk.complex
    }

    /// Number of units; 1 for non-arrays
    pub fn breadth(&self) -> u64 {
        if self.array {
            (self.data.len() / self.ilk.unit_size()) as u64
        } else {
            1
        }
    }

    /// Little-endian payload bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Full header oct including breadth for arrays
    pub fn header(&self) -> u64 {
        let mut ilk = self.ilk.personality(self.array);
        if self.array {
            ilk |= self.breadth();
        }
        ilk
    }

    pub fn personality(&self) -> u64 {
        self.ilk.personality(self.array)
    }

    fn matches<T: NumericElement>(&self) -> bool {
        self.ilk.kind == T::KIND && self.ilk.width == T::WIDTH
    }

    /// The scalar value, when this is a non-array scalar of exactly `T`
    pub fn emit<T: NumericElement>(&self) -> Option<T> {
        if self.array || self.ilk.complex || self.ilk.shape != Shape::Scalar || !self.matches::<T>() {
            return None;
        }
        Some(T::get_le(&self.data))
    }

    /// Every primitive of a non-array value of element type `T`
    pub fn emit_components<T: NumericElement>(&self) -> Option<Vec<T>> {
        if self.array || !self.matches::<T>() {
            return None;
        }
        Some(self.decode_all())
    }

    /// Flattened primitives of an array with element type `T`
    pub fn emit_array<T: NumericElement>(&self) -> Option<Vec<T>> {
        if !self.array || !self.matches::<T>() {
            return None;
        }
        Some(self.decode_all())
    }

    fn decode_all<T: NumericElement>(&self) -> Vec<T> {
        self.data.chunks_exact(T::WIDTH as usize).map(T::get_le).collect()
    }

    /// Raw bytes of the `n`th unit
    pub fn unit(&self, n: u64) -> Option<&[u8]> {
        let unit = self.ilk.unit_size();
        let start = usize::try_from(n).ok()?.checked_mul(unit)?;
        self.data.get(start..start + unit)
    }

    /// Total primitive count (units times primitives per unit)
    pub fn primitive_count(&self) -> usize {
        self.data.len() / self.ilk.width as usize
    }

    /// The `i`th primitive across the whole payload
    pub fn primitive(&self, i: usize) -> Option<Primitive> {
        let w = self.ilk.width as usize;
        let b = self.data.get(i * w..i * w + w)?;
        Some(match (self.ilk.kind, w) {
            (NumKind::Int, 1) => Primitive::Int(i8::get_le(b) as i64),
            (NumKind::Int, 2) => Primitive::Int(i16::get_le(b) as i64),
            (NumKind::Int, 4) => Primitive::Int(i32::get_le(b) as i64),
            (NumKind::Int, _) => Primitive::Int(i64::get_le(b)),
            (NumKind::Unt, 1) => Primitive::Unt(u8::get_le(b) as u64),
            (NumKind::Unt, 2) => Primitive::Unt(u16::get_le(b) as u64),
            (NumKind::Unt, 4) => Primitive::Unt(u32::get_le(b) as u64),
            (NumKind::Unt, _) => Primitive::Unt(u64::get_le(b)),
            (NumKind::Float, 4) => Primitive::F32(f32::get_le(b)),
            (NumKind::Float, _) => Primitive::F64(f64::get_le(b)),
        })
    }

    /// Ordering used by semantic comparison: personality, array-ness,
    /// breadth, then primitives with sign-aware float bit comparison
    pub(crate) fn semantic_cmp(&self, other: &Numeric) -> Ordering {
        let by_header = self
            .personality()
            .cmp(&other.personality())
            .then(self.array.cmp(&other.array))
            .then(self.breadth().cmp(&other.breadth()));
        if by_header != Ordering::Equal {
            return by_header;
        }
        let count = self.primitive_count().min(other.primitive_count());
        for i in 0..count {
            let c = match (self.primitive(i), other.primitive(i)) {
                (Some(Primitive::Int(a)), Some(Primitive::Int(b))) => a.cmp(&b),
                (Some(Primitive::Unt(a)), Some(Primitive::Unt(b))) => a.cmp(&b),
                (Some(Primitive::F32(a)), Some(Primitive::F32(b))) => {
                    float_bits_cmp(a.to_bits() as u64, b.to_bits() as u64, 31)
                }
                (Some(Primitive::F64(a)), Some(Primitive::F64(b))) => {
                    float_bits_cmp(a.to_bits(), b.to_bits(), 63)
                }
                _ => Ordering::Equal,
            };
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }
}

/// Total order over IEEE bit patterns: negatives below positives, and
/// among negatives a larger pattern is a smaller number
fn float_bits_cmp(a: u64, b: u64, sign_bit: u32) -> Ordering {
    let neg_a = (a >> sign_bit) & 1 == 1;
    let neg_b = (b >> sign_bit) & 1 == 1;
    match (neg_a, neg_b) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => b.cmp(&a),
        (false, false) => a.cmp(&b),
    }
}
