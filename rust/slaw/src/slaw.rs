//! The slaw value tree

use std::fmt;

use tracing::warn;

use crate::error::{Result, SlawError};
use crate::numeric::{Numeric, NumericElement};
use crate::protein::Protein;

/// Coarse type of a slaw, ordered the way semantic comparison ranks types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlawType {
    Nil,
    Boolean,
    String,
    Numeric,
    Cons,
    List,
    Map,
    Protein,
}

/// A self-typed value
///
/// Values are immutable once built; "modifying" operations such as
/// [`Slaw::map_put`] consume the value and return a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slaw {
    Nil,
    Boolean(bool),
    String(String),
    Numeric(Numeric),
    Cons(Box<Slaw>, Box<Slaw>),
    List(Vec<Slaw>),
    Map(SlawMap),
    Protein(Box<Protein>),
}

/// Association list whose entries are always cons pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SlawMap {
    entries: Vec<Slaw>,
}

impl SlawMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pairs, later duplicates replacing earlier ones in place
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Slaw>,
        V: Into<Slaw>,
    {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        map
    }

    /// Adopt cons entries verbatim, duplicates included
    pub(crate) fn from_entries_unchecked(entries: Vec<Slaw>) -> Self {
        Self { entries }
    }

    /// Wrap a list whose elements must all be cons pairs
    pub fn from_cons_list(entries: Vec<Slaw>) -> Result<Self> {
        if let Some(bad) = entries.iter().find(|e| !e.is_cons()) {
            return Err(SlawError::InvalidArgument(format!(
                "map entry is a {:?}, not a cons",
                bad.slaw_type()
            )));
        }
        Ok(Self { entries })
    }

    /// Replace the value under an existing key, or append
    pub fn insert(&mut self, key: Slaw, value: Slaw) {
        for entry in self.entries.iter_mut() {
            if let Slaw::Cons(car, cdr) = entry {
                if **car == key {
                    **cdr = value;
                    return;
                }
            }
        }
        self.entries.push(Slaw::cons(key, value));
    }

    /// Value of the last entry whose key equals `key`
    pub fn get(&self, key: &Slaw) -> Option<&Slaw> {
        self.pairs().filter(|(k, _)| *k == key).last().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries as cons slawx
    pub fn entries(&self) -> &[Slaw] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Slaw> {
        self.entries
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Slaw, &Slaw)> {
        self.entries.iter().filter_map(|e| e.cons_parts())
    }
}

macro_rules! slaw_from_numeric {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Slaw {
                fn from(value: $t) -> Self {
                    Slaw::Numeric(Numeric::scalar(value))
                }
            }
        )*
    };
}

slaw_from_numeric!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl From<bool> for Slaw {
    fn from(value: bool) -> Self {
        Slaw::Boolean(value)
    }
}

impl From<&str> for Slaw {
    fn from(value: &str) -> Self {
        Slaw::String(value.to_owned())
    }
}

impl From<String> for Slaw {
    fn from(value: String) -> Self {
        Slaw::String(value)
    }
}

impl From<Numeric> for Slaw {
    fn from(value: Numeric) -> Self {
        Slaw::Numeric(value)
    }
}

impl From<Protein> for Slaw {
    fn from(value: Protein) -> Self {
        Slaw::Protein(Box::new(value))
    }
}

impl From<SlawMap> for Slaw {
    fn from(value: SlawMap) -> Self {
        Slaw::Map(value)
    }
}

impl From<Vec<Slaw>> for Slaw {
    fn from(value: Vec<Slaw>) -> Self {
        Slaw::List(value)
    }
}

impl<A: Into<Slaw>, B: Into<Slaw>> From<(A, B)> for Slaw {
    fn from((car, cdr): (A, B)) -> Self {
        Slaw::cons(car, cdr)
    }
}

impl Slaw {
    pub fn nil() -> Self {
        Slaw::Nil
    }

    pub fn boolean(value: bool) -> Self {
        Slaw::Boolean(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Slaw::String(value.into())
    }

    pub fn cons(car: impl Into<Slaw>, cdr: impl Into<Slaw>) -> Self {
        Slaw::Cons(Box::new(car.into()), Box::new(cdr.into()))
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Slaw>,
    {
        Slaw::List(items.into_iter().map(Into::into).collect())
    }

    /// Map from key/value pairs; duplicate keys keep the first position
    /// and the last value
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Slaw>,
        V: Into<Slaw>,
    {
        Slaw::Map(SlawMap::from_pairs(pairs))
    }

    /// Map from an existing list of cons, deduplicating keys; non-cons
    /// elements are dropped
    pub fn map_from_list(list: &Slaw) -> Option<Slaw> {
        let elements = list.elements()?;
        let mut map = SlawMap::new();
        for e in elements {
            match e.cons_parts() {
                Some((k, v)) => map.insert(k.clone(), v.clone()),
                None => warn!("dropping {:?} while building a map", e.slaw_type()),
            }
        }
        Some(Slaw::Map(map))
    }

    pub fn numeric(value: impl NumericElement) -> Self {
        Slaw::Numeric(Numeric::scalar(value))
    }

    pub fn slaw_type(&self) -> SlawType {
        match self {
            Slaw::Nil => SlawType::Nil,
            Slaw::Boolean(_) => SlawType::Boolean,
            Slaw::String(_) => SlawType::String,
            Slaw::Numeric(_) => SlawType::Numeric,
            Slaw::Cons(..) => SlawType::Cons,
            Slaw::List(_) => SlawType::List,
            Slaw::Map(_) => SlawType::Map,
            Slaw::Protein(_) => SlawType::Protein,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Slaw::Nil)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Slaw::Boolean(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Slaw::String(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Slaw::Numeric(_))
    }

    pub fn is_cons(&self) -> bool {
        matches!(self, Slaw::Cons(..))
    }

    /// True for lists and maps, which share the list representation
    pub fn is_list(&self) -> bool {
        matches!(self, Slaw::List(_) | Slaw::Map(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Slaw::Map(_))
    }

    pub fn is_protein(&self) -> bool {
        matches!(self, Slaw::Protein(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Slaw::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Slaw::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&Numeric> {
        match self {
            Slaw::Numeric(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_protein(&self) -> Option<&Protein> {
        match self {
            Slaw::Protein(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SlawMap> {
        match self {
            Slaw::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Typed scalar emit, e.g. `s.emit::<i32>()`
    pub fn emit<T: NumericElement>(&self) -> Option<T> {
        self.as_numeric()?.emit()
    }

    pub fn cons_parts(&self) -> Option<(&Slaw, &Slaw)> {
        match self {
            Slaw::Cons(car, cdr) => Some((car, cdr)),
            _ => None,
        }
    }

    pub fn cons_car(&self) -> Option<&Slaw> {
        self.cons_parts().map(|(car, _)| car)
    }

    pub fn cons_cdr(&self) -> Option<&Slaw> {
        self.cons_parts().map(|(_, cdr)| cdr)
    }

    /// Children of a list or map
    pub fn elements(&self) -> Option<&[Slaw]> {
        match self {
            Slaw::List(items) => Some(items),
            Slaw::Map(map) => Some(map.entries()),
            _ => None,
        }
    }

    pub fn list_count(&self) -> Option<usize> {
        self.elements().map(<[Slaw]>::len)
    }

    pub fn list_nth(&self, n: usize) -> Option<&Slaw> {
        self.elements()?.get(n)
    }

    /// Position of the first element byte-equal to `needle`
    pub fn list_find(&self, needle: &Slaw) -> Option<usize> {
        self.elements()?.iter().position(|e| e == needle)
    }

    /// Start of the first contiguous run matching the elements of `needle`
    pub fn list_contigsearch(&self, needle: &Slaw) -> Option<usize> {
        contig_search(self.elements()?, needle.elements()?)
    }

    /// Position of the first element of an in-order, possibly gapped match
    pub fn list_gapsearch(&self, needle: &Slaw) -> Option<usize> {
        gap_search(self.elements()?, needle.elements()?)
    }

    /// Value stored under `key` in a map or list of cons; the last match
    /// wins
    pub fn map_find(&self, key: &Slaw) -> Option<&Slaw> {
        self.elements()?
            .iter()
            .filter_map(Slaw::cons_parts)
            .filter(|(k, _)| *k == key)
            .last()
            .map(|(_, v)| v)
    }

    /// Returns a map with `key` bound to `value`. A list of cons is
    /// promoted to a map; any other value is replaced by a one-entry map.
    pub fn map_put(self, key: impl Into<Slaw>, value: impl Into<Slaw>) -> Slaw {
        let mut map = match self {
            Slaw::Map(map) => map,
            Slaw::List(items) => {
                let mut map = SlawMap::new();
                for item in items {
                    if let Slaw::Cons(k, v) = item {
                        map.insert(*k, *v);
                    }
                }
                map
            }
            _ => SlawMap::new(),
        };
        map.insert(key.into(), value.into());
        Slaw::Map(map)
    }

    /// Encoded length in octs
    pub fn octlen(&self) -> u64 {
        crate::codec::octlen(self)
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        self.octlen() as usize * crate::ilk::OCT
    }
}

/// Start of the first contiguous occurrence of `needle` in `haystack`
pub fn contig_search(haystack: &[Slaw], needle: &[Slaw]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position where an in-order subsequence match of `needle` begins
pub fn gap_search(haystack: &[Slaw], needle: &[Slaw]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let mut wanted = needle.iter().peekable();
    let mut hit = None;
    for (i, e) in haystack.iter().enumerate() {
        match wanted.peek() {
            Some(n) if *n == e => {
                hit.get_or_insert(i);
                wanted.next();
            }
            Some(_) => {}
            None => break,
        }
    }
    match wanted.peek() {
        None => hit,
        Some(_) => None,
    }
}

impl fmt::Display for Slaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slaw::Nil => write!(f, "nil"),
            Slaw::Boolean(b) => write!(f, "{}", b),
            Slaw::String(s) => write!(f, "{:?}", s),
            Slaw::Numeric(n) => write!(f, "{:?}", n),
            Slaw::Cons(car, cdr) => write!(f, "({} . {})", car, cdr),
            Slaw::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Slaw::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.pairs().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Slaw::Protein(p) => write!(f, "{}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(items: &[&str]) -> Slaw {
        Slaw::list(items.iter().copied())
    }

    #[test]
    fn test_map_put_replaces_in_place() {
        let m = Slaw::map([("a", 1i32), ("b", 2i32)]);
        let m = m.map_put("a", 3i32).map_put("c", 4i32);
        let map = m.as_map().unwrap();
        let keys: Vec<_> = map.pairs().map(|(k, _)| k.as_str().unwrap().to_owned()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(m.map_find(&"a".into()).and_then(|v| v.emit::<i32>()), Some(3));
    }

    #[test]
    fn test_map_find_on_list_of_cons_takes_last() {
        let l = Slaw::list(vec![
            Slaw::cons("k", 1i64),
            Slaw::string("noise"),
            Slaw::cons("k", 2i64),
        ]);
        assert_eq!(l.map_find(&"k".into()).and_then(|v| v.emit::<i64>()), Some(2));
        assert!(l.map_find(&"missing".into()).is_none());
    }

    #[test]
    fn test_map_constructor_dedups() {
        let m = Slaw::map([("x", 1u8), ("x", 2u8)]);
        assert_eq!(m.list_count(), Some(1));
        assert_eq!(m.map_find(&"x".into()).and_then(|v| v.emit::<u8>()), Some(2));
    }

    #[test]
    fn test_contig_and_gap_search() {
        let hay = strs(&["a", "b", "c", "d"]);
        assert_eq!(hay.list_contigsearch(&strs(&["b", "c"])), Some(1));
        assert_eq!(hay.list_contigsearch(&strs(&["b", "d"])), None);
        assert_eq!(hay.list_gapsearch(&strs(&["b", "d"])), Some(1));
        assert_eq!(hay.list_gapsearch(&strs(&["d", "b"])), None);
        assert_eq!(hay.list_gapsearch(&strs(&[])), Some(0));
        assert_eq!(hay.list_find(&"c".into()), Some(2));
    }

    #[test]
    fn test_map_from_cons_list_rejects_non_cons() {
        assert!(SlawMap::from_cons_list(vec![Slaw::Nil]).is_err());
        let ok = SlawMap::from_cons_list(vec![Slaw::cons(1i32, 2i32)]).unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn test_type_predicates() {
        let m: Slaw = SlawMap::new().into();
        assert!(m.is_list() && m.is_map());
        assert!(Slaw::list(Vec::<Slaw>::new()).is_list());
        assert!(!Slaw::Nil.is_list());
        assert_eq!(Slaw::from(("a", true)).cons_cdr(), Some(&Slaw::Boolean(true)));
    }
}
