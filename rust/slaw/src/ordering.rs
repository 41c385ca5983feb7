//! Semantic ordering
//!
//! `semantic_compare` defines a total order over all slawx, including the
//! absent one, and ignores padding. `==` on [`Slaw`] and
//! [`crate::codec::equal`] are byte-exact instead, so two values can
//! compare `Equal` here without being `==` (strings that differ only after
//! an embedded NUL, for instance).

use std::cmp::Ordering;

use crate::protein::Protein;
use crate::slaw::Slaw;

/// Type rank: absent < nil < boolean < string < numeric < cons < list/map <
/// protein
fn rank(s: Option<&Slaw>) -> u8 {
    match s {
        None => 0,
        Some(Slaw::Nil) => 1,
        Some(Slaw::Boolean(_)) => 2,
        Some(Slaw::String(_)) => 3,
        Some(Slaw::Numeric(_)) => 4,
        Some(Slaw::Cons(..)) => 5,
        Some(Slaw::List(_)) | Some(Slaw::Map(_)) => 6,
        Some(Slaw::Protein(_)) => 7,
    }
}

/// Bytes up to the first NUL, as C string comparison sees them
fn c_str(s: &str) -> &[u8] {
    let b = s.as_bytes();
    match b.iter().position(|&c| c == 0) {
        Some(nul) => &b[..nul],
        None => b,
    }
}

pub fn semantic_compare(a: Option<&Slaw>, b: Option<&Slaw>) -> Ordering {
    let by_rank = rank(a).cmp(&rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    let (Some(a), Some(b)) = (a, b) else {
        return Ordering::Equal;
    };
    match (a, b) {
        (Slaw::Boolean(x), Slaw::Boolean(y)) => x.cmp(y),
        (Slaw::String(x), Slaw::String(y)) => c_str(x).cmp(c_str(y)),
        (Slaw::Numeric(x), Slaw::Numeric(y)) => x.semantic_cmp(y),
        (Slaw::Cons(car1, cdr1), Slaw::Cons(car2, cdr2)) => car1
            .semantic_cmp(car2)
            .then_with(|| cdr1.semantic_cmp(cdr2)),
        (Slaw::Protein(x), Slaw::Protein(y)) => protein_compare(x, y),
        _ => {
            // lists sort before maps, then element-wise, shorter first
            let by_kind = a.is_map().cmp(&b.is_map());
            if by_kind != Ordering::Equal {
                return by_kind;
            }
            let (xs, ys) = (a.elements().unwrap_or(&[]), b.elements().unwrap_or(&[]));
            for (x, y) in xs.iter().zip(ys) {
                let c = x.semantic_cmp(y);
                if c != Ordering::Equal {
                    return c;
                }
            }
            xs.len().cmp(&ys.len())
        }
    }
}

fn protein_compare(a: &Protein, b: &Protein) -> Ordering {
    semantic_compare(a.descrips(), b.descrips())
        .then_with(|| semantic_compare(a.ingests(), b.ingests()))
        .then_with(|| a.rude().len().cmp(&b.rude().len()))
        .then_with(|| a.rude().cmp(b.rude()))
}

impl Slaw {
    /// Total semantic order; see [`semantic_compare`]
    pub fn semantic_cmp(&self, other: &Slaw) -> Ordering {
        semantic_compare(Some(self), Some(other))
    }

    /// `semantic_cmp(..) == Equal`
    pub fn semantic_eq(&self, other: &Slaw) -> bool {
        self.semantic_cmp(other) == Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Numeric;

    #[test]
    fn test_type_ranks() {
        let ordered = vec![
            Slaw::Nil,
            Slaw::Boolean(true),
            Slaw::string("zzz"),
            Slaw::from(-1i32),
            Slaw::cons(1i32, 2i32),
            Slaw::list(vec![Slaw::Nil]),
            Slaw::map([("a", 1i32)]),
            Slaw::from(Protein::default()),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].semantic_cmp(&pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(semantic_compare(None, Some(&Slaw::Nil)), Ordering::Less);
        assert_eq!(semantic_compare(None, None), Ordering::Equal);
    }

    #[test]
    fn test_lists_shorter_first() {
        let a = Slaw::list(vec![1i32, 2]);
        let b = Slaw::list(vec![1i32, 2, 0]);
        assert_eq!(a.semantic_cmp(&b), Ordering::Less);
        assert_eq!(b.semantic_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_numeric_personality_before_value() {
        // int8 personality sorts before int32 regardless of value
        assert_eq!(Slaw::from(100i8).semantic_cmp(&Slaw::from(1i32)), Ordering::Less);
        let arr = Slaw::from(Numeric::array(&[0i32]));
        assert_eq!(Slaw::from(5i32).semantic_cmp(&arr), Ordering::Less);
    }

    #[test]
    fn test_semantic_equality_differs_from_exact() {
        let a = Slaw::string("ab\0x");
        let b = Slaw::string("ab\0y");
        assert!(a.semantic_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_protein_order() {
        let p1 = Protein::new(Some(Slaw::list(vec!["a"])), None);
        let p2 = Protein::new(Some(Slaw::list(vec!["b"])), None);
        let p3 = Protein::with_rude(Some(Slaw::list(vec!["a"])), None, vec![1u8]);
        assert_eq!(protein_compare(&p1, &p2), Ordering::Less);
        assert_eq!(protein_compare(&p1, &p3), Ordering::Less);
    }
}
