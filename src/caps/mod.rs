//! Capability sets describing data formats.
//!
//! [`Caps`] is either `ANY`, or an ordered list of [`Structure`]s with the
//! most preferred format first. The empty list means "no format" and is the
//! result of intersecting incompatible sets.
//!
//! # Example
//!
//! ```rust
//! use sluice::caps::Caps;
//!
//! let src: Caps = "audio/x-raw, rate=(int){48000, 44100}, channels=(int)[1, 2]".parse().unwrap();
//! let sink: Caps = "audio/x-raw, rate=(int)44100".parse().unwrap();
//!
//! let common = src.intersect(&sink);
//! assert!(!common.is_empty());
//!
//! let fixed = common.fixate();
//! assert!(fixed.is_fixed());
//! assert_eq!(fixed.structure(0).unwrap().get_int("channels"), Some(1));
//! ```

mod parser;
mod structure;
mod value;

pub use parser::parse_caps;
pub use structure::Structure;
pub use value::{CapsValue, FieldValue, Fraction};

use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CapsRepr {
    Any,
    List(SmallVec<[Structure; 1]>),
}

/// A set of acceptable formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    repr: CapsRepr,
}

impl Caps {
    /// Caps accepting every format.
    pub fn any() -> Self {
        Self {
            repr: CapsRepr::Any,
        }
    }

    /// Caps accepting no format.
    pub fn new_empty() -> Self {
        Self {
            repr: CapsRepr::List(SmallVec::new()),
        }
    }

    /// Caps with a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        let mut list = SmallVec::new();
        list.push(structure);
        Self {
            repr: CapsRepr::List(list),
        }
    }

    /// Caps from structures in preference order.
    pub fn from_structures(structures: impl IntoIterator<Item = Structure>) -> Self {
        Self {
            repr: CapsRepr::List(structures.into_iter().collect()),
        }
    }

    /// Start building single-structure caps.
    pub fn builder(name: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(name),
        }
    }

    /// True for `ANY`.
    pub fn is_any(&self) -> bool {
        matches!(self.repr, CapsRepr::Any)
    }

    /// True if no format is accepted.
    pub fn is_empty(&self) -> bool {
        matches!(&self.repr, CapsRepr::List(list) if list.is_empty())
    }

    /// True for exactly one structure with every field fixed.
    pub fn is_fixed(&self) -> bool {
        matches!(&self.repr, CapsRepr::List(list) if list.len() == 1 && list[0].is_fixed())
    }

    /// Number of structures (zero for `ANY`).
    pub fn size(&self) -> usize {
        match &self.repr {
            CapsRepr::Any => 0,
            CapsRepr::List(list) => list.len(),
        }
    }

    /// Structure at `index`.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        match &self.repr {
            CapsRepr::Any => None,
            CapsRepr::List(list) => list.get(index),
        }
    }

    /// Iterate over the structures in preference order.
    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        let list: &[Structure] = match &self.repr {
            CapsRepr::Any => &[],
            CapsRepr::List(list) => list.as_slice(),
        };
        list.iter()
    }

    /// Append a structure unless an equal one is present. No-op on `ANY`.
    pub fn append_structure(&mut self, structure: Structure) {
        if let CapsRepr::List(list) = &mut self.repr {
            if !list.contains(&structure) {
                list.push(structure);
            }
        }
    }

    /// Formats accepted by both sets, in the preference order of `self`.
    pub fn intersect(&self, other: &Caps) -> Caps {
        let (mine, theirs) = match (&self.repr, &other.repr) {
            (CapsRepr::Any, _) => return other.clone(),
            (_, CapsRepr::Any) => return self.clone(),
            (CapsRepr::List(a), CapsRepr::List(b)) => (a, b),
        };
        let mut out = Caps::new_empty();
        for a in mine {
            for b in theirs {
                if let Some(common) = a.intersect(b) {
                    out.append_structure(common);
                }
            }
        }
        out
    }

    /// True if the sets share at least one format.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        match (&self.repr, &other.repr) {
            (CapsRepr::Any, _) | (_, CapsRepr::Any) => !self.is_empty() && !other.is_empty(),
            (CapsRepr::List(a), CapsRepr::List(b)) => {
                a.iter().any(|x| b.iter().any(|y| x.intersect(y).is_some()))
            }
        }
    }

    /// True if every format in `self` is accepted by `other`.
    pub fn is_subset(&self, other: &Caps) -> bool {
        match (&self.repr, &other.repr) {
            (_, CapsRepr::Any) => true,
            (CapsRepr::Any, _) => false,
            (CapsRepr::List(a), CapsRepr::List(b)) => {
                a.iter().all(|x| b.iter().any(|y| x.is_subset(y)))
            }
        }
    }

    /// Reduce to one concrete format: the first structure, with each field
    /// at its preferred value. `ANY` and empty caps are returned unchanged.
    pub fn fixate(&self) -> Caps {
        match &self.repr {
            CapsRepr::Any => Caps::any(),
            CapsRepr::List(list) => match list.first() {
                Some(first) => Caps::from_structure(first.fixate()),
                None => Caps::new_empty(),
            },
        }
    }
}

impl Default for Caps {
    fn default() -> Self {
        Caps::any()
    }
}

impl FromStr for Caps {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_caps(s)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            CapsRepr::Any => write!(f, "ANY"),
            CapsRepr::List(list) if list.is_empty() => write!(f, "EMPTY"),
            CapsRepr::List(list) => {
                for (i, s) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{s}")?;
                }
                Ok(())
            }
        }
    }
}

/// Builder for single-structure caps.
#[derive(Debug)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish.
    pub fn build(self) -> Caps {
        Caps::from_structure(self.structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(format: &str) -> Structure {
        Structure::new("video/x-raw").field("format", format)
    }

    #[test]
    fn test_any_and_empty_identities() {
        let caps = Caps::from_structure(raw("I420"));
        assert_eq!(Caps::any().intersect(&caps), caps);
        assert_eq!(caps.intersect(&Caps::any()), caps);
        assert!(Caps::new_empty().intersect(&caps).is_empty());
        assert!(Caps::any().intersect(&Caps::any()).is_any());
    }

    #[test]
    fn test_intersection_follows_left_preference() {
        let src = Caps::from_structures([raw("NV12"), raw("I420")]);
        let sink = Caps::from_structures([raw("I420"), raw("NV12")]);
        let common = src.intersect(&sink);
        assert_eq!(common.size(), 2);
        assert_eq!(common.structure(0).unwrap().get_str("format"), Some("NV12"));
    }

    #[test]
    fn test_intersection_removes_duplicates() {
        let a = Caps::from_structures([raw("I420"), raw("I420")]);
        let b = Caps::from_structure(Structure::new("video/x-raw"));
        assert_eq!(a.intersect(&b).size(), 1);
    }

    #[test]
    fn test_fixate_picks_first_structure() {
        let caps = Caps::from_structures([
            Structure::new("audio/x-raw").field("rate", vec![48000i64, 44100]),
            Structure::new("audio/x-alaw"),
        ]);
        let fixed = caps.fixate();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.structure(0).unwrap().get_int("rate"), Some(48000));
    }

    #[test]
    fn test_can_intersect_matches_intersect() {
        let a = Caps::builder("x").field("n", 1..=5i64).build();
        let b = Caps::builder("x").field("n", 6..=9i64).build();
        assert!(!a.can_intersect(&b));
        assert!(a.intersect(&b).is_empty());
        assert!(a.can_intersect(&Caps::any()));
        assert!(!Caps::new_empty().can_intersect(&Caps::any()));
    }

    #[test]
    fn test_subset_of_any() {
        let a = Caps::from_structure(raw("I420"));
        assert!(a.is_subset(&Caps::any()));
        assert!(!Caps::any().is_subset(&a));
    }
}
