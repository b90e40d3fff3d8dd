//! Field values of caps structures.
//!
//! A field is constrained by a [`CapsValue`]: one exact value, an inclusive
//! range, a preference-ordered list, or anything. [`FieldValue`] ties a
//! constraint to one of the supported value types.

use std::cmp::Ordering;
use std::fmt;

/// A constraint over values of type `T`.
///
/// # Example
///
/// ```rust
/// use sluice::caps::CapsValue;
///
/// let range = CapsValue::Range { min: 720, max: 1920 };
/// let list = CapsValue::List(vec![480, 1080, 2160]);
/// assert_eq!(range.intersect(&list), Some(CapsValue::Fixed(1080)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Exact value.
    Fixed(T),
    /// Inclusive range.
    Range {
        /// Smallest accepted value.
        min: T,
        /// Largest accepted value.
        max: T,
    },
    /// Accepted values, most preferred first.
    List(Vec<T>),
    /// No constraint.
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// True if `value` satisfies the constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Values accepted by both constraints, or `None` if they do not overlap.
    ///
    /// Lists keep the order of `self`. A result with one value collapses to
    /// `Fixed`.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, v) | (v, Self::Any) => Some(v.clone()),
            (Self::Fixed(v), c) | (c, Self::Fixed(v)) => {
                c.accepts(v).then(|| Self::Fixed(v.clone()))
            }
            (Self::Range { min: a0, max: a1 }, Self::Range { min: b0, max: b1 }) => {
                let lo = a0.max(b0);
                let hi = a1.min(b1);
                match lo.cmp(hi) {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Self::Fixed(lo.clone())),
                    Ordering::Less => Some(Self::Range {
                        min: lo.clone(),
                        max: hi.clone(),
                    }),
                }
            }
            (Self::List(list), c @ Self::Range { .. }) | (c @ Self::Range { .. }, Self::List(list)) => {
                Self::collapse(list.iter().filter(|v| c.accepts(v)).cloned().collect())
            }
            (Self::List(a), Self::List(b)) => {
                Self::collapse(a.iter().filter(|v| b.contains(v)).cloned().collect())
            }
        }
    }

    fn collapse(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }

    /// True if every value accepted by `self` is accepted by `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Any) => true,
            (Self::Any, _) => false,
            (Self::Fixed(v), c) => c.accepts(v),
            (Self::List(values), c) => values.iter().all(|v| c.accepts(v)),
            (Self::Range { min, max }, Self::Range { min: omin, max: omax }) => {
                min >= omin && max <= omax
            }
            (Self::Range { min, max }, c) => min == max && c.accepts(min),
        }
    }

    /// Preferred single value: the value itself, the range minimum or the
    /// first list entry. `Any` has no preferred value.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// True for `Fixed`.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// The value, if fixed.
    #[inline]
    pub fn as_fixed(&self) -> Option<&T> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }
}

impl CapsValue<i64> {
    /// Accepted value closest to `target`. Ties go to the smaller value.
    pub fn nearest(&self, target: i64) -> Option<i64> {
        match self {
            Self::Fixed(v) => Some(*v),
            Self::Range { min, max } => Some(target.clamp(*min, *max)),
            Self::List(values) => values
                .iter()
                .copied()
                .min_by_key(|v| (v.abs_diff(target), *v)),
            Self::Any => Some(target),
        }
    }
}

impl<T: Clone + Ord> From<T> for CapsValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

impl<T: Clone + Ord> From<std::ops::RangeInclusive<T>> for CapsValue<T> {
    fn from(range: std::ops::RangeInclusive<T>) -> Self {
        let (min, max) = range.into_inner();
        Self::Range { min, max }
    }
}

/// A rational number such as a frame rate, kept in lowest terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: i32,
    den: i32,
}

impl Fraction {
    /// Create `num/den`, reduced. A zero denominator is stored as `0/1`.
    pub fn new(num: i32, den: i32) -> Self {
        if den == 0 {
            return Self { num: 0, den: 1 };
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i32;
        let sign = if den < 0 { -1 } else { 1 };
        Self {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    /// Numerator.
    pub fn numer(&self) -> i32 {
        self.num
    }

    /// Denominator (always positive).
    pub fn denom(&self) -> i32 {
        self.den
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        (i64::from(self.num) * i64::from(other.den)).cmp(&(i64::from(other.num) * i64::from(self.den)))
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A typed field constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Integer field.
    Int(CapsValue<i64>),
    /// Fraction field.
    Fraction(CapsValue<Fraction>),
    /// String field.
    Str(CapsValue<String>),
    /// Boolean field.
    Bool(CapsValue<bool>),
}

impl FieldValue {
    /// Intersection of two constraints of the same type.
    ///
    /// Constraints of different types never overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.intersect(b).map(Self::Int),
            (Self::Fraction(a), Self::Fraction(b)) => a.intersect(b).map(Self::Fraction),
            (Self::Str(a), Self::Str(b)) => a.intersect(b).map(Self::Str),
            (Self::Bool(a), Self::Bool(b)) => a.intersect(b).map(Self::Bool),
            _ => None,
        }
    }

    /// True if `self` only accepts values `other` accepts.
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.is_subset(b),
            (Self::Fraction(a), Self::Fraction(b)) => a.is_subset(b),
            (Self::Str(a), Self::Str(b)) => a.is_subset(b),
            (Self::Bool(a), Self::Bool(b)) => a.is_subset(b),
            _ => false,
        }
    }

    /// The preferred fixed value, or `None` when unconstrained.
    pub fn fixate(&self) -> Option<Self> {
        Some(match self {
            Self::Int(v) => Self::Int(CapsValue::Fixed(v.fixate()?)),
            Self::Fraction(v) => Self::Fraction(CapsValue::Fixed(v.fixate()?)),
            Self::Str(v) => Self::Str(CapsValue::Fixed(v.fixate()?)),
            Self::Bool(v) => Self::Bool(CapsValue::Fixed(v.fixate()?)),
        })
    }

    /// True if the constraint names exactly one value.
    pub fn is_fixed(&self) -> bool {
        match self {
            Self::Int(v) => v.is_fixed(),
            Self::Fraction(v) => v.is_fixed(),
            Self::Str(v) => v.is_fixed(),
            Self::Bool(v) => v.is_fixed(),
        }
    }

    /// True if the constraint accepts anything.
    pub fn is_any(&self) -> bool {
        matches!(
            self,
            Self::Int(CapsValue::Any)
                | Self::Fraction(CapsValue::Any)
                | Self::Str(CapsValue::Any)
                | Self::Bool(CapsValue::Any)
        )
    }

    /// Type name used in the caps text form.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Fraction(_) => "fraction",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(CapsValue::Fixed(v))
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(CapsValue::Fixed(i64::from(v)))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(CapsValue::Fixed(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(CapsValue::Fixed(v.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(CapsValue::Fixed(v))
    }
}

impl From<Fraction> for FieldValue {
    fn from(v: Fraction) -> Self {
        Self::Fraction(CapsValue::Fixed(v))
    }
}

impl From<std::ops::RangeInclusive<i64>> for FieldValue {
    fn from(v: std::ops::RangeInclusive<i64>) -> Self {
        Self::Int(v.into())
    }
}

impl From<std::ops::RangeInclusive<Fraction>> for FieldValue {
    fn from(v: std::ops::RangeInclusive<Fraction>) -> Self {
        Self::Fraction(v.into())
    }
}

impl From<Vec<i64>> for FieldValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Int(CapsValue::List(v))
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        Self::Str(CapsValue::List(v.into_iter().map(str::to_string).collect()))
    }
}

impl From<CapsValue<i64>> for FieldValue {
    fn from(v: CapsValue<i64>) -> Self {
        Self::Int(v)
    }
}

impl From<CapsValue<Fraction>> for FieldValue {
    fn from(v: CapsValue<Fraction>) -> Self {
        Self::Fraction(v)
    }
}

impl From<CapsValue<String>> for FieldValue {
    fn from(v: CapsValue<String>) -> Self {
        Self::Str(v)
    }
}

impl From<CapsValue<bool>> for FieldValue {
    fn from(v: CapsValue<bool>) -> Self {
        Self::Bool(v)
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s == "ANY"
        || s == "true"
        || s == "false"
        || s.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        || !s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+'))
}

fn write_scalar<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &T, quote: bool) -> fmt::Result {
    if quote {
        let s = v.to_string();
        if needs_quotes(&s) {
            return write!(f, "\"{s}\"");
        }
    }
    write!(f, "{v}")
}

fn write_value<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    value: &CapsValue<T>,
    quote: bool,
) -> fmt::Result {
    match value {
        CapsValue::Fixed(v) => write_scalar(f, v, quote),
        CapsValue::Range { min, max } => {
            write!(f, "[")?;
            write_scalar(f, min, quote)?;
            write!(f, ", ")?;
            write_scalar(f, max, quote)?;
            write!(f, "]")
        }
        CapsValue::List(values) => {
            write!(f, "{{")?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_scalar(f, v, quote)?;
            }
            write!(f, "}}")
        }
        CapsValue::Any => write!(f, "ANY"),
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.type_name())?;
        match self {
            Self::Int(v) => write_value(f, v, false),
            Self::Fraction(v) => write_value(f, v, false),
            Self::Str(v) => write_value(f, v, true),
            Self::Bool(v) => write_value(f, v, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_against_range() {
        let fixed = CapsValue::Fixed(1280);
        let range = CapsValue::Range { min: 640, max: 1920 };
        assert_eq!(fixed.intersect(&range), Some(CapsValue::Fixed(1280)));
        assert_eq!(CapsValue::Fixed(100).intersect(&range), None);
    }

    #[test]
    fn test_range_overlap_collapses_to_fixed() {
        let a = CapsValue::Range { min: 1, max: 10 };
        let b = CapsValue::Range { min: 10, max: 20 };
        assert_eq!(a.intersect(&b), Some(CapsValue::Fixed(10)));
    }

    #[test]
    fn test_list_keeps_left_order() {
        let a = CapsValue::List(vec![3, 2, 1]);
        let b = CapsValue::List(vec![1, 2]);
        assert_eq!(a.intersect(&b), Some(CapsValue::List(vec![2, 1])));
    }

    #[test]
    fn test_fixate_policy() {
        assert_eq!(CapsValue::Range { min: 5, max: 9 }.fixate(), Some(5));
        assert_eq!(CapsValue::List(vec![7, 3]).fixate(), Some(7));
        assert_eq!(CapsValue::<i32>::Any.fixate(), None);
    }

    #[test]
    fn test_nearest_int() {
        assert_eq!(CapsValue::Range { min: 10, max: 20 }.nearest(50), Some(20));
        assert_eq!(CapsValue::List(vec![8000, 44100, 48000]).nearest(47000), Some(48000));
    }

    #[test]
    fn test_subset() {
        let narrow = CapsValue::Range { min: 2, max: 4 };
        let wide = CapsValue::Range { min: 0, max: 10 };
        assert!(narrow.is_subset(&wide));
        assert!(!wide.is_subset(&narrow));
        assert!(CapsValue::List(vec![1, 3]).is_subset(&wide));
        assert!(!CapsValue::<i64>::Any.is_subset(&wide));
    }

    #[test]
    fn test_fraction_reduced_and_ordered() {
        assert_eq!(Fraction::new(60, 2), Fraction::new(30, 1));
        assert!(Fraction::new(30000, 1001) < Fraction::new(30, 1));
        assert_eq!(Fraction::new(1, -2).to_string(), "-1/2");
    }

    #[test]
    fn test_mismatched_types_do_not_intersect() {
        let a = FieldValue::from(1);
        let b = FieldValue::from("1");
        assert_eq!(a.intersect(&b), None);
    }
}
