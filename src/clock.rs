//! Timestamps used by buffers, segments and messages.
//!
//! [`ClockTime`] is a nanosecond count with a reserved `NONE` sentinel so
//! that "unset" fits into eight bytes and the type stays `Copy`.

use std::time::Duration;

/// Time in nanoseconds (8 bytes, Copy).
///
/// # Special Values
///
/// - `ClockTime::ZERO`: zero time
/// - `ClockTime::NONE`: unset time (sentinel value)
/// - `ClockTime::MAX`: largest representable time
///
/// # Examples
///
/// ```rust
/// use sluice::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(250);
/// assert_eq!(t.millis(), 1250);
/// assert_eq!(t.to_string(), "1.250s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Largest representable time (one below the sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self::clamped(us.saturating_mul(1_000))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self::clamped(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self::clamped(s.saturating_mul(1_000_000_000))
    }

    const fn clamped(ns: u64) -> Self {
        if ns == u64::MAX { Self::MAX } else { Self(ns) }
    }

    /// Nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Whole milliseconds.
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whole seconds.
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// True for the `NONE` sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// True for any valid time.
    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }

    /// `None` for the sentinel, `Some(self)` otherwise.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Addition that propagates `NONE` and never produces it from valid input.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self::clamped(self.0.saturating_add(rhs.0))
    }

    /// Subtraction that propagates `NONE` and stops at zero.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        Self::clamped(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<ClockTime> for Duration {
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}.{:03}s", self.secs(), self.millis() % 1000)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_propagates() {
        assert!((ClockTime::NONE + ClockTime::from_secs(1)).is_none());
        assert!((ClockTime::from_secs(1) - ClockTime::NONE).is_none());
        assert_eq!(ClockTime::NONE.to_option(), None);
    }

    #[test]
    fn test_add_never_yields_sentinel() {
        let t = ClockTime::MAX + ClockTime::from_secs(5);
        assert!(t.is_some());
        assert_eq!(t, ClockTime::MAX);
    }

    #[test]
    fn test_sub_saturates_at_zero() {
        let t = ClockTime::from_millis(10) - ClockTime::from_millis(20);
        assert_eq!(t, ClockTime::ZERO);
    }

    #[test]
    fn test_duration_conversion() {
        let t: ClockTime = Duration::from_millis(1500).into();
        assert_eq!(t.millis(), 1500);
        assert_eq!(Duration::from(ClockTime::NONE), Duration::ZERO);
        assert_eq!(format!("{}", ClockTime::NONE), "NONE");
    }
}
