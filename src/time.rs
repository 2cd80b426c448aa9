//! Simulated time for the event queues.
//!
//! Event times are plain `f64` milliseconds at the API surface. Inside the
//! queues they are wrapped in [`SimTime`], which gives them a total order so
//! they can key a `BTreeMap`.

use ordered_float::OrderedFloat;

/// A point in simulated time with a total order.
///
/// NaN sorts after every finite value, so a corrupted time can never jump
/// ahead of legitimate events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(OrderedFloat<f64>);

impl SimTime {
    /// The zero-point of simulation time.
    pub const ZERO: SimTime = SimTime(OrderedFloat(0.0));

    /// Sentinel for "nothing pending".
    pub const NEVER: SimTime = SimTime(OrderedFloat(f64::INFINITY));

    #[inline]
    pub fn new(t: f64) -> Self {
        SimTime(OrderedFloat(t))
    }

    /// Return the raw value in milliseconds.
    #[inline]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }

    /// The time `delay` after `self`.
    #[inline]
    pub fn plus(self, delay: f64) -> SimTime {
        SimTime::new(self.value() + delay)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: SimTime) -> bool {
        self < other
    }

    /// Returns `true` for a finite time.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.value().is_finite()
    }
}

impl From<f64> for SimTime {
    fn from(t: f64) -> Self {
        SimTime::new(t)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(SimTime::ZERO.value(), 0.0);
    }

    #[test]
    fn test_ordering() {
        let t1 = SimTime::new(10.0);
        let t2 = SimTime::new(20.5);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
        assert!(t2 < SimTime::NEVER);
    }

    #[test]
    fn test_nan_sorts_last() {
        let nan = SimTime::new(f64::NAN);
        assert!(SimTime::new(1e300) < nan);
        assert!(!nan.is_finite());
    }

    #[test]
    fn test_plus() {
        assert_eq!(SimTime::new(10.0).plus(2.5), SimTime::new(12.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SimTime::new(1.5)), "t=1.5");
    }
}
