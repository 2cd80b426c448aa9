//! DeliveryRecord: one line of the per-thread delivery trace.

use crate::event::EventKind;

/// A record of a single delivered occurrence.
///
/// Appended by the owning thread on every delivery when tracing is on.
/// `clock` is the thread's time just before the delivery, which makes the
/// trace enough to check that no thread ever delivered into its past.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DeliveryRecord {
    /// Delivery time.
    pub t: f64,
    pub thread: usize,
    pub kind: EventKind,
    pub clock: f64,
}

impl std::fmt::Display for DeliveryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[t={} th={} clock={}] {}", self.t, self.thread, self.clock, self.kind)
    }
}
