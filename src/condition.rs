//! Threshold detection.
//!
//! A [`ConditionState`] watches a scalar `value()` (for a source, the
//! monitored variable minus the threshold; for a watch, the watched
//! predicate) and reports `below → above` transitions. Two evaluation
//! modes exist:
//!
//! - [`ConditionState::check`] for the fixed-step method: a crossing is
//!   reported at the current step time plus a small epsilon.
//! - [`ConditionState::condition`] for the variable-step methods: a
//!   crossing inside the last step is located by linear interpolation
//!   between the previous and the current value and must be queued, since
//!   an event delivered before it may retreat the integrator and make the
//!   crossing moot. A crossing found right after an init is reported for
//!   immediate send.
//!
//! The state never touches a queue itself. Callers queue what it reports
//! and hand the queue handle back through [`ConditionState::qthresh`].

use crate::queue::QueueHandle;

/// Outcome of a variable-step evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crossing {
    None,
    /// Crossed exactly at a freshly initialized boundary; send at this time.
    Immediate(f64),
    /// Crossed inside the last step at this interpolated time; queue it.
    Interpolated(f64),
}

/// Hysteresis state of one threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionState {
    /// `true` while above threshold.
    pub flag: bool,
    /// Value below which the state falls back to `below`.
    valthresh: f64,
    valold: f64,
    told: f64,
    /// Queued interpolated crossing, if any.
    pub qthresh: Option<QueueHandle>,
}

impl ConditionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; used at (re)initialization.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fixed-step evaluation at time `t`. Returns the send time of a new
    /// crossing.
    pub fn check(&mut self, value: f64, t: f64, teps: f64) -> Option<f64> {
        if value > 0.0 {
            if !self.flag {
                self.flag = true;
                self.valthresh = 0.0;
                return Some(t + teps);
            }
        } else {
            self.flag = false;
        }
        None
    }

    /// Drop a still-queued crossing because the owning integrator moved to
    /// a time not after it. Returns the handle the caller must remove from
    /// its queue.
    pub fn abandon(&mut self) -> Option<QueueHandle> {
        let h = self.qthresh.take()?;
        self.valthresh = 0.0;
        self.flag = false;
        Some(h)
    }

    /// Variable-step evaluation at time `t`.
    ///
    /// `inited` tells whether the integrator was initialized at `t` with no
    /// step taken since. Any pending crossing must have been abandoned
    /// before calling this.
    pub fn condition(&mut self, value: f64, t: f64, inited: bool) -> Crossing {
        let mut out = Crossing::None;
        if !self.flag && value >= 0.0 {
            self.flag = true;
            self.valthresh = 0.0;
            if inited {
                out = Crossing::Immediate(t);
            } else {
                // Reset only once the value sinks below where it was before
                // the crossing; right after a retreat it can read slightly
                // below zero.
                self.valthresh = self.valold;
                let th = if self.valold < 0.0 && value > self.valold {
                    let frac = -self.valold / (value - self.valold);
                    (frac * t + (1.0 - frac) * self.told).clamp(self.told.min(t), t)
                } else {
                    t
                };
                out = Crossing::Interpolated(th);
            }
        } else if self.flag && self.valold < self.valthresh && value < self.valthresh {
            self.flag = false;
        }
        self.valold = value;
        self.told = t;
        out
    }

    /// Re-arm for a watch: already true at activation counts as above, so
    /// only a fresh rise fires. The value must sink below `-eps` to reset.
    pub fn activate(&mut self, value: f64, eps: f64) -> Option<QueueHandle> {
        let pending = self.qthresh.take();
        self.flag = value >= -eps;
        self.valthresh = -eps;
        pending
    }

    /// Record the value at an init without looking for a crossing.
    pub fn prime(&mut self, value: f64, t: f64) {
        self.valold = value;
        self.told = t;
    }
}
