//! `SpikeCounter`: records every delivery it receives.

use crate::context::ReceiveContext;
use crate::error::SchedResult;
use crate::target::Target;

/// A sink that remembers `(time, weights, flag)` of each delivery.
///
/// Useful as the far end of a connection in tests that check delivery
/// times and ordering.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SpikeCounter {
    pub received: Vec<(f64, Vec<f64>, f64)>,
}

impl SpikeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.received.len()
    }

    /// Delivery times only.
    pub fn times(&self) -> Vec<f64> {
        self.received.iter().map(|(t, _, _)| *t).collect()
    }
}

impl Target for SpikeCounter {
    fn name(&self) -> &str {
        "SpikeCounter"
    }

    fn arg_count(&self) -> usize {
        1
    }

    fn receive(&mut self, cx: &mut ReceiveContext<'_>, weights: &[f64], flag: f64) -> SchedResult<()> {
        self.received.push((cx.t(), weights.to_vec(), flag));
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
