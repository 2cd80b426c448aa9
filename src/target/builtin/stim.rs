//! `RegularStim`: an artificial cell firing at a fixed interval.

use crate::context::ReceiveContext;
use crate::error::SchedResult;
use crate::target::Target;

/// Fires its source every `interval` from `start`, `number` times (or
/// forever).
///
/// The pending firing is always a movable self event. A connection
/// delivery with a positive weight pulls it forward to the delivery time,
/// restarting the train from there.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RegularStim {
    pub start: f64,
    pub interval: f64,
    pub number: Option<u32>,
    /// Firings so far in this run.
    pub fired: u32,
}

impl RegularStim {
    pub fn new(start: f64, interval: f64, number: Option<u32>) -> Self {
        RegularStim {
            start,
            interval,
            number,
            fired: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.number.is_some_and(|n| self.fired >= n)
    }
}

impl Target for RegularStim {
    fn name(&self) -> &str {
        "RegularStim"
    }

    fn arg_count(&self) -> usize {
        1
    }

    fn init(&mut self, cx: &mut ReceiveContext<'_>) -> SchedResult<()> {
        self.fired = 0;
        if !self.exhausted() {
            cx.net_send((self.start - cx.t()).max(0.0), 1.0)?;
        }
        Ok(())
    }

    fn receive(&mut self, cx: &mut ReceiveContext<'_>, weights: &[f64], flag: f64) -> SchedResult<()> {
        if flag == 1.0 {
            self.fired += 1;
            cx.net_event(cx.t())?;
            if !self.exhausted() {
                cx.net_send(self.interval, 1.0)?;
            }
            return Ok(());
        }
        if weights.first().is_some_and(|w| *w > 0.0) && !self.exhausted() {
            let t = cx.t();
            if cx.net_move(t).is_err() {
                cx.net_send(0.0, 1.0)?;
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
