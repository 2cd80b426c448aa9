//! `WatchProbe`: arms its watches and fires its source when one trips.

use crate::context::ReceiveContext;
use crate::error::SchedResult;
use crate::target::Target;

/// Arms every watch it owns with `flag` at init. Each time a watch trips
/// the probe records the time, fires its source (if it has one) and, when
/// `rearm` is set, arms the watch again.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct WatchProbe {
    pub flag: f64,
    pub rearm: bool,
    pub tripped: Vec<f64>,
}

impl WatchProbe {
    pub fn new(flag: f64, rearm: bool) -> Self {
        WatchProbe {
            flag,
            rearm,
            tripped: Vec::new(),
        }
    }
}

impl Target for WatchProbe {
    fn name(&self) -> &str {
        "WatchProbe"
    }

    fn arg_count(&self) -> usize {
        0
    }

    fn init(&mut self, cx: &mut ReceiveContext<'_>) -> SchedResult<()> {
        self.tripped.clear();
        for id in cx.own_watches() {
            cx.watch(id, self.flag)?;
        }
        Ok(())
    }

    fn receive(&mut self, cx: &mut ReceiveContext<'_>, _weights: &[f64], flag: f64) -> SchedResult<()> {
        if flag != self.flag {
            return Ok(());
        }
        self.tripped.push(cx.t());
        cx.net_event(cx.t())?;
        if self.rearm {
            for id in cx.own_watches() {
                cx.watch(id, self.flag)?;
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
