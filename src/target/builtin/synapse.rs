//! `ExpSynapse`: kicks a state variable of its cell by the connection
//! weight.

use crate::context::ReceiveContext;
use crate::error::SchedResult;
use crate::target::Target;

/// Adds `weights[0]` to `state[var]` of the cell it sits on. The decay
/// itself belongs to the cell model.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ExpSynapse {
    pub var: usize,
    pub events: u64,
}

impl ExpSynapse {
    pub fn new(var: usize) -> Self {
        ExpSynapse { var, events: 0 }
    }
}

impl Target for ExpSynapse {
    fn name(&self) -> &str {
        "ExpSynapse"
    }

    fn arg_count(&self) -> usize {
        1
    }

    fn receive(&mut self, cx: &mut ReceiveContext<'_>, weights: &[f64], _flag: f64) -> SchedResult<()> {
        self.events += 1;
        let w = weights.first().copied().unwrap_or(0.0);
        if let Some(v) = cx.state_mut().and_then(|s| s.get_mut(self.var)) {
            *v += w;
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
