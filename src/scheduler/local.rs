//! Local variable-step round.
//!
//! Every cell has its own integrator. The thread repeatedly compares its
//! earliest queued time `te` with its earliest integrator time `ti`: an
//! occurrence not after every integrator is delivered, otherwise the
//! integrator furthest behind does one unit of work without passing `te`.

use crate::context::{Shared, SolverSet, StepKind, ThreadCore};
use crate::error::SchedResult;

pub(super) fn round(core: &mut ThreadCore, solvers: &mut SolverSet, tout: f64, shared: &Shared) -> SchedResult<()> {
    while !core.stop_stepping && !shared.stop.is_stopped() {
        let te = core.least_time();
        let ti = solvers.least_time();
        if !(ti < tout || te <= tout) {
            break;
        }
        if te <= ti {
            core.deliver_least(f64::INFINITY, solvers, shared)?;
            continue;
        }
        let Some((i, _)) = solvers.least() else { break };
        match solvers.handle_step(i, te)? {
            StepKind::Inited => {
                core.stats.inits += 1;
                core.evaluate_conditions(solvers, Some(i), true, shared)?;
            }
            StepKind::Stepped => {
                core.stats.steps += 1;
                core.evaluate_conditions(solvers, Some(i), false, shared)?;
            }
            StepKind::Interpolated => core.stats.interpolations += 1,
        }
    }
    Ok(())
}
