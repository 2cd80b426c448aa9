//! Fixed-step round.
//!
//! Each step delivers everything due up to the half step, advances every
//! integrator by `dt`, then checks thresholds at the new time. Occurrences
//! in the bin ring are delivered at the step time they were rounded to.
//! A delivered statement pauses the thread before it integrates, and the
//! step resumes after the statement has run.

use crate::context::{Shared, SolverSet, ThreadCore};
use crate::error::SchedResult;

/// Step `core` until `tout`, a barrier, a statement, or a stop request.
pub(super) fn round(core: &mut ThreadCore, solvers: &mut SolverSet, tout: f64, shared: &Shared) -> SchedResult<()> {
    let half = 0.5 * core.dt;
    while core.t < tout - half && !core.stop_stepping && !shared.stop.is_stopped() {
        if !core.step_pending {
            deliver_net_events(core, solvers, shared)?;
            if !core.pending_statements.is_empty() {
                core.step_pending = true;
                break;
            }
        }
        core.step_pending = false;
        solvers.fixed_step()?;
        core.stats.steps += 1;
        core.t += core.dt;
        core.check_thresholds(solvers, shared)?;
    }
    Ok(())
}

/// Deliver the current bin and every exact occurrence up to `t + dt/2`,
/// then shift the bin ring. The clock is left at `t`.
pub(crate) fn deliver_net_events(core: &mut ThreadCore, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
    let tsav = core.t;
    let tm = tsav + 0.5 * core.dt;
    loop {
        while let Some((_, event)) = core.queue.dequeue_bin() {
            core.deliver(tsav, event, solvers, shared)?;
        }
        core.deliver_until(tm, solvers, shared)?;
        // A delivery above may have binned something for this very step.
        if core.queue.bin_top().is_none() {
            break;
        }
    }
    core.queue.shift_bin(tm);
    core.t = tsav;
    Ok(())
}
