//! Global variable-step loop.
//!
//! One integrator covers every cell, so delivery must follow global time
//! order across threads. The loop runs on the calling thread: it drains
//! the mailboxes, reduces the earliest queued time over all threads, and
//! either delivers at that time everywhere or advances the integrator
//! toward it.

use crate::context::StepKind;
use crate::error::{SchedError, SchedResult};

use super::Scheduler;

impl Scheduler {
    /// Run until `tout`, a statement, or a stop request.
    pub(super) fn global_round(&mut self, tout: f64) -> SchedResult<()> {
        let Scheduler {
            shared,
            contexts,
            global,
            ..
        } = self;
        let shared = &*shared;
        let solvers = global
            .as_mut()
            .ok_or_else(|| SchedError::InvalidConfig("global method without a global integrator".into()))?;
        for ctx in contexts.iter_mut() {
            ctx.core.stop_stepping = false;
        }
        loop {
            if shared.take_mailbox_pending() {
                for ctx in contexts.iter_mut() {
                    ctx.core.drain_mailbox()?;
                }
            }
            if shared.stop.is_stopped() || contexts.iter().any(|c| c.core.stop_stepping) {
                return Ok(());
            }
            let te = contexts
                .iter()
                .map(|c| c.core.least_time())
                .fold(f64::INFINITY, f64::min);
            let ti = solvers.least_time();
            if te > tout && ti >= tout {
                return Ok(());
            }
            if te <= ti {
                for ctx in contexts.iter_mut() {
                    ctx.core.deliver_until(te, solvers, shared)?;
                }
                continue;
            }
            let kind = solvers.handle_step_all(te)?;
            let stats = &mut contexts[0].core.stats;
            match kind {
                StepKind::Inited => stats.inits += 1,
                StepKind::Stepped => stats.steps += 1,
                StepKind::Interpolated => {
                    stats.interpolations += 1;
                    continue;
                }
            }
            let inited = kind == StepKind::Inited;
            for ctx in contexts.iter_mut() {
                ctx.core.evaluate_conditions(solvers, None, inited, shared)?;
            }
        }
    }
}
