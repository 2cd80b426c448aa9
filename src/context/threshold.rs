//! Threshold and watch evaluation against integrator state.
//!
//! Fixed step checks every source and active watch once per step with
//! [`ConditionState::check`]. The variable-step methods evaluate after
//! every init or accepted step of an integrator, and only for the
//! conditions whose cells that integrator owns.

use tracing::trace;

use crate::condition::Crossing;
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind};
use crate::ids::{SourceId, WatchId};
use crate::network::SourceKind;

use super::{Shared, SolverSet, ThreadCore};

impl ThreadCore {
    /// Fixed-step threshold check at the current time.
    pub(crate) fn check_thresholds(&mut self, solvers: &SolverSet, shared: &Shared) -> SchedResult<()> {
        let t = self.t;
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();
        for sid in ids {
            let Some(value) = source_value(sid, solvers, shared) else { continue };
            let fired = match self.sources.get_mut(&sid) {
                Some(cond) => cond.check(value, t, self.teps),
                None => None,
            };
            if let Some(ts) = fired {
                trace!(thread = self.id, source = %sid, t = ts, "threshold crossed");
                self.source_send(sid, ts, shared)?;
            }
        }

        let ids: Vec<WatchId> = self.active_watches();
        for wid in ids {
            let Some(value) = watch_value(wid, solvers, shared) else { continue };
            let fired = match self.watches.get_mut(&wid) {
                Some(ws) => ws.cond.check(value, t, self.teps),
                None => None,
            };
            if let Some(ts) = fired {
                self.queue_watch(wid, ts);
            }
        }
        Ok(())
    }

    /// Variable-step evaluation after integrator `integ` (every integrator
    /// with `None`) was initialized or stepped.
    pub(crate) fn evaluate_conditions(
        &mut self,
        solvers: &SolverSet,
        integ: Option<usize>,
        inited: bool,
        shared: &Shared,
    ) -> SchedResult<()> {
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();
        for sid in ids {
            let Some(SourceKind::Cell { cell, .. }) = shared.topology.source(sid).map(|s| s.kind) else {
                continue;
            };
            let Some(i) = solvers.integrator_of(cell) else { continue };
            if integ.is_some_and(|only| only != i) {
                continue;
            }
            let t = solvers.time_of(i);
            let Some(value) = source_value(sid, solvers, shared) else { continue };
            self.abandon_source(sid, t);
            let crossing = match self.sources.get_mut(&sid) {
                Some(cond) => cond.condition(value, t, inited),
                None => Crossing::None,
            };
            match crossing {
                Crossing::None => {}
                Crossing::Immediate(ts) => {
                    self.stats.immediate_crossings += 1;
                    self.source_send(sid, ts, shared)?;
                }
                Crossing::Interpolated(th) => {
                    if th < self.t - self.tolerance() {
                        return Err(SchedError::time_travel("threshold crossing", th, self.t));
                    }
                    self.stats.sent.bump(EventKind::Threshold);
                    let h = self.queue.insert(th, Event::Threshold(sid));
                    if let Some(cond) = self.sources.get_mut(&sid) {
                        cond.qthresh = Some(h);
                    }
                }
            }
        }

        let ids: Vec<WatchId> = self.active_watches();
        for wid in ids {
            let Some(cell) = watch_cell(wid, shared) else { continue };
            let Some(i) = solvers.integrator_of(cell) else { continue };
            if integ.is_some_and(|only| only != i) {
                continue;
            }
            let t = solvers.time_of(i);
            let Some(value) = watch_value(wid, solvers, shared) else { continue };
            self.abandon_watch(wid, t);
            let crossing = match self.watches.get_mut(&wid) {
                Some(ws) => ws.cond.condition(value, t, inited),
                None => Crossing::None,
            };
            match crossing {
                Crossing::None => {}
                Crossing::Immediate(ts) | Crossing::Interpolated(ts) => self.queue_watch(wid, ts),
            }
        }
        Ok(())
    }

    /// Align every source's hysteresis with the current state, so a value
    /// already above threshold is not taken for a fresh crossing.
    pub(crate) fn prime_sources(&mut self, solvers: &SolverSet, shared: &Shared) {
        let t = self.t;
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();
        for sid in ids {
            let Some(value) = source_value(sid, solvers, shared) else { continue };
            if let Some(cond) = self.sources.get_mut(&sid) {
                cond.reset();
                cond.activate(value, 0.0);
                cond.prime(value, t);
            }
        }
    }

    /// Remove a queued crossing of `sid` that is not before `t`: the
    /// trajectory it was interpolated from has been revised.
    fn abandon_source(&mut self, sid: SourceId, t: f64) {
        let Some(cond) = self.sources.get_mut(&sid) else { return };
        let Some(h) = cond.qthresh else { return };
        match self.queue.get(h).map(|(tq, _)| tq) {
            Some(tq) if tq >= t => {
                if let Some(h) = cond.abandon() {
                    self.queue.remove(h);
                    self.stats.abandoned += 1;
                    trace!(thread = self.id, source = %sid, at = tq, "crossing abandoned");
                }
            }
            Some(_) => {}
            None => cond.qthresh = None,
        }
    }

    fn abandon_watch(&mut self, wid: WatchId, t: f64) {
        let Some(ws) = self.watches.get_mut(&wid) else { return };
        let Some(h) = ws.cond.qthresh else { return };
        match self.queue.get(h).map(|(tq, _)| tq) {
            Some(tq) if tq >= t => {
                if let Some(h) = ws.cond.abandon() {
                    self.queue.remove(h);
                    self.stats.abandoned += 1;
                }
            }
            Some(_) => {}
            None => ws.cond.qthresh = None,
        }
    }

    fn queue_watch(&mut self, wid: WatchId, t: f64) {
        self.stats.sent.bump(EventKind::Watch);
        let h = self.queue.insert(t, Event::Watch(wid));
        if let Some(ws) = self.watches.get_mut(&wid) {
            ws.cond.qthresh = Some(h);
        }
    }

    fn active_watches(&self) -> Vec<WatchId> {
        self.watches
            .iter()
            .filter(|(_, ws)| ws.active)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Monitored value minus threshold.
fn source_value(sid: SourceId, solvers: &SolverSet, shared: &Shared) -> Option<f64> {
    let src = shared.topology.source(sid)?;
    let SourceKind::Cell { cell, var } = src.kind else {
        return None;
    };
    let v = *solvers.state(cell)?.get(var)?;
    Some(v - src.threshold)
}

fn watch_cell(wid: WatchId, shared: &Shared) -> Option<crate::ids::CellId> {
    let spec = shared.topology.watch(wid)?;
    shared.topology.target(spec.target)?.cell
}

pub(crate) fn watch_value(wid: WatchId, solvers: &SolverSet, shared: &Shared) -> Option<f64> {
    let spec = shared.topology.watch(wid)?;
    let cell = watch_cell(wid, shared)?;
    Some(spec.value(solvers.state(cell)?))
}
