//! Delivery of queued occurrences, one routine per event kind.
//!
//! Every routine runs on the thread that owns the occurrence and runs to
//! completion. Anything it sends goes either into this thread's queue or,
//! for targets elsewhere, into the owning thread's mailbox.

use tracing::trace;

use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind};
use crate::ids::{ConnectionId, RecorderId, SourceId, StatementId, TargetId, WatchId};
use crate::pool::PoolKey;
use crate::record::Recorder;

use super::{DeliveryRecord, ReceiveContext, Shared, SolverSet, ThreadCore};

impl ThreadCore {
    /// Deliver everything queued at or before `limit`, in order. Returns
    /// the number of occurrences delivered.
    pub fn deliver_until(&mut self, limit: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<usize> {
        let mut n = 0;
        while let Some((tt, event)) = self.queue.atomic_dequeue(limit) {
            self.deliver(tt, event, solvers, shared)?;
            n += 1;
        }
        Ok(n)
    }

    /// Deliver the least occurrence if it is due by `limit`.
    pub fn deliver_least(&mut self, limit: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<bool> {
        match self.queue.atomic_dequeue(limit) {
            Some((tt, event)) => {
                self.deliver(tt, event, solvers, shared)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deliver one dequeued occurrence at `tt`.
    pub(crate) fn deliver(&mut self, tt: f64, event: Event, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        if tt < self.t - self.tolerance() {
            return Err(SchedError::time_travel("deliver", tt, self.t));
        }
        trace!(thread = self.id, "{}", event.pr("deliver", tt));
        if let Some(log) = self.trace.as_mut() {
            log.push(DeliveryRecord {
                t: tt,
                thread: self.id,
                kind: event.kind(),
                clock: self.t,
            });
        }
        self.stats.delivered.bump(event.kind());
        self.t = tt;
        match event {
            Event::Connection(cid) => self.deliver_connection(cid, tt, solvers, shared),
            Event::SelfEvent(key) => self.deliver_self(key, tt, solvers, shared),
            Event::Threshold(sid) => self.deliver_threshold(sid, tt, shared),
            Event::Fanout(sid) => self.deliver_fanout(sid, tt, solvers, shared),
            Event::Watch(wid) => self.deliver_watch(wid, tt, solvers, shared),
            Event::Barrier => self.deliver_barrier(tt, shared),
            Event::Statement(id) => {
                self.deliver_statement(id, tt);
                Ok(())
            }
            Event::PlayRecord(rid) => self.deliver_play(rid, tt, solvers, shared),
        }
    }

    fn deliver_connection(&mut self, cid: ConnectionId, tt: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        let conn = shared
            .topology
            .connection(cid)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown connection {}", cid)))?;
        match conn.target {
            Some(target) => self.call_target(target, tt, Some(cid), 0.0, solvers, shared),
            None => {
                self.stats.detached += 1;
                Ok(())
            }
        }
    }

    fn deliver_self(&mut self, key: PoolKey, tt: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        // A stale key means the occurrence was cancelled in the meantime.
        let Some(se) = self.self_events.free(key) else {
            return Ok(());
        };
        if self.movable.get(&se.target).is_some_and(|(_, k)| *k == key) {
            self.movable.remove(&se.target);
        }
        self.call_target(se.target, tt, se.weights, se.flag, solvers, shared)
    }

    fn deliver_threshold(&mut self, sid: SourceId, tt: f64, shared: &Shared) -> SchedResult<()> {
        if let Some(cond) = self.sources.get_mut(&sid) {
            cond.qthresh = None;
        }
        self.source_send(sid, tt, shared)
    }

    fn deliver_fanout(&mut self, sid: SourceId, tt: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        let src = shared
            .topology
            .source(sid)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown source {}", sid)))?;
        for cid in src.fanout_on(self.id) {
            let live = shared.topology.connection(*cid).is_some_and(|c| c.is_live());
            if live {
                self.deliver_connection(*cid, tt, solvers, shared)?;
            } else {
                self.stats.detached += 1;
            }
        }
        Ok(())
    }

    fn deliver_watch(&mut self, wid: WatchId, tt: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        let Some(ws) = self.watches.get_mut(&wid) else {
            return Ok(());
        };
        ws.cond.qthresh = None;
        if !ws.active {
            return Ok(());
        }
        let flag = ws.flag;
        let target = shared
            .topology
            .watch(wid)
            .map(|w| w.target)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown watch {}", wid)))?;
        self.call_target(target, tt, None, flag, solvers, shared)
    }

    fn deliver_barrier(&mut self, tt: f64, shared: &Shared) -> SchedResult<()> {
        self.stop_stepping = true;
        let (last, generation) = shared.rendezvous.arrive();
        if last {
            self.stats.barrier_rounds += 1;
            let incoming = shared.exchange(tt);
            self.route_incoming(incoming, shared)?;
            shared.rendezvous.complete();
        } else {
            self.awaiting = Some(generation);
        }
        if let Some(interval) = shared.rendezvous.interval() {
            self.stats.sent.bump(EventKind::Barrier);
            self.queue.insert(tt + interval, Event::Barrier);
        }
        Ok(())
    }

    fn deliver_statement(&mut self, id: StatementId, tt: f64) {
        self.pending_statements.push((tt, id));
        self.stop_stepping = true;
    }

    fn deliver_play(&mut self, rid: RecorderId, tt: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        let spec = shared
            .topology
            .recorder(rid)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown recorder {}", rid)))?;
        let Some(rec) = self.recorders.get_mut(&rid) else {
            return Err(SchedError::ForeignTarget {
                target: rid.raw(),
                thread: self.id,
            });
        };
        if self.method.is_variable() {
            solvers.bring_to(spec.cell, tt, Recorder::is_play(spec))?;
        }
        let state = solvers.state_mut(spec.cell).ok_or(SchedError::ForeignTarget {
            target: rid.raw(),
            thread: self.id,
        })?;
        if let Some(next) = rec.tick(spec, tt, state) {
            self.stats.sent.bump(EventKind::PlayRecord);
            self.queue.insert(next, Event::PlayRecord(rid));
        }
        Ok(())
    }

    /// Run `target`'s receive routine at `tt`.
    ///
    /// Under the variable-step methods the target's cell is first brought
    /// to `tt` and marked discontinuous, since the routine may change its
    /// state.
    pub(crate) fn call_target(
        &mut self,
        target: TargetId,
        tt: f64,
        weights: Option<ConnectionId>,
        flag: f64,
        solvers: &mut SolverSet,
        shared: &Shared,
    ) -> SchedResult<()> {
        let foreign = SchedError::ForeignTarget {
            target: target.raw(),
            thread: self.id,
        };
        let cell = shared.topology.target(target).ok_or(foreign.clone())?.cell;
        let Some(mut obj) = self.targets.get_mut(target.index()).and_then(Option::take) else {
            return Err(foreign);
        };
        let bring = match cell {
            Some(cell) if self.method.is_variable() => solvers.bring_to(cell, tt, true).map(|_| ()),
            _ => Ok(()),
        };
        let w: &[f64] = weights
            .and_then(|c| shared.topology.connection(c))
            .map_or(&[], |c| c.weights.as_slice());
        let result = match bring {
            Err(e) => Err(SchedError::from(e)),
            Ok(()) => {
                let mut cx = ReceiveContext {
                    target,
                    cell,
                    t: tt,
                    weights,
                    core: &mut *self,
                    solvers,
                    shared,
                };
                obj.receive(&mut cx, w, flag)
            }
        };
        self.targets[target.index()] = Some(obj);
        result
    }

    /// Run `target`'s init routine at the current time.
    pub(crate) fn init_target(&mut self, target: TargetId, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        let cell = shared.topology.target(target).and_then(|t| t.cell);
        let Some(mut obj) = self.targets.get_mut(target.index()).and_then(Option::take) else {
            return Err(SchedError::ForeignTarget {
                target: target.raw(),
                thread: self.id,
            });
        };
        let t = self.t;
        let result = {
            let mut cx = ReceiveContext {
                target,
                cell,
                t,
                weights: None,
                core: &mut *self,
                solvers,
                shared,
            };
            obj.init(&mut cx)
        };
        self.targets[target.index()] = Some(obj);
        result
    }
}
