//! `Target` trait and the receive-routine API on [`ReceiveContext`].

use crate::context::threshold::watch_value;
use crate::context::ReceiveContext;
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind, SelfEvent};
use crate::ids::{CellId, TargetId, WatchId};

// ── Target ────────────────────────────────────────────────────────────

/// Anything that receives events: a synapse, an artificial cell, a probe.
///
/// A target lives on exactly one thread and is only ever called from it.
///
/// # Contract
///
/// Implementations **must**:
/// - Route every follow-up occurrence through `cx`.
/// - Accept exactly `arg_count()` weights from connections.
/// - Return errors rather than panic; an error aborts the run.
///
/// # Example
///
/// ```rust
/// use neurosched::context::ReceiveContext;
/// use neurosched::error::SchedResult;
/// use neurosched::target::Target;
///
/// struct Burst { left: u32 }
///
/// impl Target for Burst {
///     fn arg_count(&self) -> usize { 1 }
///     fn receive(&mut self, cx: &mut ReceiveContext<'_>, _w: &[f64], flag: f64) -> SchedResult<()> {
///         if flag == 0.0 && self.left > 0 {
///             self.left -= 1;
///             cx.net_send(0.5, 2.0)?;
///         } else if flag == 2.0 {
///             cx.net_event(cx.t())?;
///         }
///         Ok(())
///     }
///     fn as_any(&self) -> &dyn std::any::Any { self }
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
/// }
/// ```
pub trait Target: Send {
    /// Short type name for diagnostics.
    fn name(&self) -> &str {
        "target"
    }

    /// Number of weights a connection to this target carries.
    fn arg_count(&self) -> usize;

    /// Called once per run at the start time.
    fn init(&mut self, _cx: &mut ReceiveContext<'_>) -> SchedResult<()> {
        Ok(())
    }

    /// Called for every delivered occurrence. `weights` is the delivering
    /// connection's weight vector (empty for watches and for self events
    /// sent outside a connection delivery); `flag` is 0 for connection
    /// deliveries.
    fn receive(&mut self, cx: &mut ReceiveContext<'_>, weights: &[f64], flag: f64) -> SchedResult<()>;

    /// Downcast support, required by `Scheduler::target::<T>()`.
    fn as_any(&self) -> &dyn std::any::Any;
    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

// ── ReceiveContext API ────────────────────────────────────────────────

/// The API targets use from their receive and init routines.
impl ReceiveContext<'_> {
    /// Current time.
    #[inline]
    pub fn t(&self) -> f64 {
        self.t
    }

    /// The target being called.
    #[inline]
    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn thread(&self) -> usize {
        self.core.id
    }

    pub fn cell(&self) -> Option<CellId> {
        self.cell
    }

    /// Call this target back after `delay` with `flag`.
    ///
    /// Flag 1 marks the occurrence movable: until it is delivered,
    /// [`ReceiveContext::net_move`] and [`ReceiveContext::cancel_movable`]
    /// act on it. A later movable send takes over that role.
    pub fn net_send(&mut self, delay: f64, flag: f64) -> SchedResult<()> {
        if !(delay >= 0.0) {
            return Err(SchedError::NegativeDelay(delay));
        }
        let se = SelfEvent {
            target: self.target,
            flag,
            weights: self.weights,
        };
        let key = self.core.self_events.alloc(se);
        self.core.stats.sent.bump(EventKind::SelfEvent);
        let h = self.core.queue.insert(self.t + delay, Event::SelfEvent(key));
        if se.is_movable() {
            self.core.movable.insert(self.target, (h, key));
        }
        Ok(())
    }

    /// Reschedule the pending movable self event to absolute time `t`.
    pub fn net_move(&mut self, t: f64) -> SchedResult<()> {
        if t < self.t {
            return Err(SchedError::time_travel("net_move", t, self.t));
        }
        let no_event = SchedError::NoMovableEvent(self.target.raw());
        let Some(&(h, _)) = self.core.movable.get(&self.target) else {
            return Err(no_event);
        };
        if !self.core.queue.move_to(h, t) {
            self.core.movable.remove(&self.target);
            return Err(no_event);
        }
        self.core.stats.moved += 1;
        Ok(())
    }

    /// Drop the pending movable self event. Returns whether there was one.
    pub fn cancel_movable(&mut self) -> bool {
        let Some((h, key)) = self.core.movable.remove(&self.target) else {
            return false;
        };
        let removed = self.core.queue.remove(h).is_some();
        self.core.self_events.free(key);
        if removed {
            self.core.stats.cancelled += 1;
        }
        removed
    }

    /// Fire this target's source at `t`, fanning out to every connection.
    /// A target without a source makes this a no-op.
    pub fn net_event(&mut self, t: f64) -> SchedResult<()> {
        if t < self.t {
            return Err(SchedError::time_travel("net_event", t, self.t));
        }
        match self.shared.topology.artificial_source(self.target) {
            Some(sid) => self.core.source_send(sid, t, self.shared),
            None => Ok(()),
        }
    }

    /// Arm watch `id`; when it becomes true this target receives `flag`.
    ///
    /// Re-arming cancels an occurrence still queued for the same watch. A
    /// predicate already true at arming time fires only after it falls and
    /// rises again.
    pub fn watch(&mut self, id: WatchId, flag: f64) -> SchedResult<()> {
        let owner = self.shared.topology.watch(id).map(|w| w.target);
        if owner != Some(self.target) {
            return Err(SchedError::InvalidTopology(format!("{} does not own {}", self.target, id)));
        }
        let value = watch_value(id, self.solvers, self.shared).unwrap_or(f64::NEG_INFINITY);
        let weps = self.core.weps;
        let Some(ws) = self.core.watches.get_mut(&id) else {
            return Err(SchedError::ForeignTarget {
                target: self.target.raw(),
                thread: self.core.id,
            });
        };
        let pending = ws.cond.activate(value, weps);
        ws.cond.prime(value, self.t);
        ws.flag = flag;
        ws.active = true;
        if let Some(h) = pending {
            if self.core.queue.remove(h).is_some() {
                self.core.stats.cancelled += 1;
            }
        }
        Ok(())
    }

    /// Watches declared on this target, in id order.
    pub fn own_watches(&self) -> Vec<WatchId> {
        self.shared
            .topology
            .watches
            .iter()
            .enumerate()
            .filter(|(_, w)| w.target == self.target)
            .map(|(i, _)| WatchId::new(i as u32))
            .collect()
    }

    /// Disarm watch `id`, cancelling a queued occurrence.
    pub fn unwatch(&mut self, id: WatchId) {
        let Some(ws) = self.core.watches.get_mut(&id) else { return };
        ws.active = false;
        if let Some(h) = ws.cond.qthresh.take() {
            if self.core.queue.remove(h).is_some() {
                self.core.stats.cancelled += 1;
            }
        }
    }

    /// State of this target's cell, if it has one.
    pub fn state(&self) -> Option<&[f64]> {
        self.solvers.state(self.cell?)
    }

    /// Mutable state of this target's cell. Under the variable-step
    /// methods the integrator has already been told to re-initialize.
    pub fn state_mut(&mut self) -> Option<&mut [f64]> {
        self.solvers.state_mut(self.cell?)
    }

    /// Ask the scheduler to stop at the next safe boundary.
    pub fn request_stop(&self) {
        self.shared.stop.stop();
    }
}
