//! Per-thread scheduling contexts.
//!
//! Every worker thread owns one [`ThreadContext`]: its event queue, its
//! self-event pool, its mailbox receiver, the targets, threshold sources,
//! watches and recorders that live on it, and (except under the global
//! method) the integrators of its cells. Only the owning thread touches
//! any of that. Everything threads share sits in [`Shared`]: the
//! read-only topology, the mailbox senders, the barrier rendezvous, the
//! spike exchange and the stop flag.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`deliver`] | send and deliver per event kind |
//! | [`threshold`] | condition evaluation against integrator state |
//! | [`solvers`] | [`SolverSet`] |
//! | [`exchange`] | [`SpikeExchange`], [`Loopback`] |
//! | [`trace`] | [`DeliveryRecord`] |

pub mod deliver;
pub mod exchange;
pub mod solvers;
pub mod threshold;
pub mod trace;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::condition::ConditionState;
use crate::config::{Method, SchedulerConfig};
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind, SelfEvent};
use crate::ids::{CellId, ConnectionId, RecorderId, SourceId, StatementId, TargetId, WatchId};
use crate::network::Topology;
use crate::pool::{Pool, PoolKey};
use crate::queue::{QueueHandle, TimeQueue};
use crate::record::Recorder;
use crate::stats::SchedulerStats;
use crate::target::Target;

pub use exchange::{Loopback, SpikeExchange};
pub use solvers::{SolverSet, StepKind};
pub use trace::DeliveryRecord;

/// A cross-thread insertion waiting in a mailbox.
pub type MailItem = (f64, Event);

/// Slack on causality checks under the variable-step methods.
const VAR_TOLERANCE: f64 = 1e-9;

// ── Stop handle ───────────────────────────────────────────────────────

/// Cloneable request to stop the current run at the next safe boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Barrier rendezvous ────────────────────────────────────────────────

/// Arrival counter for barrier occurrences.
///
/// Each thread queues one barrier per synchronization time. Arrivals are
/// counted without blocking; the last arriver of a round performs the
/// round's work and bumps the generation, which releases threads that
/// arrived earlier and are waiting to run past the barrier.
#[derive(Debug)]
pub struct Rendezvous {
    arrived: AtomicUsize,
    generation: AtomicU64,
    parties: usize,
    interval: Option<f64>,
}

impl Rendezvous {
    fn new(parties: usize, interval: Option<f64>) -> Self {
        Rendezvous {
            arrived: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            parties,
            interval,
        }
    }

    /// Spacing of barrier occurrences, if barriers are in use.
    pub fn interval(&self) -> Option<f64> {
        self.interval
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Count one arrival. Returns whether this was the last one and the
    /// generation the arrival belongs to.
    fn arrive(&self) -> (bool, u64) {
        let gen = self.generation.load(Ordering::Acquire);
        let n = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        if n == self.parties {
            self.arrived.store(0, Ordering::Release);
            (true, gen)
        } else {
            (false, gen)
        }
    }

    fn complete(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn reset(&self) {
        self.arrived.store(0, Ordering::Release);
    }
}

// ── Shared ────────────────────────────────────────────────────────────

/// State every thread may read concurrently.
pub struct Shared {
    pub(crate) topology: Topology,
    pub(crate) config: SchedulerConfig,
    mailboxes: Vec<Sender<MailItem>>,
    mailbox_pending: AtomicBool,
    pub(crate) rendezvous: Rendezvous,
    exchange: Option<Mutex<Box<dyn SpikeExchange>>>,
    outgoing: Mutex<Vec<(f64, u32)>>,
    pub(crate) stop: StopHandle,
}

impl Shared {
    /// Build the shared half and one mailbox receiver per thread.
    pub fn new(
        topology: Topology,
        config: SchedulerConfig,
        exchange: Option<Box<dyn SpikeExchange>>,
    ) -> (Self, Vec<Receiver<MailItem>>) {
        let threads = config.threads;
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..threads).map(|_| crossbeam_channel::unbounded()).unzip();

        // Threads may drift apart by at most the smallest delay that can
        // carry an occurrence from one of them to another.
        let mut interval = if threads > 1 && config.method != Method::GlobalVariable {
            topology.min_cross_thread_delay()
        } else {
            None
        };
        if exchange.is_some() {
            let ex = config.spike_exchange_interval.or_else(|| topology.min_cross_thread_delay());
            interval = match (interval, ex) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        // Fixed-step rounds must span whole steps, or a thread could run
        // past the earliest time a peer's send can land.
        if config.method == Method::Fixed {
            interval = interval.map(|i| (i / config.dt + 1e-9).floor() * config.dt);
        }
        debug!(threads, ?interval, "shared scheduling state");

        let shared = Shared {
            topology,
            config,
            mailboxes: senders,
            mailbox_pending: AtomicBool::new(false),
            rendezvous: Rendezvous::new(threads, interval),
            exchange: exchange.map(Mutex::new),
            outgoing: Mutex::new(Vec::new()),
            stop: StopHandle::new(),
        };
        (shared, receivers)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn threads(&self) -> usize {
        self.mailboxes.len()
    }

    /// Append to `thread`'s mailbox and flag that a drain is needed.
    pub fn post(&self, thread: usize, t: f64, event: Event) -> SchedResult<()> {
        let tx = self.mailboxes.get(thread).ok_or(SchedError::MailboxClosed(thread))?;
        tx.send((t, event)).map_err(|_| SchedError::MailboxClosed(thread))?;
        self.mailbox_pending.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether anything was posted since the last call; clears the flag.
    pub fn take_mailbox_pending(&self) -> bool {
        self.mailbox_pending.swap(false, Ordering::AcqRel)
    }

    fn push_outgoing(&self, t: f64, gid: u32) {
        if self.exchange.is_some() {
            self.outgoing.lock().push((t, gid));
        }
    }

    /// Run the exchange with everything recorded since the last round.
    fn exchange(&self, t: f64) -> Vec<(f64, u32)> {
        let Some(ex) = self.exchange.as_ref() else {
            return Vec::new();
        };
        let out = std::mem::take(&mut *self.outgoing.lock());
        let incoming = ex.lock().exchange(t, &out);
        debug!(t, sent = out.len(), received = incoming.len(), "spike exchange");
        incoming
    }

    /// Forget everything left over from a previous run.
    pub(crate) fn reset(&self) {
        self.outgoing.lock().clear();
        self.rendezvous.reset();
        self.mailbox_pending.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("threads", &self.threads())
            .field("rendezvous", &self.rendezvous)
            .field("exchange", &self.exchange.is_some())
            .finish()
    }
}

// ── Watches ───────────────────────────────────────────────────────────

/// Run state of one watch.
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    pub cond: ConditionState,
    /// Flag handed to the target when the watch fires.
    pub flag: f64,
    pub active: bool,
}

// ── Thread core ───────────────────────────────────────────────────────

/// Everything a thread owns except its integrators.
pub struct ThreadCore {
    pub(crate) id: usize,
    pub(crate) method: Method,
    /// Delivery clock: never moves back past the tolerance.
    pub(crate) t: f64,
    pub(crate) dt: f64,
    pub(crate) queue: TimeQueue<Event>,
    pub(crate) self_events: Pool<SelfEvent>,
    mailbox: Receiver<MailItem>,
    pub(crate) targets: Vec<Option<Box<dyn Target>>>,
    pub(crate) sources: BTreeMap<SourceId, ConditionState>,
    pub(crate) watches: BTreeMap<WatchId, WatchState>,
    pub(crate) recorders: BTreeMap<RecorderId, Recorder>,
    /// Latest movable self event per target.
    pub(crate) movable: HashMap<TargetId, (QueueHandle, PoolKey)>,
    pub(crate) stats: SchedulerStats,
    /// Leave the stepping loop at the next boundary.
    pub(crate) stop_stepping: bool,
    /// Barrier generation this thread arrived in and waits to be released from.
    pub(crate) awaiting: Option<u64>,
    /// Fixed method: the current step is delivered but not yet integrated.
    pub(crate) step_pending: bool,
    pub(crate) pending_statements: Vec<(f64, StatementId)>,
    pub(crate) spikes: Vec<(f64, SourceId)>,
    pub(crate) trace: Option<Vec<DeliveryRecord>>,
    pub(crate) teps: f64,
    pub(crate) weps: f64,
}

impl ThreadCore {
    pub fn new(
        id: usize,
        topology: &Topology,
        config: &SchedulerConfig,
        mailbox: Receiver<MailItem>,
        targets: Vec<(TargetId, Box<dyn Target>)>,
    ) -> Self {
        let queue = if config.bin_queue && config.method == Method::Fixed {
            TimeQueue::with_bins(config.bin_count)
        } else {
            TimeQueue::new()
        };
        let mut slots: Vec<Option<Box<dyn Target>>> = (0..topology.targets.len()).map(|_| None).collect();
        for (tid, obj) in targets {
            if let Some(slot) = slots.get_mut(tid.index()) {
                *slot = Some(obj);
            }
        }
        let sources = topology
            .threshold_sources_on(id)
            .map(|sid| (sid, ConditionState::new()))
            .collect();
        let watches = topology
            .watches
            .iter()
            .enumerate()
            .filter(|(_, w)| topology.target_thread(w.target) == Some(id))
            .map(|(i, _)| (WatchId::new(i as u32), WatchState::default()))
            .collect();
        let recorders = topology
            .recorders
            .iter()
            .enumerate()
            .filter(|(_, r)| r.thread == id)
            .map(|(i, _)| (RecorderId::new(i as u32), Recorder::new()))
            .collect();
        ThreadCore {
            id,
            method: config.method,
            t: 0.0,
            dt: config.dt,
            queue,
            self_events: Pool::new(config.pool_block),
            mailbox,
            targets: slots,
            sources,
            watches,
            recorders,
            movable: HashMap::new(),
            stats: SchedulerStats::new(),
            stop_stepping: false,
            awaiting: None,
            step_pending: false,
            pending_statements: Vec::new(),
            spikes: Vec::new(),
            trace: config.trace_deliveries.then(Vec::new),
            teps: config.threshold_epsilon,
            weps: config.watch_epsilon,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn queue(&self) -> &TimeQueue<Event> {
        &self.queue
    }

    /// Slack allowed when checking that an occurrence is not in the past.
    pub(crate) fn tolerance(&self) -> f64 {
        match self.method {
            Method::Fixed => 0.5 * self.dt,
            _ => VAR_TOLERANCE,
        }
    }

    /// Earliest pending time on this thread, mailbox excluded.
    pub fn least_time(&self) -> f64 {
        self.queue.least_time()
    }

    /// Move every mailbox item into the local queue.
    pub fn drain_mailbox(&mut self) -> SchedResult<usize> {
        let tol = self.tolerance();
        let mut n = 0;
        while let Ok((t, event)) = self.mailbox.try_recv() {
            if t < self.t - tol {
                return Err(SchedError::time_travel("mailbox item", t, self.t));
            }
            self.queue_event(t, event);
            n += 1;
        }
        Ok(n)
    }

    /// Insert locally, through the bin ring where that applies.
    pub(crate) fn queue_event(&mut self, t: f64, event: Event) -> QueueHandle {
        let binnable = matches!(event.kind(), EventKind::Connection | EventKind::Fanout);
        if binnable && self.queue.has_bins() {
            let (h, binned) = self.queue.enqueue_bin(t, event);
            if binned {
                self.stats.binned += 1;
            } else {
                self.stats.exact += 1;
            }
            h
        } else {
            self.stats.exact += 1;
            self.queue.insert(t, event)
        }
    }

    /// Queue `event` at `t` on `thread`, locally or through its mailbox.
    pub(crate) fn send_event(&mut self, thread: usize, t: f64, event: Event, shared: &Shared) -> SchedResult<()> {
        if t < self.t - self.tolerance() {
            return Err(SchedError::time_travel("send", t, self.t));
        }
        self.stats.sent.bump(event.kind());
        if thread == self.id {
            self.queue_event(t, event);
        } else {
            shared.post(thread, t, event)?;
            self.stats.cross_thread += 1;
        }
        Ok(())
    }

    /// Reset for a run starting at `t0` and queue the initial occurrences:
    /// recorder ticks, the first barrier, and whatever targets send from
    /// their init routines.
    pub(crate) fn init(&mut self, t0: f64, solvers: &mut SolverSet, shared: &Shared) -> SchedResult<()> {
        while self.mailbox.try_recv().is_ok() {}
        self.queue.clear();
        self.self_events.clear();
        self.movable.clear();
        self.stats.reset();
        self.spikes.clear();
        self.pending_statements.clear();
        self.stop_stepping = false;
        self.awaiting = None;
        self.step_pending = false;
        if let Some(trace) = self.trace.as_mut() {
            trace.clear();
        }
        self.t = t0;
        if self.queue.has_bins() {
            self.queue.init_bins(self.dt, t0 - 0.5 * self.dt);
        }
        for cond in self.sources.values_mut() {
            cond.reset();
        }
        for ws in self.watches.values_mut() {
            *ws = WatchState::default();
        }

        let topo = &shared.topology;
        let ids: Vec<RecorderId> = self.recorders.keys().copied().collect();
        for rid in ids {
            let Some(spec) = topo.recorder(rid) else { continue };
            let first = self.recorders.get_mut(&rid).and_then(|r| r.start(spec, t0));
            if let Some(t) = first {
                self.stats.sent.bump(EventKind::PlayRecord);
                self.queue.insert(t, Event::PlayRecord(rid));
            }
        }
        if let Some(interval) = shared.rendezvous.interval() {
            // A fixed-step round ends one step past its barrier, so the first
            // barrier comes a step early and every round spans `interval`.
            let first = match self.method {
                Method::Fixed => t0 + (interval - self.dt).max(0.0),
                _ => t0 + interval,
            };
            self.stats.sent.bump(EventKind::Barrier);
            self.queue.insert(first, Event::Barrier);
        }
        for i in 0..self.targets.len() {
            let tid = TargetId::new(i as u32);
            if self.targets[i].is_some() {
                self.init_target(tid, solvers, shared)?;
            }
        }
        debug!(thread = self.id, t0, queued = self.queue.len(), "thread context initialized");
        Ok(())
    }

    /// Record a spike of `sid` at `t` and fan it out.
    pub(crate) fn source_send(&mut self, sid: SourceId, t: f64, shared: &Shared) -> SchedResult<()> {
        let topo = &shared.topology;
        let src = topo
            .source(sid)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown source {}", sid)))?;
        self.stats.spikes += 1;
        if src.record {
            self.spikes.push((t, sid));
        }
        if let Some(gid) = src.output_gid {
            shared.push_outgoing(t, gid);
        }
        if src.min_delay_aggregation {
            for (thread, conns) in src.fanout_by_thread() {
                let Some(delay) = conns.first().and_then(|c| topo.connection(*c)).map(|c| c.delay) else {
                    continue;
                };
                self.send_event(*thread, t + src.delay + delay, Event::Fanout(sid), shared)?;
            }
            return Ok(());
        }
        for cid in &src.fanout {
            let Some(conn) = topo.connection(*cid) else { continue };
            let Some(thread) = conn
                .target
                .filter(|_| conn.active)
                .and_then(|tid| topo.target_thread(tid))
            else {
                self.stats.detached += 1;
                continue;
            };
            self.send_event(thread, t + src.delay + conn.delay, Event::Connection(*cid), shared)?;
        }
        Ok(())
    }

    /// Route spikes received from the exchange through their input sources.
    fn route_incoming(&mut self, incoming: Vec<(f64, u32)>, shared: &Shared) -> SchedResult<()> {
        for (t, gid) in incoming {
            match shared.topology.input_source(gid) {
                Some(sid) => self.source_send(sid, t, shared)?,
                None => self.stats.detached += 1,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ThreadCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCore")
            .field("id", &self.id)
            .field("t", &self.t)
            .field("queued", &self.queue.len())
            .field("stop_stepping", &self.stop_stepping)
            .finish()
    }
}

// ── Thread context ────────────────────────────────────────────────────

/// One worker thread's scheduling state.
#[derive(Debug)]
pub struct ThreadContext {
    pub core: ThreadCore,
    pub solvers: SolverSet,
}

impl ThreadContext {
    pub fn new(core: ThreadCore, solvers: SolverSet) -> Self {
        ThreadContext { core, solvers }
    }
}

// ── Receive context ───────────────────────────────────────────────────

/// Handed to a target's receive and init routines. The target-facing API
/// lives in [`crate::target`].
pub struct ReceiveContext<'a> {
    pub(crate) target: TargetId,
    pub(crate) cell: Option<CellId>,
    pub(crate) t: f64,
    pub(crate) weights: Option<ConnectionId>,
    pub(crate) core: &'a mut ThreadCore,
    pub(crate) solvers: &'a mut SolverSet,
    pub(crate) shared: &'a Shared,
}
