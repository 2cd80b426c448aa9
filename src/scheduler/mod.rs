//! The top-level driver.
//!
//! A [`Scheduler`] owns one [`ThreadContext`] per worker thread and runs
//! them to an output time with one of three strategies:
//!
//! | Method | Rounds | Integrators |
//! |---|---|---|
//! | [`Method::Fixed`] | parallel, lockstep steps of `dt` | one per thread |
//! | [`Method::LocalVariable`] | parallel, earliest cell first | one per cell |
//! | [`Method::GlobalVariable`] | serial, global time order | one for all cells |
//!
//! Parallel rounds run every thread up to its next barrier occurrence (or
//! the output time) on a scoped worker. Between rounds the main thread
//! drains mailboxes and runs statements. A round that fails on any thread
//! fails the whole solve call.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`fixed`] | fixed-step round |
//! | [`local`] | local variable-step round |
//! | [`global`] | global variable-step loop |

pub mod fixed;
pub mod global;
pub mod local;


use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::config::{Method, SchedulerConfig};
use crate::context::{DeliveryRecord, Shared, SolverSet, SpikeExchange, StopHandle, ThreadContext, ThreadCore};
use crate::dsl::Network;
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind};
use crate::ids::{CellId, ConnectionId, RecorderId, SourceId, StatementId, TargetId};
use crate::integrator::{CellModel, EulerIntegrator, Integrator};
use crate::record::Recorder;
use crate::stats::SchedulerStats;
use crate::target::Target;

// ── Statements ────────────────────────────────────────────────────────

/// What a statement asks the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementAction {
    Continue,
    /// Stop the current solve call at the next safe boundary.
    Stop,
}

/// Callback run at a scheduled time on the coordinating thread.
pub type StatementFn = Box<dyn FnMut(f64) -> StatementAction + Send>;

struct StatementSlot {
    action: Option<StatementFn>,
    /// Threads that must deliver the occurrence before it runs.
    expected: usize,
    arrived: usize,
}

// ── Scheduler ─────────────────────────────────────────────────────────

/// Runs a [`Network`] over one or more worker threads.
///
/// # Example
/// ```rust
/// use neurosched::config::{Method, SchedulerConfig};
/// use neurosched::dsl::NetworkBuilder;
/// use neurosched::integrator::RampCell;
/// use neurosched::scheduler::Scheduler;
/// use neurosched::target::SpikeCounter;
///
/// let mut b = NetworkBuilder::new(1);
/// let c = b.cell(0, Box::new(RampCell::new(-1.0, 1.0)));
/// let s = b.threshold_source(c, 0, 0.0, 0.0);
/// let sink = b.target(0, None, Box::new(SpikeCounter::new()));
/// b.connect(s, sink, 1.0, vec![1.0]);
///
/// let config = SchedulerConfig::new(Method::LocalVariable).with_dt(0.1);
/// let mut sched = Scheduler::new(b.build().unwrap(), config).unwrap();
/// sched.init().unwrap();
/// sched.solve(5.0).unwrap();
/// let counter = sched.target::<SpikeCounter>(sink).unwrap();
/// assert_eq!(counter.count(), 1);
/// assert!((counter.times()[0] - 2.0).abs() < 1e-6);
/// ```
pub struct Scheduler {
    shared: Shared,
    contexts: Vec<ThreadContext>,
    /// The single integrator set under [`Method::GlobalVariable`].
    global: Option<SolverSet>,
    statements: Vec<StatementSlot>,
    /// Per thread: the statement it delivered and waits on.
    holds: Vec<Option<StatementId>>,
    t0: f64,
    t: f64,
    initialized: bool,
}

/// The integrator set a thread works on.
fn solvers_for<'a>(global: &'a mut Option<SolverSet>, own: &'a mut SolverSet) -> &'a mut SolverSet {
    global.as_mut().unwrap_or(own)
}

impl Scheduler {
    pub fn new(network: Network, config: SchedulerConfig) -> SchedResult<Self> {
        Self::build(network, config, None)
    }

    /// Like [`Scheduler::new`], with a spike exchange called at every
    /// barrier round.
    pub fn with_exchange(
        network: Network,
        config: SchedulerConfig,
        exchange: Box<dyn SpikeExchange>,
    ) -> SchedResult<Self> {
        Self::build(network, config, Some(exchange))
    }

    fn build(
        network: Network,
        config: SchedulerConfig,
        exchange: Option<Box<dyn SpikeExchange>>,
    ) -> SchedResult<Self> {
        config.validate()?;
        let Network {
            topology,
            targets,
            cells,
        } = network;
        if topology.threads != config.threads {
            return Err(SchedError::InvalidConfig(format!(
                "network built for {} threads, config asks for {}",
                topology.threads, config.threads
            )));
        }
        let threads = config.threads;
        let method = config.method;
        let dt = config.dt;
        let has_exchange = exchange.is_some();

        let mut cells_by_thread: Vec<Vec<(CellId, Box<dyn CellModel>)>> = (0..threads).map(|_| Vec::new()).collect();
        for (i, model) in cells.into_iter().enumerate() {
            let id = CellId::new(i as u32);
            let slot = topology
                .cell(id)
                .and_then(|c| cells_by_thread.get_mut(c.thread))
                .ok_or_else(|| SchedError::InvalidTopology(format!("{} has no thread", id)))?;
            slot.push((id, model));
        }
        let mut targets_by_thread: Vec<Vec<(TargetId, Box<dyn Target>)>> =
            (0..threads).map(|_| Vec::new()).collect();
        for (i, obj) in targets.into_iter().enumerate() {
            let id = TargetId::new(i as u32);
            let slot = topology
                .target_thread(id)
                .and_then(|th| targets_by_thread.get_mut(th))
                .ok_or_else(|| SchedError::InvalidTopology(format!("{} has no thread", id)))?;
            slot.push((id, obj));
        }

        let (shared, receivers) = Shared::new(topology, config, exchange);
        let interval = shared.rendezvous.interval();
        if has_exchange && interval.is_none() {
            return Err(SchedError::InvalidConfig(
                "a spike exchange needs an exchange interval or a cross-thread link".into(),
            ));
        }
        if method == Method::Fixed && interval.is_some_and(|i| i < 0.5 * dt) {
            return Err(SchedError::InvalidConfig(format!(
                "fixed step dt={} exceeds the smallest cross-thread delay",
                dt
            )));
        }

        let (global, solver_sets): (Option<SolverSet>, Vec<SolverSet>) = match method {
            Method::Fixed => {
                let sets = cells_by_thread
                    .into_iter()
                    .map(|cells| {
                        let integs: Vec<Box<dyn Integrator>> = if cells.is_empty() {
                            Vec::new()
                        } else {
                            vec![Box::new(EulerIntegrator::new(cells))]
                        };
                        SolverSet::new(integs, false, dt)
                    })
                    .collect();
                (None, sets)
            }
            Method::LocalVariable => {
                let sets = cells_by_thread
                    .into_iter()
                    .map(|cells| {
                        let integs: Vec<Box<dyn Integrator>> = cells
                            .into_iter()
                            .map(|c| Box::new(EulerIntegrator::new(vec![c])) as Box<dyn Integrator>)
                            .collect();
                        SolverSet::new(integs, true, dt)
                    })
                    .collect();
                (None, sets)
            }
            Method::GlobalVariable => {
                let all: Vec<_> = cells_by_thread.into_iter().flatten().collect();
                let integs: Vec<Box<dyn Integrator>> = if all.is_empty() {
                    Vec::new()
                } else {
                    vec![Box::new(EulerIntegrator::new(all))]
                };
                let global = SolverSet::new(integs, false, dt);
                (Some(global), (0..threads).map(|_| SolverSet::empty(dt)).collect())
            }
        };

        let contexts = receivers
            .into_iter()
            .zip(targets_by_thread)
            .zip(solver_sets)
            .enumerate()
            .map(|(id, ((rx, targets), solvers))| {
                let core = ThreadCore::new(id, &shared.topology, &shared.config, rx, targets);
                ThreadContext::new(core, solvers)
            })
            .collect();

        info!(%method, threads, dt, ?interval, "scheduler built");
        Ok(Scheduler {
            shared,
            contexts,
            global,
            statements: Vec::new(),
            holds: vec![None; threads],
            t0: 0.0,
            t: 0.0,
            initialized: false,
        })
    }

    // ── Run lifecycle ─────────────────────────────────────────

    /// Initialize a run at time zero.
    pub fn init(&mut self) -> SchedResult<()> {
        self.init_at(0.0)
    }

    /// Initialize a run at `t0`: reset every integrator and queue, run the
    /// targets' init routines, and look for conditions already true.
    pub fn init_at(&mut self, t0: f64) -> SchedResult<()> {
        self.shared.reset();
        self.shared.stop.clear();
        self.statements.clear();
        self.holds.iter_mut().for_each(|h| *h = None);

        let Scheduler {
            shared,
            contexts,
            global,
            ..
        } = self;
        let shared = &*shared;
        if let Some(g) = global.as_mut() {
            g.reset(t0)?;
        }
        for ctx in contexts.iter_mut() {
            ctx.solvers.reset(t0)?;
        }
        for ctx in contexts.iter_mut() {
            let solvers = solvers_for(global, &mut ctx.solvers);
            ctx.core.init(t0, solvers, shared)?;
        }
        for ctx in contexts.iter_mut() {
            let solvers = solvers_for(global, &mut ctx.solvers);
            match shared.config.method {
                Method::Fixed => ctx.core.check_thresholds(solvers, shared)?,
                _ => ctx.core.evaluate_conditions(solvers, None, true, shared)?,
            }
        }

        self.t0 = t0;
        self.t = t0;
        self.initialized = true;
        debug!(t0, method = %self.shared.config.method, "run initialized");
        Ok(())
    }

    fn require_init(&self) -> SchedResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(SchedError::NotInitialized)
        }
    }

    /// Advance to `tout`, delivering every occurrence due by then.
    ///
    /// Returns early, with the scheduler consistent at the reached time,
    /// when a stop is requested. A `tout` before the current time does
    /// nothing.
    pub fn solve(&mut self, tout: f64) -> SchedResult<()> {
        self.require_init()?;
        self.shared.stop.clear();
        if tout < self.t {
            return Ok(());
        }
        debug!(from = self.t, tout, "solve");
        loop {
            self.drain_mailboxes()?;
            if self.shared.stop.is_stopped() || self.all_done(tout) {
                break;
            }
            match self.shared.config.method {
                Method::GlobalVariable => self.global_round(tout)?,
                _ => self.parallel_round(tout)?,
            }
            self.run_statements();
        }

        let stopped = self.shared.stop.is_stopped();
        let reached = if stopped {
            self.contexts
                .iter()
                .map(|c| c.core.t())
                .fold(f64::INFINITY, f64::min)
                .min(tout)
        } else {
            tout
        };
        if let Some(g) = self.global.as_mut() {
            g.settle_at(reached)?;
        }
        for ctx in self.contexts.iter_mut() {
            ctx.solvers.settle_at(reached)?;
        }
        self.t = reached.max(self.t);
        if stopped {
            info!(t = self.t, "run stopped");
        }
        Ok(())
    }

    /// Advance by one step of `dt`.
    pub fn step(&mut self) -> SchedResult<()> {
        self.solve(self.t + self.shared.config.dt)
    }

    fn drain_mailboxes(&mut self) -> SchedResult<()> {
        if !self.shared.take_mailbox_pending() {
            return Ok(());
        }
        for ctx in self.contexts.iter_mut() {
            ctx.core.drain_mailbox()?;
        }
        Ok(())
    }

    fn all_done(&self, tout: f64) -> bool {
        let dt = self.shared.config.dt;
        match self.shared.config.method {
            Method::Fixed => self
                .contexts
                .iter()
                .zip(&self.holds)
                .all(|(c, h)| h.is_some() || c.core.t() >= tout - 0.5 * dt),
            Method::LocalVariable => self.contexts.iter().zip(&self.holds).all(|(c, h)| {
                let te = c.core.least_time();
                let ti = c.solvers.least_time();
                h.is_some() || !(ti < tout || te <= tout)
            }),
            Method::GlobalVariable => {
                let ti = self.global.as_ref().map_or(f64::INFINITY, |g| g.least_time());
                self.least_time() > tout && ti >= tout
            }
        }
    }

    /// Run every thread to its next stopping point, in parallel.
    fn parallel_round(&mut self, tout: f64) -> SchedResult<()> {
        let Scheduler {
            shared,
            contexts,
            holds,
            ..
        } = self;
        let shared = &*shared;
        if let [ctx] = contexts.as_mut_slice() {
            return thread_round(ctx, holds[0].is_some(), tout, shared);
        }
        let results: Vec<SchedResult<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = contexts
                .iter_mut()
                .zip(holds.iter())
                .map(|(ctx, hold)| {
                    let held = hold.is_some();
                    s.spawn(move || thread_round(ctx, held, tout, shared))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(i, h)| h.join().unwrap_or(Err(SchedError::ThreadPanicked(i))))
                .collect()
        });
        results.into_iter().collect()
    }

    /// Run statements every expected thread has delivered, in time order.
    fn run_statements(&mut self) {
        let mut due: Vec<(f64, StatementId)> = Vec::new();
        for ctx in self.contexts.iter_mut() {
            let thread = ctx.core.id();
            for (t, id) in ctx.core.pending_statements.drain(..) {
                let Some(slot) = self.statements.get_mut(id.index()) else { continue };
                slot.arrived += 1;
                if slot.arrived >= slot.expected {
                    due.push((t, id));
                } else {
                    self.holds[thread] = Some(id);
                }
            }
        }
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (t, id) in due {
            for hold in self.holds.iter_mut().filter(|h| **h == Some(id)) {
                *hold = None;
            }
            let Some(mut action) = self.statements.get_mut(id.index()).and_then(|s| s.action.take()) else {
                continue;
            };
            debug!(t, statement = %id, "running statement");
            if action(t) == StatementAction::Stop {
                self.shared.stop.stop();
            }
        }
    }

    // ── Requests from outside the run ─────────────────────────

    /// Queue `action` to run once at `t`. With `all_threads` every thread
    /// must reach `t` first; otherwise only thread 0 is synchronized.
    pub fn schedule_statement<F>(&mut self, t: f64, all_threads: bool, action: F) -> SchedResult<StatementId>
    where
        F: FnMut(f64) -> StatementAction + Send + 'static,
    {
        self.require_init()?;
        let n = if all_threads { self.contexts.len() } else { 1 };
        for ctx in &self.contexts[..n] {
            let now = ctx.core.t().max(self.t);
            if t < now - ctx.core.tolerance() {
                return Err(SchedError::time_travel("statement", t, now));
            }
        }
        let id = StatementId::new(self.statements.len() as u32);
        self.statements.push(StatementSlot {
            action: Some(Box::new(action)),
            expected: n,
            arrived: 0,
        });
        for ctx in self.contexts[..n].iter_mut() {
            ctx.core.stats.sent.bump(EventKind::Statement);
            ctx.core.queue.insert(t, Event::Statement(id));
        }
        debug!(t, statement = %id, threads = n, "statement scheduled");
        Ok(id)
    }

    /// Deliver through connection `cid` at `t` as if its source had fired.
    pub fn connection_event(&mut self, cid: ConnectionId, t: f64) -> SchedResult<()> {
        self.require_init()?;
        if t < self.t - self.contexts[0].core.tolerance() {
            return Err(SchedError::time_travel("connection event", t, self.t));
        }
        let topo = &self.shared.topology;
        let conn = topo
            .connection(cid)
            .ok_or_else(|| SchedError::InvalidTopology(format!("unknown connection {}", cid)))?;
        let thread = conn
            .target
            .filter(|_| conn.active)
            .and_then(|tid| topo.target_thread(tid));
        match thread {
            Some(th) => {
                let core = &mut self.contexts[th].core;
                core.send_event(th, t, Event::Connection(cid), &self.shared)
            }
            None => {
                self.contexts[0].core.stats.detached += 1;
                Ok(())
            }
        }
    }

    /// Handle through which anyone may request a stop.
    pub fn stop_handle(&self) -> StopHandle {
        self.shared.stop.clone()
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn threads(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Statistics of every thread merged.
    pub fn stats(&self) -> SchedulerStats {
        let mut total = SchedulerStats::new();
        for ctx in &self.contexts {
            total.merge(ctx.core.stats());
        }
        total
    }

    pub fn thread_stats(&self, thread: usize) -> Option<&SchedulerStats> {
        self.contexts.get(thread).map(|c| c.core.stats())
    }

    /// Recorded spikes of every thread, ordered by time then source.
    pub fn spikes(&self) -> Vec<(f64, SourceId)> {
        let mut all: Vec<_> = self.contexts.iter().flat_map(|c| c.core.spikes.iter().copied()).collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        all
    }

    /// Delivery trace of every thread, ordered by time then thread.
    pub fn trace(&self) -> Vec<DeliveryRecord> {
        let mut all: Vec<DeliveryRecord> = self
            .contexts
            .iter()
            .filter_map(|c| c.core.trace.as_ref())
            .flatten()
            .copied()
            .collect();
        all.sort_by(|a, b| a.t.total_cmp(&b.t).then(a.thread.cmp(&b.thread)));
        all
    }

    /// Occurrences queued on any thread.
    pub fn pending_events(&self) -> usize {
        self.contexts.iter().map(|c| c.core.queue().len()).sum()
    }

    /// Earliest queued time over every thread.
    pub fn least_time(&self) -> f64 {
        self.contexts
            .iter()
            .map(|c| c.core.least_time())
            .fold(f64::INFINITY, f64::min)
    }

    /// Downcast target `id` to its concrete type.
    pub fn target<T: Target + 'static>(&self, id: TargetId) -> Option<&T> {
        let thread = self.shared.topology.target_thread(id)?;
        let obj = self.contexts.get(thread)?.core.targets.get(id.index())?.as_ref()?;
        obj.as_any().downcast_ref::<T>()
    }

    pub fn target_mut<T: Target + 'static>(&mut self, id: TargetId) -> Option<&mut T> {
        let thread = self.shared.topology.target_thread(id)?;
        let obj = self.contexts.get_mut(thread)?.core.targets.get_mut(id.index())?.as_mut()?;
        obj.as_any_mut().downcast_mut::<T>()
    }

    /// Current state vector of `cell`.
    pub fn state(&self, cell: CellId) -> Option<&[f64]> {
        if let Some(g) = self.global.as_ref() {
            return g.state(cell);
        }
        let thread = self.shared.topology.cell(cell)?.thread;
        self.contexts.get(thread)?.solvers.state(cell)
    }

    pub fn recorder(&self, id: RecorderId) -> Option<&Recorder> {
        let thread = self.shared.topology.recorder(id)?.thread;
        self.contexts.get(thread)?.core.recorders.get(&id)
    }

    // ── Checkpoint ────────────────────────────────────────────

    /// Snapshot every pending occurrence. Statements are not saved.
    pub fn save_checkpoint(&mut self) -> SchedResult<Checkpoint> {
        self.require_init()?;
        self.drain_mailboxes()?;
        let mut cp = Checkpoint {
            time: self.t,
            ..Checkpoint::default()
        };
        for ctx in &self.contexts {
            ctx.core.save_into(&mut cp);
        }
        debug!(t = cp.time, items = cp.items.len(), watches = cp.watches.len(), "checkpoint saved");
        Ok(cp)
    }

    /// Replace every pending occurrence with the ones in `cp` and move the
    /// clock to `cp.time`. Cell states are left as they are.
    pub fn restore_checkpoint(&mut self, cp: &Checkpoint) -> SchedResult<()> {
        self.require_init()?;
        let Scheduler {
            shared,
            contexts,
            global,
            ..
        } = self;
        let shared = &*shared;
        if let Some(g) = global.as_mut() {
            g.reinit(cp.time)?;
        }
        for ctx in contexts.iter_mut() {
            ctx.solvers.reinit(cp.time)?;
        }
        for ctx in contexts.iter_mut() {
            let solvers = solvers_for(global, &mut ctx.solvers);
            ctx.core.clear_for_restore(cp.time, solvers, shared);
        }
        shared.reset();

        for (index, sw) in cp.watches.iter().enumerate() {
            let thread = shared
                .topology
                .watch(sw.watch)
                .and_then(|w| shared.topology.target_thread(w.target))
                .ok_or_else(|| SchedError::CheckpointMismatch {
                    index,
                    expected: format!("live watch {}", sw.watch),
                })?;
            let ctx = &mut contexts[thread];
            let solvers = solvers_for(global, &mut ctx.solvers);
            ctx.core.restore_watch(index, sw, solvers, shared)?;
        }
        for (index, item) in cp.items.iter().enumerate() {
            let Some(ctx) = contexts.get_mut(item.thread) else {
                return Err(SchedError::CheckpointMismatch {
                    index,
                    expected: format!("thread {} of {}", item.thread, shared.threads()),
                });
            };
            ctx.core.restore_item(index, item, shared)?;
        }

        self.t = cp.time;
        self.statements.clear();
        self.holds.iter_mut().for_each(|h| *h = None);
        debug!(t = cp.time, items = cp.items.len(), "checkpoint restored");
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("method", &self.shared.config.method)
            .field("threads", &self.contexts.len())
            .field("t", &self.t)
            .field("pending", &self.pending_events())
            .finish()
    }
}

/// One thread's share of a parallel round.
fn thread_round(ctx: &mut ThreadContext, held: bool, tout: f64, shared: &Shared) -> SchedResult<()> {
    if held {
        return Ok(());
    }
    let ThreadContext { core, solvers } = ctx;
    if let Some(gen) = core.awaiting {
        if gen == shared.rendezvous.generation() {
            return Ok(());
        }
        core.awaiting = None;
    }
    core.stop_stepping = false;
    match shared.config.method {
        Method::Fixed => fixed::round(core, solvers, tout, shared),
        Method::LocalVariable => local::round(core, solvers, tout, shared),
        Method::GlobalVariable => Ok(()),
    }
}
