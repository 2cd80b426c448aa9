//! Static connectivity: who sends to whom, with what delay, on which thread.
//!
//! A [`Topology`] is built once (see [`crate::dsl::NetworkBuilder`]) and
//! then shared read-only by every worker thread for the lifetime of a
//! [`Scheduler`](crate::scheduler::Scheduler). Changing connectivity means
//! building a new scheduler.

use std::collections::HashMap;

use crate::error::{SchedError, SchedResult};
use crate::ids::{CellId, ConnectionId, RecorderId, SourceId, TargetId, WatchId};

// ── Connections ───────────────────────────────────────────────────────

/// A weighted, delayed link from a source to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// `None` for a connection driven only through explicit events.
    pub source: Option<SourceId>,
    /// `None` for a detached connection; sends to it are no-ops.
    pub target: Option<TargetId>,
    pub delay: f64,
    /// Length equals the target's argument count.
    pub weights: Vec<f64>,
    pub active: bool,
}

impl Connection {
    /// Whether a send through this connection reaches anything.
    pub fn is_live(&self) -> bool {
        self.active && self.target.is_some()
    }
}

// ── Sources ───────────────────────────────────────────────────────────

/// What drives a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceKind {
    /// Threshold on state variable `var` of `cell`.
    Cell { cell: CellId, var: usize },
    /// Fired explicitly by `target` from its receive routine.
    Artificial { target: TargetId },
    /// Stand-in for a source on another process, fed by spike exchange.
    Input { gid: u32 },
}

/// A spike generator with its fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub kind: SourceKind,
    pub threshold: f64,
    /// Output delay, added to every connection's own delay.
    pub delay: f64,
    /// Thread that evaluates the threshold and records spikes.
    pub thread: usize,
    /// Global id under which spikes are handed to the exchange.
    pub output_gid: Option<u32>,
    pub record: bool,
    /// Queue one aggregated occurrence per receiving thread instead of one
    /// per connection. Requires every fan-out connection to share a delay.
    pub min_delay_aggregation: bool,
    pub fanout: Vec<ConnectionId>,
    fanout_by_thread: Vec<(usize, Vec<ConnectionId>)>,
}

impl Source {
    pub fn new(kind: SourceKind, threshold: f64, delay: f64, thread: usize) -> Self {
        Source {
            kind,
            threshold,
            delay,
            thread,
            output_gid: None,
            record: false,
            min_delay_aggregation: false,
            fanout: Vec::new(),
            fanout_by_thread: Vec::new(),
        }
    }

    /// Fan-out grouped by the thread that owns each connection's target.
    pub fn fanout_by_thread(&self) -> &[(usize, Vec<ConnectionId>)] {
        &self.fanout_by_thread
    }

    /// Fan-out connections whose target lives on `thread`.
    pub fn fanout_on(&self, thread: usize) -> &[ConnectionId] {
        self.fanout_by_thread
            .iter()
            .find(|(th, _)| *th == thread)
            .map_or(&[], |(_, conns)| conns.as_slice())
    }
}

// ── Targets and cells ─────────────────────────────────────────────────

/// Static facts about a target; the receiving object itself lives on its
/// thread.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    pub name: String,
    pub thread: usize,
    /// Cell whose integrator must be brought to the delivery time first.
    pub cell: Option<CellId>,
    pub arg_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellInfo {
    pub thread: usize,
    pub size: usize,
}

// ── Watches and recorders ─────────────────────────────────────────────

/// Which side of the threshold makes a watch true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDirection {
    Above,
    Below,
}

/// A watched predicate `state[var] <> threshold` on the target's own cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchSpec {
    pub target: TargetId,
    pub var: usize,
    pub threshold: f64,
    pub direction: WatchDirection,
}

impl WatchSpec {
    /// Signed predicate value; `>= 0` means true.
    pub fn value(&self, state: &[f64]) -> f64 {
        let v = state.get(self.var).copied().unwrap_or(f64::NAN);
        match self.direction {
            WatchDirection::Above => v - self.threshold,
            WatchDirection::Below => self.threshold - v,
        }
    }
}

/// When a sampler takes its samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSchedule {
    /// Every `interval` from init until `until` (inclusive) or forever.
    Interval { interval: f64, until: Option<f64> },
    /// At each listed time.
    Times(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderKind {
    /// Step `state[var]` to `values[i]` at `times[i]`.
    Play { var: usize, times: Vec<f64>, values: Vec<f64> },
    /// Record `state[var]`.
    Sample { var: usize, schedule: SampleSchedule },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSpec {
    pub cell: CellId,
    pub thread: usize,
    pub kind: RecorderKind,
}

// ── Topology ──────────────────────────────────────────────────────────

/// The whole static network.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub threads: usize,
    pub cells: Vec<CellInfo>,
    pub sources: Vec<Source>,
    pub connections: Vec<Connection>,
    pub targets: Vec<TargetInfo>,
    pub watches: Vec<WatchSpec>,
    pub recorders: Vec<RecorderSpec>,
    artificial: HashMap<TargetId, SourceId>,
    inputs: HashMap<u32, SourceId>,
}

impl Topology {
    pub fn new(threads: usize) -> Self {
        Topology {
            threads: threads.max(1),
            ..Default::default()
        }
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id.index())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.index())
    }

    pub fn target(&self, id: TargetId) -> Option<&TargetInfo> {
        self.targets.get(id.index())
    }

    pub fn watch(&self, id: WatchId) -> Option<&WatchSpec> {
        self.watches.get(id.index())
    }

    pub fn recorder(&self, id: RecorderId) -> Option<&RecorderSpec> {
        self.recorders.get(id.index())
    }

    pub fn cell(&self, id: CellId) -> Option<&CellInfo> {
        self.cells.get(id.index())
    }

    /// Thread owning `target`.
    pub fn target_thread(&self, id: TargetId) -> Option<usize> {
        self.target(id).map(|t| t.thread)
    }

    /// Source fired by `target`'s `net_event`.
    pub fn artificial_source(&self, target: TargetId) -> Option<SourceId> {
        self.artificial.get(&target).copied()
    }

    /// Source standing in for remote `gid`.
    pub fn input_source(&self, gid: u32) -> Option<SourceId> {
        self.inputs.get(&gid).copied()
    }

    /// Sources whose thresholds are evaluated on `thread`.
    pub fn threshold_sources_on(&self, thread: usize) -> impl Iterator<Item = SourceId> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.thread == thread && matches!(s.kind, SourceKind::Cell { .. }))
            .map(|(i, _)| SourceId::new(i as u32))
    }

    /// Smallest end-to-end delay of any link whose source and target run on
    /// different threads. This bounds how far threads may run apart.
    pub fn min_cross_thread_delay(&self) -> Option<f64> {
        let mut min: Option<f64> = None;
        for src in &self.sources {
            if matches!(src.kind, SourceKind::Input { .. }) {
                continue;
            }
            for (thread, conns) in &src.fanout_by_thread {
                if *thread == src.thread {
                    continue;
                }
                for cid in conns {
                    if let Some(c) = self.connection(*cid) {
                        let d = src.delay + c.delay;
                        min = Some(min.map_or(d, |m: f64| m.min(d)));
                    }
                }
            }
        }
        min
    }

    /// Index fan-outs and lookup tables, then check every invariant.
    pub fn finalize(&mut self) -> SchedResult<()> {
        for src in &mut self.sources {
            src.fanout.clear();
            src.fanout_by_thread.clear();
        }
        for (i, conn) in self.connections.iter().enumerate() {
            let Some(sid) = conn.source else { continue };
            let src = self
                .sources
                .get_mut(sid.index())
                .ok_or_else(|| SchedError::InvalidTopology(format!("C{} names missing source {}", i, sid)))?;
            let cid = ConnectionId::new(i as u32);
            src.fanout.push(cid);
            let thread = match conn.target {
                Some(tid) => self
                    .targets
                    .get(tid.index())
                    .map(|t| t.thread)
                    .ok_or_else(|| SchedError::InvalidTopology(format!("C{} names missing target {}", i, tid)))?,
                None => continue,
            };
            match src.fanout_by_thread.iter_mut().find(|(th, _)| *th == thread) {
                Some((_, list)) => list.push(cid),
                None => src.fanout_by_thread.push((thread, vec![cid])),
            }
        }
        for src in &mut self.sources {
            src.fanout_by_thread.sort_by_key(|(th, _)| *th);
        }

        self.artificial.clear();
        self.inputs.clear();
        for (i, src) in self.sources.iter().enumerate() {
            let sid = SourceId::new(i as u32);
            match src.kind {
                SourceKind::Artificial { target } => {
                    if self.artificial.insert(target, sid).is_some() {
                        return Err(SchedError::InvalidTopology(format!("{} has two sources", target)));
                    }
                }
                SourceKind::Input { gid } => {
                    if self.inputs.insert(gid, sid).is_some() {
                        return Err(SchedError::InvalidTopology(format!("gid {} has two input sources", gid)));
                    }
                }
                SourceKind::Cell { .. } => {}
            }
        }
        self.validate()
    }

    fn validate(&self) -> SchedResult<()> {
        let bad = |msg: String| Err(SchedError::InvalidTopology(msg));
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.thread >= self.threads {
                return bad(format!("cell{} on thread {} of {}", i, cell.thread, self.threads));
            }
        }
        for (i, t) in self.targets.iter().enumerate() {
            if t.thread >= self.threads {
                return bad(format!("T{} on thread {} of {}", i, t.thread, self.threads));
            }
            if let Some(cell) = t.cell {
                match self.cell(cell) {
                    Some(c) if c.thread == t.thread => {}
                    Some(_) => return bad(format!("T{} and its {} are on different threads", i, cell)),
                    None => return bad(format!("T{} names missing {}", i, cell)),
                }
            }
        }
        for (i, c) in self.connections.iter().enumerate() {
            if !(c.delay >= 0.0) {
                return bad(format!("C{} has negative delay {}", i, c.delay));
            }
            if let Some(tid) = c.target {
                let arity = self.targets[tid.index()].arg_count;
                if c.weights.len() != arity {
                    return bad(format!(
                        "C{} has {} weights but {} takes {}",
                        i,
                        c.weights.len(),
                        tid,
                        arity
                    ));
                }
            }
        }
        for (i, s) in self.sources.iter().enumerate() {
            if !(s.delay >= 0.0) {
                return bad(format!("S{} has negative delay {}", i, s.delay));
            }
            match s.kind {
                SourceKind::Cell { cell, var } => match self.cell(cell) {
                    Some(c) if c.thread != s.thread => {
                        return bad(format!("S{} is not on the thread of its {}", i, cell))
                    }
                    Some(c) if var >= c.size => return bad(format!("S{} watches var {} of a size-{} cell", i, var, c.size)),
                    Some(_) => {}
                    None => return bad(format!("S{} names missing {}", i, cell)),
                },
                SourceKind::Artificial { target } => match self.target(target) {
                    Some(t) if t.thread != s.thread => {
                        return bad(format!("S{} is not on the thread of its {}", i, target))
                    }
                    Some(_) => {}
                    None => return bad(format!("S{} names missing {}", i, target)),
                },
                SourceKind::Input { .. } => {}
            }
            if s.min_delay_aggregation {
                let mut delays = s.fanout.iter().filter_map(|c| self.connection(*c)).map(|c| c.delay);
                if let Some(first) = delays.next() {
                    if delays.any(|d| d != first) {
                        return bad(format!("S{} aggregates connections with different delays", i));
                    }
                }
            }
        }
        for (i, w) in self.watches.iter().enumerate() {
            match self.target(w.target).and_then(|t| t.cell) {
                Some(cell) => {
                    if w.var >= self.cells[cell.index()].size {
                        return bad(format!("W{} watches var {} out of range", i, w.var));
                    }
                }
                None => return bad(format!("W{} needs a target attached to a cell", i)),
            }
        }
        for (i, r) in self.recorders.iter().enumerate() {
            let Some(cell) = self.cell(r.cell) else {
                return bad(format!("R{} names missing {}", i, r.cell));
            };
            if cell.thread != r.thread {
                return bad(format!("R{} is not on the thread of its {}", i, r.cell));
            }
            match &r.kind {
                RecorderKind::Play { var, times, values } => {
                    if *var >= cell.size {
                        return bad(format!("R{} plays into var {} out of range", i, var));
                    }
                    if times.len() != values.len() {
                        return bad(format!("R{} has {} times but {} values", i, times.len(), values.len()));
                    }
                    if times.windows(2).any(|w| w[1] < w[0]) {
                        return bad(format!("R{} play times are not sorted", i));
                    }
                }
                RecorderKind::Sample { var, schedule } => {
                    if *var >= cell.size {
                        return bad(format!("R{} samples var {} out of range", i, var));
                    }
                    if let SampleSchedule::Interval { interval, .. } = schedule {
                        if !(*interval > 0.0) {
                            return bad(format!("R{} has non-positive interval", i));
                        }
                    }
                }
            }
        }
        if let Some(d) = self.min_cross_thread_delay() {
            if !(d > 0.0) {
                return bad("a link between threads needs a positive delay".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_thread_topology() -> Topology {
        let mut topo = Topology::new(2);
        topo.cells.push(CellInfo { thread: 0, size: 1 });
        for thread in [0, 1] {
            topo.targets.push(TargetInfo {
                name: "syn".into(),
                thread,
                cell: None,
                arg_count: 1,
            });
        }
        topo.sources.push(Source::new(
            SourceKind::Cell { cell: CellId::new(0), var: 0 },
            0.0,
            2.0,
            0,
        ));
        for (target, delay) in [(0, 1.0), (1, 3.0)] {
            topo.connections.push(Connection {
                source: Some(SourceId::new(0)),
                target: Some(TargetId::new(target)),
                delay,
                weights: vec![0.5],
                active: true,
            });
        }
        topo
    }

    #[test]
    fn test_finalize_groups_fanout_by_thread() {
        let mut topo = two_thread_topology();
        topo.finalize().unwrap();
        let src = topo.source(SourceId::new(0)).unwrap();
        assert_eq!(src.fanout.len(), 2);
        assert_eq!(src.fanout_on(0), &[ConnectionId::new(0)]);
        assert_eq!(src.fanout_on(1), &[ConnectionId::new(1)]);
        assert!(src.fanout_on(2).is_empty());
    }

    #[test]
    fn test_min_cross_thread_delay() {
        let mut topo = two_thread_topology();
        topo.finalize().unwrap();
        assert_eq!(topo.min_cross_thread_delay(), Some(5.0));
    }

    #[test]
    fn test_rejects_weight_arity_mismatch() {
        let mut topo = two_thread_topology();
        topo.connections[0].weights = vec![1.0, 2.0];
        assert!(matches!(topo.finalize(), Err(SchedError::InvalidTopology(_))));
    }

    #[test]
    fn test_rejects_aggregation_with_unequal_delays() {
        let mut topo = two_thread_topology();
        topo.sources[0].min_delay_aggregation = true;
        assert!(topo.finalize().is_err());
        topo.connections[1].delay = 1.0;
        assert!(topo.finalize().is_ok());
    }

    #[test]
    fn test_rejects_zero_delay_between_threads() {
        let mut topo = two_thread_topology();
        topo.sources[0].delay = 0.0;
        topo.connections[1].delay = 0.0;
        assert!(topo.finalize().is_err());
    }

    #[test]
    fn test_detached_connection_is_not_in_thread_fanout() {
        let mut topo = two_thread_topology();
        topo.connections[1].target = None;
        topo.finalize().unwrap();
        let src = topo.source(SourceId::new(0)).unwrap();
        assert_eq!(src.fanout.len(), 2);
        assert!(src.fanout_on(1).is_empty());
        assert!(!topo.connections[1].is_live());
    }

    #[test]
    fn test_watch_value_direction() {
        let above = WatchSpec {
            target: TargetId::new(0),
            var: 0,
            threshold: -20.0,
            direction: WatchDirection::Above,
        };
        let below = WatchSpec { direction: WatchDirection::Below, ..above };
        assert_eq!(above.value(&[-10.0]), 10.0);
        assert_eq!(below.value(&[-10.0]), -10.0);
    }
}
