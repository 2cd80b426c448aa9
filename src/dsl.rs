//! Builder for network setup.
//!
//! Assembles cells, targets, sources, connections, watches and recorders,
//! assigns them to threads, and validates the result into a [`Network`]
//! that a [`Scheduler`](crate::scheduler::Scheduler) can run.

use crate::error::{SchedError, SchedResult};
use crate::ids::{CellId, ConnectionId, RecorderId, SourceId, TargetId, WatchId};
use crate::integrator::CellModel;
use crate::network::{
    CellInfo, Connection, RecorderKind, RecorderSpec, SampleSchedule, Source, SourceKind, TargetInfo, Topology,
    WatchDirection, WatchSpec,
};
use crate::target::Target;

// ── Network ───────────────────────────────────────────────────────────

/// A validated topology together with the objects that live in it.
pub struct Network {
    pub topology: Topology,
    /// Indexed by [`TargetId`].
    pub targets: Vec<Box<dyn Target>>,
    /// Indexed by [`CellId`].
    pub cells: Vec<Box<dyn CellModel>>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("threads", &self.topology.threads)
            .field("cells", &self.cells.len())
            .field("targets", &self.targets.len())
            .field("connections", &self.topology.connections.len())
            .finish()
    }
}

// ── NetworkBuilder ────────────────────────────────────────────────────

/// Incremental builder for a [`Network`]. Every `add`-style method returns
/// the stable id of what it created.
///
/// # Example
/// ```rust
/// use neurosched::dsl::NetworkBuilder;
/// use neurosched::integrator::RampCell;
/// use neurosched::target::{ExpSynapse, SpikeCounter};
///
/// let mut b = NetworkBuilder::new(2);
/// let c0 = b.cell(0, Box::new(RampCell::new(-10.0, 1.0)));
/// let syn = b.target(0, Some(c0), Box::new(ExpSynapse::new(0)));
/// let s0 = b.threshold_source(c0, 0, 0.0, 1.0);
/// let sink = b.target(1, None, Box::new(SpikeCounter::new()));
/// b.connect(s0, sink, 2.0, vec![1.0]);
/// b.connect(s0, syn, 0.5, vec![-5.0]);
/// let net = b.build().unwrap();
/// assert_eq!(net.topology.min_cross_thread_delay(), Some(3.0));
/// ```
pub struct NetworkBuilder {
    topology: Topology,
    targets: Vec<Box<dyn Target>>,
    cells: Vec<Box<dyn CellModel>>,
}

impl NetworkBuilder {
    pub fn new(threads: usize) -> Self {
        NetworkBuilder {
            topology: Topology::new(threads),
            targets: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn threads(&self) -> usize {
        self.topology.threads
    }

    // ── Cells and targets ─────────────────────────────────────

    /// Add a cell integrated on `thread`.
    pub fn cell(&mut self, thread: usize, model: Box<dyn CellModel>) -> CellId {
        let id = CellId::new(self.cells.len() as u32);
        self.topology.cells.push(CellInfo {
            thread,
            size: model.size(),
        });
        self.cells.push(model);
        id
    }

    /// Add a target on `thread`, optionally attached to a cell on the same
    /// thread.
    pub fn target(&mut self, thread: usize, cell: Option<CellId>, obj: Box<dyn Target>) -> TargetId {
        let id = TargetId::new(self.targets.len() as u32);
        self.topology.targets.push(TargetInfo {
            name: obj.name().to_string(),
            thread,
            cell,
            arg_count: obj.arg_count(),
        });
        self.targets.push(obj);
        id
    }

    // ── Sources ───────────────────────────────────────────────

    fn push_source(&mut self, source: Source) -> SourceId {
        let id = SourceId::new(self.topology.sources.len() as u32);
        self.topology.sources.push(source);
        id
    }

    /// Threshold source on `state[var]` of `cell`, evaluated on the cell's
    /// thread.
    pub fn threshold_source(&mut self, cell: CellId, var: usize, threshold: f64, delay: f64) -> SourceId {
        let thread = self.topology.cell(cell).map_or(0, |c| c.thread);
        self.push_source(Source::new(SourceKind::Cell { cell, var }, threshold, delay, thread))
    }

    /// Source fired by `target` through `net_event`.
    pub fn artificial_source(&mut self, target: TargetId, delay: f64) -> SourceId {
        let thread = self.topology.target_thread(target).unwrap_or(0);
        self.push_source(Source::new(SourceKind::Artificial { target }, 0.0, delay, thread))
    }

    /// Stand-in for remote source `gid`, fed by the spike exchange.
    pub fn input_source(&mut self, gid: u32) -> SourceId {
        self.push_source(Source::new(SourceKind::Input { gid }, 0.0, 0.0, 0))
    }

    fn source_mut(&mut self, id: SourceId) -> Option<&mut Source> {
        self.topology.sources.get_mut(id.index())
    }

    /// Keep a raster of this source's spikes.
    pub fn record(&mut self, id: SourceId) -> &mut Self {
        if let Some(s) = self.source_mut(id) {
            s.record = true;
        }
        self
    }

    /// Hand this source's spikes to the exchange under `gid`.
    pub fn output_gid(&mut self, id: SourceId, gid: u32) -> &mut Self {
        if let Some(s) = self.source_mut(id) {
            s.output_gid = Some(gid);
        }
        self
    }

    /// Queue one aggregated occurrence per receiving thread.
    pub fn aggregate(&mut self, id: SourceId) -> &mut Self {
        if let Some(s) = self.source_mut(id) {
            s.min_delay_aggregation = true;
        }
        self
    }

    // ── Connections ───────────────────────────────────────────

    pub fn connect(&mut self, source: SourceId, target: TargetId, delay: f64, weights: Vec<f64>) -> ConnectionId {
        self.connection(Some(source), Some(target), delay, weights)
    }

    /// General form: either end may be missing.
    pub fn connection(
        &mut self,
        source: Option<SourceId>,
        target: Option<TargetId>,
        delay: f64,
        weights: Vec<f64>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.topology.connections.len() as u32);
        self.topology.connections.push(Connection {
            source,
            target,
            delay,
            weights,
            active: true,
        });
        id
    }

    /// Mark a connection inactive; sends through it become no-ops.
    pub fn deactivate(&mut self, id: ConnectionId) -> &mut Self {
        if let Some(c) = self.topology.connections.get_mut(id.index()) {
            c.active = false;
        }
        self
    }

    // ── Watches and recorders ─────────────────────────────────

    /// Watch `state[var]` of `target`'s cell against `threshold`.
    pub fn watch(&mut self, target: TargetId, var: usize, threshold: f64, direction: WatchDirection) -> WatchId {
        let id = WatchId::new(self.topology.watches.len() as u32);
        self.topology.watches.push(WatchSpec {
            target,
            var,
            threshold,
            direction,
        });
        id
    }

    fn push_recorder(&mut self, cell: CellId, kind: RecorderKind) -> RecorderId {
        let id = RecorderId::new(self.topology.recorders.len() as u32);
        let thread = self.topology.cell(cell).map_or(0, |c| c.thread);
        self.topology.recorders.push(RecorderSpec { cell, thread, kind });
        id
    }

    /// Step `state[var]` to `values[i]` at `times[i]`.
    pub fn play(&mut self, cell: CellId, var: usize, times: Vec<f64>, values: Vec<f64>) -> RecorderId {
        self.push_recorder(cell, RecorderKind::Play { var, times, values })
    }

    /// Sample `state[var]` on `schedule`.
    pub fn sample(&mut self, cell: CellId, var: usize, schedule: SampleSchedule) -> RecorderId {
        self.push_recorder(cell, RecorderKind::Sample { var, schedule })
    }

    // ── Build ─────────────────────────────────────────────────

    /// Index and validate. Fails on anything the scheduler could not run.
    pub fn build(self) -> SchedResult<Network> {
        let NetworkBuilder {
            mut topology,
            targets,
            cells,
        } = self;
        for (i, (info, model)) in topology.cells.iter().zip(&cells).enumerate() {
            if info.size != model.size() {
                return Err(SchedError::InvalidTopology(format!("cell{} changed size", i)));
            }
        }
        topology.finalize()?;
        Ok(Network {
            topology,
            targets,
            cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::RampCell;
    use crate::target::{ExpSynapse, RegularStim, SpikeCounter};

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let mut b = NetworkBuilder::new(1);
        let c0 = b.cell(0, Box::new(RampCell::new(0.0, 1.0)));
        let c1 = b.cell(0, Box::new(RampCell::new(0.0, 1.0)));
        assert_eq!((c0.raw(), c1.raw()), (0, 1));
        let t0 = b.target(0, None, Box::new(SpikeCounter::new()));
        let t1 = b.target(0, Some(c1), Box::new(ExpSynapse::new(0)));
        assert_eq!((t0.raw(), t1.raw()), (0, 1));
        let net = b.build().unwrap();
        assert_eq!(net.targets.len(), 2);
        assert_eq!(net.topology.targets[1].name, "ExpSynapse");
    }

    #[test]
    fn test_source_inherits_thread() {
        let mut b = NetworkBuilder::new(3);
        let c = b.cell(2, Box::new(RampCell::new(0.0, 1.0)));
        let s = b.threshold_source(c, 0, 0.0, 1.0);
        let stim = b.target(1, None, Box::new(RegularStim::new(0.0, 1.0, None)));
        let a = b.artificial_source(stim, 0.0);
        let net = b.build().unwrap();
        assert_eq!(net.topology.source(s).unwrap().thread, 2);
        assert_eq!(net.topology.source(a).unwrap().thread, 1);
        assert_eq!(net.topology.artificial_source(stim), Some(a));
    }

    #[test]
    fn test_build_rejects_target_on_foreign_cell() {
        let mut b = NetworkBuilder::new(2);
        let c = b.cell(0, Box::new(RampCell::new(0.0, 1.0)));
        b.target(1, Some(c), Box::new(ExpSynapse::new(0)));
        assert!(matches!(b.build(), Err(SchedError::InvalidTopology(_))));
    }

    #[test]
    fn test_build_rejects_watch_without_cell() {
        let mut b = NetworkBuilder::new(1);
        let t = b.target(0, None, Box::new(SpikeCounter::new()));
        b.watch(t, 0, 1.0, WatchDirection::Above);
        assert!(b.build().is_err());
    }

    #[test]
    fn test_source_options() {
        let mut b = NetworkBuilder::new(1);
        let c = b.cell(0, Box::new(RampCell::new(0.0, 1.0)));
        let s = b.threshold_source(c, 0, 0.0, 1.0);
        b.record(s).output_gid(s, 42).aggregate(s);
        let net = b.build().unwrap();
        let src = net.topology.source(s).unwrap();
        assert!(src.record && src.min_delay_aggregation);
        assert_eq!(src.output_gid, Some(42));
    }
}
