use super::*;
use crate::config::{Method, SchedulerConfig};
use crate::context::ReceiveContext;
use crate::dsl::NetworkBuilder;
use crate::error::{SchedError, SchedResult};
use crate::integrator::RampCell;
use crate::network::WatchDirection;
use crate::scheduler::Scheduler;

fn run(b: NetworkBuilder, tout: f64) -> SchedResult<Scheduler> {
    let config = SchedulerConfig::new(Method::LocalVariable).with_dt(0.1);
    let mut sched = Scheduler::new(b.build()?, config)?;
    sched.init()?;
    sched.solve(tout)?;
    Ok(sched)
}

/// Calls `net_move` from its init routine without having sent anything.
struct EagerMover;

impl Target for EagerMover {
    fn arg_count(&self) -> usize {
        0
    }

    fn init(&mut self, cx: &mut ReceiveContext<'_>) -> SchedResult<()> {
        cx.net_move(1.0)
    }

    fn receive(&mut self, _cx: &mut ReceiveContext<'_>, _w: &[f64], _flag: f64) -> SchedResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Sends itself an event with the given delay at init.
struct SelfSender(f64);

impl Target for SelfSender {
    fn arg_count(&self) -> usize {
        0
    }

    fn init(&mut self, cx: &mut ReceiveContext<'_>) -> SchedResult<()> {
        cx.net_send(self.0, 0.0)
    }

    fn receive(&mut self, _cx: &mut ReceiveContext<'_>, _w: &[f64], _flag: f64) -> SchedResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn test_regular_stim_fires_number_times() {
    let mut b = NetworkBuilder::new(1);
    let stim = b.target(0, None, Box::new(RegularStim::new(1.0, 2.5, Some(3))));
    let s = b.artificial_source(stim, 0.0);
    let sink = b.target(0, None, Box::new(SpikeCounter::new()));
    b.connect(s, sink, 0.5, vec![2.0]);
    let sched = run(b, 20.0).unwrap();

    let counter = sched.target::<SpikeCounter>(sink).unwrap();
    assert_eq!(counter.times(), vec![1.5, 4.0, 6.5]);
    assert!(counter.received.iter().all(|(_, w, flag)| w == &[2.0] && *flag == 0.0));
    assert_eq!(sched.target::<RegularStim>(stim).unwrap().fired, 3);
}

#[test]
fn test_regular_stim_pulled_forward_by_input() {
    let mut b = NetworkBuilder::new(1);
    let kick = b.target(0, None, Box::new(RegularStim::new(2.0, 100.0, Some(1))));
    let ks = b.artificial_source(kick, 0.0);
    let stim = b.target(0, None, Box::new(RegularStim::new(5.0, 3.0, Some(2))));
    b.connect(ks, stim, 0.0, vec![1.0]);
    let s = b.artificial_source(stim, 0.0);
    let sink = b.target(0, None, Box::new(SpikeCounter::new()));
    b.connect(s, sink, 0.0, vec![1.0]);
    let sched = run(b, 20.0).unwrap();

    // The pending firing at 5 moves to 2; the train restarts from there.
    let times = sched.target::<SpikeCounter>(sink).unwrap().times();
    assert_eq!(times, vec![2.0, 5.0]);
    assert_eq!(sched.stats().moved, 1);
}

#[test]
fn test_exp_synapse_kicks_cell_state() {
    let mut b = NetworkBuilder::new(1);
    let cell = b.cell(0, Box::new(RampCell::new(0.0, 0.0)));
    let syn = b.target(0, Some(cell), Box::new(ExpSynapse::new(0)));
    let stim = b.target(0, None, Box::new(RegularStim::new(1.0, 1.0, Some(2))));
    let s = b.artificial_source(stim, 0.0);
    b.connect(s, syn, 0.5, vec![1.5]);
    let sched = run(b, 5.0).unwrap();

    assert_eq!(sched.target::<ExpSynapse>(syn).unwrap().events, 2);
    assert!((sched.state(cell).unwrap()[0] - 3.0).abs() < 1e-12);
}

#[test]
fn test_watch_probe_fires_its_source() {
    let mut b = NetworkBuilder::new(1);
    let cell = b.cell(0, Box::new(RampCell::new(-1.0, 1.0)));
    let probe = b.target(0, Some(cell), Box::new(WatchProbe::new(2.0, false)));
    b.watch(probe, 0, 0.5, WatchDirection::Above);
    let s = b.artificial_source(probe, 0.0);
    let sink = b.target(0, None, Box::new(SpikeCounter::new()));
    b.connect(s, sink, 1.0, vec![1.0]);
    let sched = run(b, 5.0).unwrap();

    let tripped = &sched.target::<WatchProbe>(probe).unwrap().tripped;
    assert_eq!(tripped.len(), 1);
    assert!((tripped[0] - 1.5).abs() < 1e-6, "tripped at {}", tripped[0]);
    let times = sched.target::<SpikeCounter>(sink).unwrap().times();
    assert_eq!(times.len(), 1);
    assert!((times[0] - 2.5).abs() < 1e-6);
}

#[test]
fn test_net_move_without_movable_event() {
    let mut b = NetworkBuilder::new(1);
    let t = b.target(0, None, Box::new(EagerMover));
    let err = run(b, 1.0).unwrap_err();
    assert_eq!(err, SchedError::NoMovableEvent(t.raw()));
}

#[test]
fn test_net_send_rejects_negative_delay() {
    let mut b = NetworkBuilder::new(1);
    b.target(0, None, Box::new(SelfSender(-0.5)));
    assert_eq!(run(b, 1.0).unwrap_err(), SchedError::NegativeDelay(-0.5));
}

#[test]
fn test_target_names() {
    assert_eq!(SpikeCounter::new().name(), "SpikeCounter");
    assert_eq!(RegularStim::new(0.0, 1.0, None).name(), "RegularStim");
    assert_eq!(EagerMover.name(), "target");
}
