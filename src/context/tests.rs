use super::*;
use crate::dsl::{Network, NetworkBuilder};
use crate::target::{RegularStim, SpikeCounter};

/// Split a network into its shared half and one bare core per thread.
fn cores(net: Network, config: SchedulerConfig) -> (Shared, Vec<ThreadCore>) {
    let Network { topology, targets, .. } = net;
    let threads = config.threads;
    let mut by_thread: Vec<Vec<(TargetId, Box<dyn Target>)>> = (0..threads).map(|_| Vec::new()).collect();
    for (i, obj) in targets.into_iter().enumerate() {
        let tid = TargetId::new(i as u32);
        let th = topology.target_thread(tid).unwrap();
        by_thread[th].push((tid, obj));
    }
    let (shared, receivers) = Shared::new(topology, config.clone(), None);
    let cores = receivers
        .into_iter()
        .zip(by_thread)
        .enumerate()
        .map(|(i, (rx, targets))| ThreadCore::new(i, &shared.topology, &config, rx, targets))
        .collect();
    (shared, cores)
}

/// A stimulator on thread 0 wired to a counter on thread 1 with delay 0.25.
fn cross_pair() -> (Network, SourceId, ConnectionId) {
    let mut b = NetworkBuilder::new(2);
    let stim = b.target(0, None, Box::new(RegularStim::new(1.0, 1.0, None)));
    let s = b.artificial_source(stim, 0.0);
    let sink = b.target(1, None, Box::new(SpikeCounter::new()));
    let c = b.connect(s, sink, 0.25, vec![1.0]);
    (b.build().unwrap(), s, c)
}

fn local2() -> SchedulerConfig {
    SchedulerConfig::new(Method::LocalVariable).with_threads(2)
}

#[test]
fn test_send_to_peer_goes_through_mailbox() {
    let (net, _, c) = cross_pair();
    let (shared, mut cores) = cores(net, local2());

    cores[0].send_event(1, 3.0, Event::Connection(c), &shared).unwrap();
    assert_eq!(cores[0].stats.cross_thread, 1);
    assert_eq!(cores[0].stats.sent.get(EventKind::Connection), 1);
    assert!(cores[1].queue.is_empty());

    assert!(shared.take_mailbox_pending());
    assert!(!shared.take_mailbox_pending());
    assert_eq!(cores[1].drain_mailbox().unwrap(), 1);
    assert_eq!(cores[1].least_time(), 3.0);
}

#[test]
fn test_send_to_self_queues_locally() {
    let (net, _, c) = cross_pair();
    let (shared, mut cores) = cores(net, local2());

    cores[1].send_event(1, 2.0, Event::Connection(c), &shared).unwrap();
    assert_eq!(cores[1].queue.len(), 1);
    assert_eq!(cores[1].stats.cross_thread, 0);
    assert!(!shared.take_mailbox_pending());
}

#[test]
fn test_drained_item_behind_clock_is_fatal() {
    let (net, _, c) = cross_pair();
    let (shared, mut cores) = cores(net, local2());
    cores[1].t = 5.0;

    shared.post(1, 1.0, Event::Connection(c)).unwrap();
    let err = cores[1].drain_mailbox().unwrap_err();
    assert!(matches!(err, SchedError::InvariantViolation { at, now, .. } if at == 1.0 && now == 5.0));
}

#[test]
fn test_send_tolerance_by_method() {
    let (net, _, c) = cross_pair();
    let (shared, mut cs) = cores(net, local2());
    cs[1].t = 5.0;
    assert!(cs[1].send_event(1, 5.0 - 1e-10, Event::Connection(c), &shared).is_ok());
    assert!(cs[1].send_event(1, 4.99, Event::Connection(c), &shared).is_err());

    let (net, _, c) = cross_pair();
    let config = SchedulerConfig::new(Method::Fixed).with_dt(0.1).with_threads(2);
    let (shared, mut cs) = cores(net, config);
    cs[1].t = 5.0;
    assert!(cs[1].send_event(1, 4.96, Event::Connection(c), &shared).is_ok());
    assert!(cs[1].send_event(1, 4.9, Event::Connection(c), &shared).is_err());
}

#[test]
fn test_post_to_missing_thread() {
    let (net, _, c) = cross_pair();
    let (shared, _) = cores(net, local2());
    assert_eq!(shared.post(7, 1.0, Event::Connection(c)), Err(SchedError::MailboxClosed(7)));
}

#[test]
fn test_source_send_skips_detached_connections() {
    let mut b = NetworkBuilder::new(1);
    let stim = b.target(0, None, Box::new(RegularStim::new(1.0, 1.0, None)));
    let s = b.artificial_source(stim, 0.5);
    let sink = b.target(0, None, Box::new(SpikeCounter::new()));
    b.connection(Some(s), None, 1.0, vec![]);
    let off = b.connect(s, sink, 1.0, vec![1.0]);
    b.deactivate(off);
    let live = b.connect(s, sink, 2.0, vec![1.0]);
    let net = b.build().unwrap();
    let (shared, mut cores) = cores(net, SchedulerConfig::new(Method::LocalVariable));

    cores[0].source_send(s, 1.0, &shared).unwrap();
    let core = &cores[0];
    assert_eq!(core.stats.spikes, 1);
    assert_eq!(core.stats.detached, 2);
    assert_eq!(core.queue.len(), 1);
    // source delay + connection delay
    assert_eq!(core.least_time(), 3.5);
    assert!(matches!(core.queue.peek().map(|(_, e)| *e), Some(Event::Connection(c)) if c == live));
}

#[test]
fn test_aggregated_source_queues_once_per_thread() {
    let mut b = NetworkBuilder::new(2);
    let stim = b.target(0, None, Box::new(RegularStim::new(1.0, 1.0, None)));
    let s = b.artificial_source(stim, 0.0);
    let a = b.target(1, None, Box::new(SpikeCounter::new()));
    let z = b.target(1, None, Box::new(SpikeCounter::new()));
    b.connect(s, a, 0.5, vec![1.0]);
    b.connect(s, z, 0.5, vec![1.0]);
    b.aggregate(s);
    let net = b.build().unwrap();
    let (shared, mut cores) = cores(net, local2());

    cores[0].source_send(s, 1.0, &shared).unwrap();
    assert_eq!(cores[0].stats.sent.get(EventKind::Fanout), 1);
    assert_eq!(cores[0].stats.sent.get(EventKind::Connection), 0);
    assert_eq!(cores[1].drain_mailbox().unwrap(), 1);
    assert_eq!(cores[1].least_time(), 1.5);
}

#[test]
fn test_rendezvous_last_arriver_completes() {
    let (net, _, _) = cross_pair();
    let (shared, _) = cores(net, local2());
    let rv = &shared.rendezvous;

    assert_eq!(rv.arrive(), (false, 0));
    assert_eq!(rv.arrive(), (true, 0));
    assert_eq!(rv.generation(), 0);
    rv.complete();
    assert_eq!(rv.generation(), 1);
    // The counter starts over for the next round.
    assert_eq!(rv.arrive(), (false, 1));
}

#[test]
fn test_barrier_interval_by_method() {
    let (net, _, _) = cross_pair();
    let (shared, _) = cores(net, local2());
    assert_eq!(shared.rendezvous.interval(), Some(0.25));

    let (net, _, _) = cross_pair();
    let config = SchedulerConfig::new(Method::Fixed).with_dt(0.1).with_threads(2);
    let (shared, _) = cores(net, config);
    let interval = shared.rendezvous.interval().unwrap();
    assert!((interval - 0.2).abs() < 1e-12, "got {}", interval);

    let (net, _, _) = cross_pair();
    let (shared, _) = cores(net, SchedulerConfig::new(Method::GlobalVariable).with_threads(2));
    assert_eq!(shared.rendezvous.interval(), None);
}

#[test]
fn test_init_queues_first_barrier_and_target_sends() {
    let (net, _, _) = cross_pair();
    let (shared, mut cores) = cores(net, local2());
    let mut solvers = SolverSet::empty(0.1);

    cores[0].init(0.0, &mut solvers, &shared).unwrap();
    // barrier at 0.25, the stimulator's first firing at 1.0
    assert_eq!(cores[0].queue.len(), 2);
    assert_eq!(cores[0].least_time(), 0.25);
    assert_eq!(cores[0].stats.sent.get(EventKind::Barrier), 1);
    assert_eq!(cores[0].stats.sent.get(EventKind::SelfEvent), 1);
    assert!(cores[0].movable.len() == 1);
}

#[test]
fn test_fixed_init_pulls_first_barrier_in_by_a_step() {
    let (net, _, _) = cross_pair();
    let config = SchedulerConfig::new(Method::Fixed).with_dt(0.1).with_threads(2);
    let (shared, mut cs) = cores(net, config);
    let mut solvers = SolverSet::empty(0.1);

    // interval 0.2; the round that delivers the barrier ends a step later
    cs[1].init(0.0, &mut solvers, &shared).unwrap();
    assert_eq!(cs[1].queue.len(), 1);
    assert!((cs[1].least_time() - 0.1).abs() < 1e-12, "got {}", cs[1].least_time());
}

#[test]
fn test_stop_handle_is_shared_between_clones() {
    let stop = StopHandle::new();
    let other = stop.clone();
    other.stop();
    assert!(stop.is_stopped());
    stop.clear();
    assert!(!other.is_stopped());
}
