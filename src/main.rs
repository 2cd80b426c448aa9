//! neurosched demo
//!
//! Builds a small ring of self-resetting leaky cells, one pair per thread,
//! each exciting its neighbour on the next thread, and runs it with the
//! chosen method.
//!
//! ```bash
//! neurosched --method local --threads 2 --tstop 200
//! neurosched -m fixed --dt 0.025 --bins 512 --checkpoint state.ckpt
//! ```

use clap::Parser;
use neurosched::config::{Method, SchedulerConfig};
use neurosched::dsl::{Network, NetworkBuilder};
use neurosched::integrator::LeakyCell;
use neurosched::target::{ExpSynapse, RegularStim, SpikeCounter};
use neurosched::{SchedResult, Scheduler, StatementAction, TargetId};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Event-delivery demo network
#[derive(Parser, Debug)]
#[command(name = "neurosched")]
#[command(version, about, long_about = None)]
struct Args {
    /// Solve method: fixed, local or global
    #[arg(short = 'm', long, default_value = "local", env = "NEUROSCHED_METHOD")]
    method: Method,

    /// Worker threads (one cell pair per thread)
    #[arg(short = 't', long, default_value = "2")]
    threads: usize,

    /// Step size in ms
    #[arg(long, default_value = "0.025")]
    dt: f64,

    /// Stop time in ms
    #[arg(long, default_value = "100")]
    tstop: f64,

    /// Use a bin ring of this many slots for spike delivery (fixed step only)
    #[arg(long)]
    bins: Option<usize>,

    /// Print per-thread delivery counts at the end
    #[arg(long)]
    per_thread: bool,

    /// Write a checkpoint of the pending queue at the halfway point
    #[arg(long)]
    checkpoint: Option<String>,
}

/// Ids the demo reports on.
struct Demo {
    network: Network,
    sinks: Vec<TargetId>,
}

fn build_demo(threads: usize) -> SchedResult<Demo> {
    let mut b = NetworkBuilder::new(threads);
    let mut sources = Vec::with_capacity(threads);
    let mut synapses = Vec::with_capacity(threads);
    let mut sinks = Vec::with_capacity(threads);
    for th in 0..threads {
        // Resting at -65 with a drive that settles above threshold.
        let cell = b.cell(th, Box::new(LeakyCell::new(-65.0, 10.0, 2.0 + 0.3 * th as f64)));
        let reset = b.target(th, Some(cell), Box::new(ExpSynapse::new(0)));
        let excite = b.target(th, Some(cell), Box::new(ExpSynapse::new(0)));
        let src = b.threshold_source(cell, 0, -50.0, 0.5);
        b.record(src);
        b.connect(src, reset, 0.0, vec![-20.0]);
        sources.push(src);
        synapses.push(excite);
        sinks.push(b.target(th, None, Box::new(SpikeCounter::new())));
    }
    for th in 0..threads {
        let next = (th + 1) % threads;
        b.connect(sources[th], synapses[next], 1.0, vec![4.0]);
        b.connect(sources[th], sinks[next], 1.0, vec![1.0]);
    }
    // A background drive into thread 0.
    let stim = b.target(0, None, Box::new(RegularStim::new(5.0, 7.5, None)));
    let s = b.artificial_source(stim, 0.0);
    b.connect(s, synapses[0], 0.5, vec![3.0]);

    Ok(Demo {
        network: b.build()?,
        sinks,
    })
}

fn run(args: &Args) -> SchedResult<()> {
    let mut config = SchedulerConfig::new(args.method)
        .with_dt(args.dt)
        .with_threads(args.threads);
    if let Some(n) = args.bins {
        config = config.with_bin_queue(n);
    }
    let Demo { network, sinks } = build_demo(args.threads)?;
    info!(?network, method = %args.method, "network built");

    let mut sched = Scheduler::new(network, config)?;
    sched.init()?;
    let half = 0.5 * args.tstop;
    sched.schedule_statement(half, true, move |t| {
        info!(t, "halfway");
        StatementAction::Continue
    })?;
    sched.solve(half)?;

    if let Some(path) = &args.checkpoint {
        let cp = sched.save_checkpoint()?;
        cp.export_to_file(path)
            .map_err(|e| neurosched::SchedError::InvalidConfig(format!("cannot write {}: {}", path, e)))?;
        info!(path = %path, items = cp.items.len(), "checkpoint written");
    }
    sched.solve(args.tstop)?;

    let stats = sched.stats();
    println!("method {}  threads {}  t = {}", args.method, sched.threads(), sched.t());
    println!("  spikes        {}", stats.spikes);
    println!("  delivered     {}", stats.delivered.total());
    println!("  cross-thread  {}", stats.cross_thread);
    println!("  barriers      {}", stats.barrier_rounds);
    println!("  steps         {}", stats.steps);
    if args.per_thread {
        for th in 0..sched.threads() {
            if let Some(s) = sched.thread_stats(th) {
                println!("  thread {}: delivered {} binned {}", th, s.delivered.total(), s.binned);
            }
        }
    }
    for (th, sink) in sinks.iter().enumerate() {
        if let Some(counter) = sched.target::<SpikeCounter>(*sink) {
            println!("  sink on thread {} received {}", th, counter.count());
        }
    }
    let raster = sched.spikes();
    for (t, src) in raster.iter().take(10) {
        println!("    {:>10.4} {}", t, src);
    }
    if raster.len() > 10 {
        println!("    ... {} more", raster.len() - 10);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,neurosched=info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!(%e, "run failed");
        std::process::exit(1);
    }
}
