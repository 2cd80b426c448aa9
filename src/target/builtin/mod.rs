//! Built-in targets used by the demo and the tests.

pub mod counter;
pub mod probe;
pub mod stim;
pub mod synapse;

pub use counter::SpikeCounter;
pub use probe::WatchProbe;
pub use stim::RegularStim;
pub use synapse::ExpSynapse;
