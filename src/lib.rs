//! # neurosched: Multithreaded Event Delivery for Network Simulation
//!
//! A discrete-event scheduling core for networks of model cells. Spikes,
//! self events, watched conditions and recorder ticks are queued per
//! thread in time order and delivered while the cells' integrators are
//! advanced by a fixed step, a per-cell variable step, or one global
//! variable step.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │            Scheduler                │ ← init / solve / statements
//! │  ┌───────────────┐ ┌─────────────┐  │
//! │  │ ThreadContext │ │ ThreadCtx … │  │ ← one per worker thread
//! │  │ ┌───────────┐ │ │             │  │
//! │  │ │ TimeQueue │ │ │             │  │ ← priority-ordered occurrences
//! │  │ └───────────┘ │ │             │  │
//! │  │ ┌───────────┐ │ │             │  │
//! │  │ │ SolverSet │ │ │             │  │ ← integrators of its cells
//! │  │ └───────────┘ │ │             │  │
//! │  └───────┬───────┘ └──────┬──────┘  │
//! │          └──── Shared ────┘         │ ← topology, mailboxes, barrier
//! └─────────────────────────────────────┘
//! ```

pub mod checkpoint;
pub mod condition;
pub mod config;
pub mod context;
pub mod dsl;
pub mod error;
pub mod event;
pub mod ids;
pub mod integrator;
pub mod network;
pub mod pool;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod stats;
pub mod target;
pub mod time;

// Re-exports for convenience.
pub use checkpoint::Checkpoint;
pub use config::{Method, SchedulerConfig};
pub use context::{Loopback, ReceiveContext, SpikeExchange, StopHandle};
pub use dsl::{Network, NetworkBuilder};
pub use error::{IntegratorError, SchedError, SchedResult};
pub use event::{Event, EventKind};
pub use ids::{CellId, ConnectionId, RecorderId, SourceId, StatementId, TargetId, WatchId};
pub use integrator::{CellModel, Integrator};
pub use scheduler::{Scheduler, StatementAction};
pub use stats::SchedulerStats;
pub use target::Target;
