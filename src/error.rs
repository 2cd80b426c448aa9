//! Structured error types for the scheduler.
//!
//! All fallible public APIs return `Result<T, SchedError>`. The variants
//! follow how a caller is expected to react: invariant violations and
//! checkpoint mismatches are fatal for the run, integrator failures are a
//! status the caller may act on, and topology/config errors are reported
//! before any event is queued.
//!
//! Disconnected connections and sources with no fan-out are not errors at
//! all; delivery code treats them as no-ops.

use thiserror::Error;

/// Failure reported by an [`Integrator`](crate::integrator::Integrator).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegratorError {
    /// A state variable became NaN or infinite.
    #[error("non-finite state in cell {cell} at t={t}")]
    NonFinite { cell: u32, t: f64 },

    /// The cell model refused to produce derivatives.
    #[error("step rejected at t={t}: {reason}")]
    StepRejected { t: f64, reason: String },

    /// Interpolation or retreat outside the last computed step.
    #[error("time {t} outside the last step [{t0}, {tn}]")]
    OutOfRange { t: f64, t0: f64, tn: f64 },
}

/// The top-level error type for the scheduling core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedError {
    // ── Fatal: caller logic errors ────────────────────────

    /// Something asked for delivery earlier than a clock already reached.
    #[error("{what}: requested t={at} but the clock is at t={now}")]
    InvariantViolation {
        what: &'static str,
        at: f64,
        now: f64,
    },

    /// `net_move`/`cancel` on a target with no movable self event queued.
    #[error("target {0} has no movable event (net_send with flag 1) to move")]
    NoMovableEvent(u32),

    /// A negative delay was passed to a send routine.
    #[error("negative delay {0}")]
    NegativeDelay(f64),

    /// Delivery or a receive-routine call reached a thread that does not
    /// own the target.
    #[error("target {target} is not owned by thread {thread}")]
    ForeignTarget { target: u32, thread: usize },

    /// The receiving end of a thread's mailbox is gone.
    #[error("mailbox of thread {0} is closed")]
    MailboxClosed(usize),

    // ── Recoverable: integrator status ────────────────────

    /// The integrator collaborator rejected a step.
    #[error("integrator failure: {0}")]
    Integrator(#[from] IntegratorError),

    // ── Fatal: checkpoint/topology mismatch ───────────────

    /// A restored record does not resolve to a live object of the right kind.
    #[error("checkpoint record {index} does not resolve: {expected}")]
    CheckpointMismatch { index: usize, expected: String },

    /// The checkpoint text could not be parsed.
    #[error("malformed checkpoint at line {line}: {reason}")]
    CheckpointFormat { line: usize, reason: String },

    // ── Build-time validation ─────────────────────────────

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler was used before `init`.
    #[error("scheduler not initialized; call init() first")]
    NotInitialized,

    /// A worker panicked during a collective step.
    #[error("worker thread {0} panicked")]
    ThreadPanicked(usize),
}

impl SchedError {
    /// Returns `true` if the run cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SchedError::Integrator(_))
    }

    pub(crate) fn time_travel(what: &'static str, at: f64, now: f64) -> Self {
        SchedError::InvariantViolation { what, at, now }
    }
}

/// Convenience alias for `Result<T, SchedError>`.
pub type SchedResult<T> = Result<T, SchedError>;
