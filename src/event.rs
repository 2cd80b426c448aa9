//! Discrete event kinds.
//!
//! Every queued occurrence is an [`Event`]: a small `Copy` value naming the
//! object it concerns by stable id or pool key. The queue never owns the
//! object itself; persistent objects (connections, sources, watches,
//! recorders, statements) live in the topology or the thread context, and
//! transient self events live in the thread's pool.
//!
//! Send and deliver for each kind are implemented on the thread context in
//! [`crate::context`]; this module only defines the variants, their
//! same-time priority, and their diagnostic description.

use crate::ids::{ConnectionId, RecorderId, SourceId, StatementId, WatchId};
use crate::pool::PoolKey;
use crate::queue::QueuePriority;

// ── Event kind ────────────────────────────────────────────────────────

/// Kind tag of an [`Event`], used for priorities, statistics and
/// checkpoint records.
///
/// Declaration order is delivery order among same-time events: a played
/// value is in place before anything observes it, threshold crossings fan
/// out before the connections they produce, and a barrier is only
/// satisfied once every other same-time event has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    PlayRecord,
    Threshold,
    Fanout,
    Connection,
    SelfEvent,
    Watch,
    Statement,
    Barrier,
}

impl EventKind {
    /// Number of kinds.
    pub const COUNT: usize = 8;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::PlayRecord,
        EventKind::Threshold,
        EventKind::Fanout,
        EventKind::Connection,
        EventKind::SelfEvent,
        EventKind::Watch,
        EventKind::Statement,
        EventKind::Barrier,
    ];

    /// Same-time rank; lower is delivered first.
    #[inline]
    pub fn priority(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name, also used as the checkpoint tag.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::PlayRecord => "play",
            EventKind::Threshold => "threshold",
            EventKind::Fanout => "fanout",
            EventKind::Connection => "connection",
            EventKind::SelfEvent => "self",
            EventKind::Watch => "watch",
            EventKind::Statement => "statement",
            EventKind::Barrier => "barrier",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A queued occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Deliver a connection's weights to its target.
    Connection(ConnectionId),
    /// A target calling itself back; the key names a pooled [`SelfEvent`].
    SelfEvent(PoolKey),
    /// An interpolated threshold crossing of a source, not yet sent.
    Threshold(SourceId),
    /// Aggregated min-delay delivery of a source's fan-out on one thread.
    Fanout(SourceId),
    /// A watched predicate became true.
    Watch(WatchId),
    /// Cross-thread synchronization point.
    Barrier,
    /// A registered statement is due.
    Statement(StatementId),
    /// A recorder's next play/sample tick.
    PlayRecord(RecorderId),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connection(_) => EventKind::Connection,
            Event::SelfEvent(_) => EventKind::SelfEvent,
            Event::Threshold(_) => EventKind::Threshold,
            Event::Fanout(_) => EventKind::Fanout,
            Event::Watch(_) => EventKind::Watch,
            Event::Barrier => EventKind::Barrier,
            Event::Statement(_) => EventKind::Statement,
            Event::PlayRecord(_) => EventKind::PlayRecord,
        }
    }

    /// Diagnostic one-liner, as printed by the delivery trace.
    pub fn pr(&self, label: &str, t: f64) -> String {
        format!("{} {} {}", label, t, self)
    }
}

impl QueuePriority for Event {
    fn priority(&self) -> u8 {
        self.kind().priority()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Connection(c) => write!(f, "connection {}", c),
            Event::SelfEvent(k) => write!(f, "self {}", k),
            Event::Threshold(s) => write!(f, "threshold {}", s),
            Event::Fanout(s) => write!(f, "fanout {}", s),
            Event::Watch(w) => write!(f, "watch {}", w),
            Event::Barrier => f.write_str("barrier"),
            Event::Statement(s) => write!(f, "statement {}", s),
            Event::PlayRecord(r) => write!(f, "play {}", r),
        }
    }
}

// ── Self event ────────────────────────────────────────────────────────

/// Pool-resident payload of a [`Event::SelfEvent`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfEvent {
    pub target: crate::ids::TargetId,
    pub flag: f64,
    /// Connection whose weights the target was handling when it sent this.
    pub weights: Option<ConnectionId>,
}

impl SelfEvent {
    /// Flag value that marks the occurrence as movable.
    pub const MOVABLE_FLAG: f64 = 1.0;

    pub fn is_movable(&self) -> bool {
        self.flag == Self::MOVABLE_FLAG
    }
}
