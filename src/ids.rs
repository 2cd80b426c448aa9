//! Stable index identifiers for topology objects.
//!
//! Every object the scheduler refers to across threads or across a
//! checkpoint is named by its index in an arena owned by the
//! [`Topology`](crate::network::Topology). Topology is immutable for the
//! lifetime of a [`Scheduler`](crate::scheduler::Scheduler), so a plain
//! index is enough; transient objects (queue items, self events) use
//! generational [`PoolKey`](crate::pool::PoolKey)s instead.

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub fn new(raw: u32) -> Self {
                $name(raw)
            }

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_id!(
    /// A threshold source (spike generator).
    SourceId,
    "S"
);
index_id!(
    /// A weighted, delayed link from a source to a target.
    ConnectionId,
    "C"
);
index_id!(
    /// An event receiver (synapse, artificial cell, ...).
    TargetId,
    "T"
);
index_id!(
    /// A cell whose continuous state is owned by an integrator.
    CellId,
    "cell"
);
index_id!(
    /// A per-target watched predicate.
    WatchId,
    "W"
);
index_id!(
    /// A play or sampling recorder.
    RecorderId,
    "R"
);
index_id!(
    /// A registered statement callback.
    StatementId,
    "stmt"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(SourceId::new(3).to_string(), "S3");
        assert_eq!(ConnectionId::new(0).to_string(), "C0");
        assert_eq!(CellId::new(7).to_string(), "cell7");
    }

    #[test]
    fn test_index_round_trip() {
        let id = TargetId::new(42);
        assert_eq!(id.index(), 42);
        assert_eq!(TargetId::new(id.raw()), id);
    }
}
