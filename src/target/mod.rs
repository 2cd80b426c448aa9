//! Event targets and the API their receive routines see.
//!
//! A target is whatever a connection, a self event or a watch ends at:
//! a synapse on a cell, an artificial cell, a probe. Targets never touch
//! queues directly; everything goes through the
//! [`ReceiveContext`](crate::context::ReceiveContext) they are handed.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`traits`] | [`Target`] trait + [`ReceiveContext`](crate::context::ReceiveContext) API |
//! | [`builtin`] | [`SpikeCounter`], [`RegularStim`], [`ExpSynapse`], [`WatchProbe`] |

pub mod builtin;
pub mod traits;

pub use builtin::{ExpSynapse, RegularStim, SpikeCounter, WatchProbe};
pub use traits::Target;

#[cfg(test)]
mod tests;
