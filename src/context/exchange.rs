//! Cross-process spike exchange.
//!
//! The scheduler never interprets the wire format. At each exchange
//! barrier the last arriving thread hands every spike recorded since the
//! previous barrier to a [`SpikeExchange`] and routes whatever comes back
//! through the matching input sources.

use std::collections::HashMap;

/// Opaque collective exchange, called once per barrier round.
pub trait SpikeExchange: Send {
    /// Publish `outgoing` `(time, gid)` spikes and collect the spikes other
    /// processes published, also as `(time, gid)`.
    fn exchange(&mut self, t: f64, outgoing: &[(f64, u32)]) -> Vec<(f64, u32)>;
}

/// A single-process stand-in that reflects selected output gids back as
/// input gids, as if a peer process re-published them.
#[derive(Debug, Clone, Default)]
pub struct Loopback {
    map: HashMap<u32, u32>,
    /// `(barrier time, spikes published)` per round.
    pub rounds: Vec<(f64, usize)>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflect output `from` back as input `to`.
    pub fn reflect(mut self, from: u32, to: u32) -> Self {
        self.map.insert(from, to);
        self
    }
}

impl SpikeExchange for Loopback {
    fn exchange(&mut self, t: f64, outgoing: &[(f64, u32)]) -> Vec<(f64, u32)> {
        self.rounds.push((t, outgoing.len()));
        outgoing
            .iter()
            .filter_map(|(ts, gid)| self.map.get(gid).map(|to| (*ts, *to)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_maps_only_known_gids() {
        let mut ex = Loopback::new().reflect(7, 70);
        let back = ex.exchange(5.0, &[(1.0, 7), (2.0, 8)]);
        assert_eq!(back, vec![(1.0, 70)]);
        assert_eq!(ex.rounds, vec![(5.0, 2)]);
    }
}
