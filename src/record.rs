//! Continuous-value recording ticks.
//!
//! A recorder is driven by [`Event::PlayRecord`](crate::event::Event)
//! occurrences. Each tick either plays the next value of a sequence into a
//! state variable ([`RecorderKind::Play`]) or samples a state variable
//! ([`RecorderKind::Sample`]), then reports when the next tick is due. A
//! recorder that runs off the end of its schedule simply stops re-arming.

use tracing::warn;

use crate::network::{RecorderKind, RecorderSpec, SampleSchedule};

/// Slack when comparing a tick time against a sampling limit.
const TIME_EPS: f64 = 1e-9;

/// Per-run state of one recorder.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Recorder {
    /// Position in the schedule of the next tick.
    pub index: usize,
    /// Start of the run, the origin of interval schedules.
    pub t0: f64,
    /// `(t, value)` pairs collected by a sampler.
    pub samples: Vec<(f64, f64)>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a run starting at `t0`; returns the first tick time.
    pub fn start(&mut self, spec: &RecorderSpec, t0: f64) -> Option<f64> {
        self.index = 0;
        self.t0 = t0;
        self.samples.clear();
        match &spec.kind {
            RecorderKind::Play { times, .. } => {
                let first = *times.first()?;
                if first < t0 {
                    warn!(first, t0, "play sequence starts before the run; early entries play at init");
                }
                Some(first.max(t0))
            }
            RecorderKind::Sample { schedule, .. } => {
                if let SampleSchedule::Times(times) = schedule {
                    while times.get(self.index).is_some_and(|t| *t < t0 - TIME_EPS) {
                        self.index += 1;
                    }
                }
                self.due(spec)
            }
        }
    }

    /// Time of tick number `self.index`, if the schedule has one.
    pub fn due(&self, spec: &RecorderSpec) -> Option<f64> {
        match &spec.kind {
            RecorderKind::Play { times, .. } => times.get(self.index).map(|t| t.max(self.t0)),
            RecorderKind::Sample { schedule, .. } => match schedule {
                SampleSchedule::Interval { interval, until } => {
                    let t = self.t0 + self.index as f64 * interval;
                    match until {
                        Some(end) if t > end + TIME_EPS => None,
                        _ => Some(t),
                    }
                }
                SampleSchedule::Times(times) => times.get(self.index).copied(),
            },
        }
    }

    /// Perform the tick at `t` against the owning cell's `state`. Returns
    /// the next tick time, or `None` once the schedule is exhausted.
    pub fn tick(&mut self, spec: &RecorderSpec, t: f64, state: &mut [f64]) -> Option<f64> {
        match &spec.kind {
            RecorderKind::Play { var, values, .. } => {
                if let (Some(v), Some(slot)) = (values.get(self.index), state.get_mut(*var)) {
                    *slot = *v;
                }
            }
            RecorderKind::Sample { var, .. } => {
                let value = state.get(*var).copied().unwrap_or(f64::NAN);
                self.samples.push((t, value));
            }
        }
        self.index += 1;
        self.due(spec)
    }

    /// Whether ticks write into the cell state.
    pub fn is_play(spec: &RecorderSpec) -> bool {
        matches!(spec.kind, RecorderKind::Play { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CellId;

    fn spec(kind: RecorderKind) -> RecorderSpec {
        RecorderSpec {
            cell: CellId::new(0),
            thread: 0,
            kind,
        }
    }

    #[test]
    fn test_play_steps_through_values_then_stops() {
        let s = spec(RecorderKind::Play {
            var: 0,
            times: vec![1.0, 2.0, 4.0],
            values: vec![10.0, 20.0, 40.0],
        });
        let mut r = Recorder::new();
        let mut y = [0.0];
        assert_eq!(r.start(&s, 0.0), Some(1.0));
        assert_eq!(r.tick(&s, 1.0, &mut y), Some(2.0));
        assert_eq!(y[0], 10.0);
        assert_eq!(r.tick(&s, 2.0, &mut y), Some(4.0));
        assert_eq!(r.tick(&s, 4.0, &mut y), None);
        assert_eq!(y[0], 40.0);
    }

    #[test]
    fn test_play_before_start_is_clamped() {
        let s = spec(RecorderKind::Play {
            var: 0,
            times: vec![-1.0, 3.0],
            values: vec![1.0, 2.0],
        });
        let mut r = Recorder::new();
        assert_eq!(r.start(&s, 0.0), Some(0.0));
    }

    #[test]
    fn test_sample_interval_until() {
        let s = spec(RecorderKind::Sample {
            var: 0,
            schedule: SampleSchedule::Interval {
                interval: 0.5,
                until: Some(1.0),
            },
        });
        let mut r = Recorder::new();
        let mut y = [7.0];
        let mut t = r.start(&s, 0.0);
        let mut n = 0;
        while let Some(now) = t {
            t = r.tick(&s, now, &mut y);
            n += 1;
        }
        assert_eq!(n, 3);
        assert_eq!(r.samples, vec![(0.0, 7.0), (0.5, 7.0), (1.0, 7.0)]);
    }

    #[test]
    fn test_sample_times_exhaust() {
        let s = spec(RecorderKind::Sample {
            var: 0,
            schedule: SampleSchedule::Times(vec![0.5, 1.5]),
        });
        let mut r = Recorder::new();
        let mut y = [1.0];
        assert_eq!(r.start(&s, 0.0), Some(0.5));
        assert_eq!(r.tick(&s, 0.5, &mut y), Some(1.5));
        assert_eq!(r.tick(&s, 1.5, &mut y), None);
        assert_eq!(r.samples.len(), 2);
    }
}
