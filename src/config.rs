//! Configuration for a scheduler run.

use crate::error::{SchedError, SchedResult};

/// Solve strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    /// Every thread advances in lockstep steps of `dt`.
    #[default]
    Fixed,
    /// One integrator over all cells; events are delivered serially in
    /// global time order.
    GlobalVariable,
    /// One integrator per cell; each thread advances its earliest cell.
    LocalVariable,
}

impl Method {
    pub fn is_variable(self) -> bool {
        !matches!(self, Method::Fixed)
    }
}

impl std::str::FromStr for Method {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Method::Fixed),
            "global" | "cvode" => Ok(Method::GlobalVariable),
            "local" | "lvardt" => Ok(Method::LocalVariable),
            other => Err(SchedError::InvalidConfig(format!("unknown method '{}'", other))),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Method::Fixed => "fixed",
            Method::GlobalVariable => "global",
            Method::LocalVariable => "local",
        })
    }
}

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Solve strategy.
    pub method: Method,

    /// Fixed step width; also the largest internal step the reference
    /// integrator takes under the variable-step methods.
    pub dt: f64,

    /// Number of worker threads.
    pub threads: usize,

    /// Route fixed-step connection sends through the bin ring.
    pub bin_queue: bool,

    /// Number of bins in the ring.
    pub bin_count: usize,

    /// Offset added to a fixed-step crossing time.
    pub threshold_epsilon: f64,

    /// Tolerance when deciding whether a watch is already true at activation.
    pub watch_epsilon: f64,

    /// Minimum cross-process delay; enables barrier rounds for spike
    /// exchange even with one thread.
    pub spike_exchange_interval: Option<f64>,

    /// Keep a per-thread delivery trace.
    pub trace_deliveries: bool,

    /// Growth block of the self-event pool.
    pub pool_block: usize,
}

impl SchedulerConfig {
    /// Create a configuration for `method` with default knobs.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            dt: 0.025,
            threads: 1,
            bin_queue: false,
            bin_count: 1000,
            threshold_epsilon: 1e-10,
            watch_epsilon: 1e-11,
            spike_exchange_interval: None,
            trace_deliveries: false,
            pool_block: 1000,
        }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enable the bin ring with `bin_count` bins.
    pub fn with_bin_queue(mut self, bin_count: usize) -> Self {
        self.bin_queue = true;
        self.bin_count = bin_count;
        self
    }

    pub fn with_spike_exchange_interval(mut self, interval: f64) -> Self {
        self.spike_exchange_interval = Some(interval);
        self
    }

    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace_deliveries = on;
        self
    }

    pub fn with_threshold_epsilon(mut self, eps: f64) -> Self {
        self.threshold_epsilon = eps;
        self
    }

    /// Check that every knob is usable.
    pub fn validate(&self) -> SchedResult<()> {
        if !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(SchedError::InvalidConfig(format!("dt must be positive, got {}", self.dt)));
        }
        if self.threads == 0 {
            return Err(SchedError::InvalidConfig("need at least one thread".into()));
        }
        if self.bin_queue && self.bin_count == 0 {
            return Err(SchedError::InvalidConfig("bin queue needs at least one bin".into()));
        }
        if self.bin_queue && self.method.is_variable() {
            return Err(SchedError::InvalidConfig(
                "the bin queue only applies to the fixed-step method".into(),
            ));
        }
        if self.threshold_epsilon < 0.0 || self.watch_epsilon < 0.0 {
            return Err(SchedError::InvalidConfig("epsilons must be non-negative".into()));
        }
        if let Some(interval) = self.spike_exchange_interval {
            if !(interval > 0.0) {
                return Err(SchedError::InvalidConfig(format!(
                    "spike exchange interval must be positive, got {}",
                    interval
                )));
            }
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(Method::Fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let c = SchedulerConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.method, Method::Fixed);
        assert_eq!(c.bin_count, 1000);
    }

    #[test]
    fn test_builder_chain() {
        let c = SchedulerConfig::new(Method::LocalVariable)
            .with_threads(4)
            .with_dt(0.1)
            .with_trace(true);
        assert_eq!(c.threads, 4);
        assert_eq!(c.dt, 0.1);
        assert!(c.trace_deliveries);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(SchedulerConfig::default().with_dt(0.0).validate().is_err());
        assert!(SchedulerConfig::default().with_threads(0).validate().is_err());
        assert!(SchedulerConfig::new(Method::GlobalVariable)
            .with_bin_queue(10)
            .validate()
            .is_err());
        assert!(SchedulerConfig::default()
            .with_spike_exchange_interval(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("local".parse::<Method>().ok(), Some(Method::LocalVariable));
        assert_eq!("cvode".parse::<Method>().ok(), Some(Method::GlobalVariable));
        assert!("rk4".parse::<Method>().is_err());
        assert_eq!(Method::Fixed.to_string(), "fixed");
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn test_json_round_trip() {
        let c = SchedulerConfig::new(Method::GlobalVariable).with_threads(2);
        let s = serde_json::to_string(&c).unwrap();
        let back: SchedulerConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, c);
    }
}
