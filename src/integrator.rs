//! The continuous-time integrator collaborator.
//!
//! The scheduler never integrates anything itself. It drives an
//! [`Integrator`] through a narrow interface: take a step, interpolate
//! inside the last step, retreat to an earlier time inside the last step,
//! re-initialize after a discontinuity. Condition evaluation happens on
//! the scheduler side after every accepted step or init.
//!
//! [`EulerIntegrator`] is a reference implementation (explicit Euler with
//! linear dense output) over any set of [`CellModel`]s. It is exact for
//! linear ramps, which makes it handy for tests and demos.

use crate::error::IntegratorError;
use crate::ids::CellId;

// ── Traits ────────────────────────────────────────────────────────────

/// Right-hand side of one cell's ODE system.
pub trait CellModel: Send {
    /// Number of state variables.
    fn size(&self) -> usize;

    /// Fill `y` with the initial state.
    fn initial_state(&self, y: &mut [f64]);

    /// Compute `dy = f(t, y)`.
    fn derivatives(&self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), IntegratorError>;
}

/// Integrator interface consumed by the scheduler.
///
/// The integrator owns three times: `t0` and `tn` bracket the last step
/// taken, `t` is where the current state sits (`t0 <= t <= tn`).
pub trait Integrator: Send {
    /// Cells whose state this instance owns.
    fn cells(&self) -> &[CellId];

    fn t(&self) -> f64;
    fn t0(&self) -> f64;
    fn tn(&self) -> f64;

    /// Whether the next step must begin with [`Integrator::init`].
    fn needs_init(&self) -> bool;

    /// Mark the state as discontinuous (an event changed it).
    fn set_init_flag(&mut self);

    /// Load initial states and initialize at `t`.
    fn reset(&mut self, t: f64) -> Result<(), IntegratorError>;

    /// Re-initialize from the current state at `t`; afterwards
    /// `t0 == tn == t`.
    fn init(&mut self, t: f64) -> Result<(), IntegratorError>;

    /// Advance one step of at most `h` from `tn`.
    fn advance_one_step(&mut self, h: f64) -> Result<(), IntegratorError>;

    /// Move the state to `t` inside `[t0, tn]`.
    fn interpolate(&mut self, t: f64) -> Result<(), IntegratorError>;

    /// Move the current time back to `t` inside the last step, re-deriving
    /// a consistent state.
    fn retreat_to(&mut self, t: f64) -> Result<(), IntegratorError>;

    fn state(&self, cell: CellId) -> Option<&[f64]>;
    fn state_mut(&mut self, cell: CellId) -> Option<&mut [f64]>;

    /// Whether the state was initialized at the current time and no step
    /// has been taken since.
    fn freshly_initialized(&self) -> bool {
        self.t0() == self.tn()
    }
}

// ── Reference integrator ──────────────────────────────────────────────

/// Slack on `[t0, tn]` range checks.
const RANGE_EPS: f64 = 1e-9;

/// Explicit Euler over a set of cells, with linear interpolation inside a
/// step.
pub struct EulerIntegrator {
    cells: Vec<CellId>,
    models: Vec<Box<dyn CellModel>>,
    offsets: Vec<usize>,
    y: Vec<f64>,
    y0: Vec<f64>,
    yn: Vec<f64>,
    dy: Vec<f64>,
    t: f64,
    t0: f64,
    tn: f64,
    init_flag: bool,
}

impl EulerIntegrator {
    pub fn new(cells: Vec<(CellId, Box<dyn CellModel>)>) -> Self {
        let mut offsets = Vec::with_capacity(cells.len() + 1);
        let mut n = 0;
        let mut ids = Vec::with_capacity(cells.len());
        let mut models = Vec::with_capacity(cells.len());
        for (id, model) in cells {
            offsets.push(n);
            n += model.size();
            ids.push(id);
            models.push(model);
        }
        offsets.push(n);
        EulerIntegrator {
            cells: ids,
            models,
            offsets,
            y: vec![0.0; n],
            y0: vec![0.0; n],
            yn: vec![0.0; n],
            dy: vec![0.0; n],
            t: 0.0,
            t0: 0.0,
            tn: 0.0,
            init_flag: true,
        }
    }

    fn range(&self, cell: CellId) -> Option<std::ops::Range<usize>> {
        let i = self.cells.iter().position(|c| *c == cell)?;
        Some(self.offsets[i]..self.offsets[i + 1])
    }

    fn check_finite(&self, t: f64) -> Result<(), IntegratorError> {
        for (i, id) in self.cells.iter().enumerate() {
            let slice = &self.y[self.offsets[i]..self.offsets[i + 1]];
            if slice.iter().any(|v| !v.is_finite()) {
                return Err(IntegratorError::NonFinite { cell: id.raw(), t });
            }
        }
        Ok(())
    }

    fn check_range(&self, t: f64) -> Result<(), IntegratorError> {
        if t < self.t0 - RANGE_EPS || t > self.tn + RANGE_EPS {
            return Err(IntegratorError::OutOfRange {
                t,
                t0: self.t0,
                tn: self.tn,
            });
        }
        Ok(())
    }
}

impl Integrator for EulerIntegrator {
    fn cells(&self) -> &[CellId] {
        &self.cells
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn t0(&self) -> f64 {
        self.t0
    }

    fn tn(&self) -> f64 {
        self.tn
    }

    fn needs_init(&self) -> bool {
        self.init_flag
    }

    fn set_init_flag(&mut self) {
        self.init_flag = true;
    }

    fn reset(&mut self, t: f64) -> Result<(), IntegratorError> {
        for (i, model) in self.models.iter().enumerate() {
            model.initial_state(&mut self.y[self.offsets[i]..self.offsets[i + 1]]);
        }
        self.init(t)
    }

    fn init(&mut self, t: f64) -> Result<(), IntegratorError> {
        self.check_finite(t)?;
        self.t = t;
        self.t0 = t;
        self.tn = t;
        self.y0.copy_from_slice(&self.y);
        self.yn.copy_from_slice(&self.y);
        self.init_flag = false;
        Ok(())
    }

    fn advance_one_step(&mut self, h: f64) -> Result<(), IntegratorError> {
        if !(h > 0.0) {
            return Err(IntegratorError::StepRejected {
                t: self.t,
                reason: format!("non-positive step {}", h),
            });
        }
        // Steps always start from the end of the previous one.
        if self.t < self.tn {
            self.y.copy_from_slice(&self.yn);
            self.t = self.tn;
        }
        for (i, model) in self.models.iter().enumerate() {
            let r = self.offsets[i]..self.offsets[i + 1];
            model.derivatives(self.t, &self.y[r.clone()], &mut self.dy[r])?;
        }
        self.y0.copy_from_slice(&self.y);
        for (y, dy) in self.y.iter_mut().zip(&self.dy) {
            *y += h * dy;
        }
        let tn = self.t + h;
        self.check_finite(tn)?;
        self.yn.copy_from_slice(&self.y);
        self.t0 = self.t;
        self.tn = tn;
        self.t = tn;
        Ok(())
    }

    fn interpolate(&mut self, t: f64) -> Result<(), IntegratorError> {
        self.check_range(t)?;
        let t = t.clamp(self.t0, self.tn);
        let span = self.tn - self.t0;
        if span <= 0.0 {
            self.y.copy_from_slice(&self.yn);
        } else {
            let frac = (t - self.t0) / span;
            for ((y, a), b) in self.y.iter_mut().zip(&self.y0).zip(&self.yn) {
                *y = a + frac * (b - a);
            }
        }
        self.t = t;
        Ok(())
    }

    fn retreat_to(&mut self, t: f64) -> Result<(), IntegratorError> {
        // Linear dense output makes retreat and interpolation the same
        // operation.
        self.interpolate(t)
    }

    fn state(&self, cell: CellId) -> Option<&[f64]> {
        let r = self.range(cell)?;
        Some(&self.y[r])
    }

    fn state_mut(&mut self, cell: CellId) -> Option<&mut [f64]> {
        let r = self.range(cell)?;
        Some(&mut self.y[r])
    }
}

impl std::fmt::Debug for EulerIntegrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EulerIntegrator")
            .field("cells", &self.cells)
            .field("t0", &self.t0)
            .field("t", &self.t)
            .field("tn", &self.tn)
            .field("init_flag", &self.init_flag)
            .finish()
    }
}

// ── Built-in cell models ──────────────────────────────────────────────

/// `v' = slope`, starting at `v0`. One state variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampCell {
    pub v0: f64,
    pub slope: f64,
}

impl RampCell {
    pub fn new(v0: f64, slope: f64) -> Self {
        RampCell { v0, slope }
    }
}

impl CellModel for RampCell {
    fn size(&self) -> usize {
        1
    }

    fn initial_state(&self, y: &mut [f64]) {
        y[0] = self.v0;
    }

    fn derivatives(&self, _t: f64, _y: &[f64], dy: &mut [f64]) -> Result<(), IntegratorError> {
        dy[0] = self.slope;
        Ok(())
    }
}

/// Passive membrane with a constant injected drive:
/// `v' = (e_rest - v) / tau + drive`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyCell {
    pub e_rest: f64,
    pub tau: f64,
    pub drive: f64,
}

impl LeakyCell {
    pub fn new(e_rest: f64, tau: f64, drive: f64) -> Self {
        LeakyCell { e_rest, tau, drive }
    }
}

impl CellModel for LeakyCell {
    fn size(&self) -> usize {
        1
    }

    fn initial_state(&self, y: &mut [f64]) {
        y[0] = self.e_rest;
    }

    fn derivatives(&self, t: f64, y: &[f64], dy: &mut [f64]) -> Result<(), IntegratorError> {
        if !(self.tau > 0.0) {
            return Err(IntegratorError::StepRejected {
                t,
                reason: format!("tau must be positive, got {}", self.tau),
            });
        }
        dy[0] = (self.e_rest - y[0]) / self.tau + self.drive;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(v0: f64, slope: f64) -> EulerIntegrator {
        EulerIntegrator::new(vec![(
            CellId::new(0),
            Box::new(RampCell::new(v0, slope)) as Box<dyn CellModel>,
        )])
    }

    #[test]
    fn test_reset_loads_initial_state() {
        let mut it = ramp(-10.0, 1.0);
        it.reset(0.0).unwrap();
        assert_eq!(it.state(CellId::new(0)), Some(&[-10.0][..]));
        assert!(it.freshly_initialized());
        assert!(!it.needs_init());
    }

    #[test]
    fn test_step_and_interpolate() {
        let mut it = ramp(0.0, 2.0);
        it.reset(0.0).unwrap();
        it.advance_one_step(0.5).unwrap();
        assert_eq!((it.t0(), it.tn(), it.t()), (0.0, 0.5, 0.5));
        assert_eq!(it.state(CellId::new(0)).unwrap()[0], 1.0);
        it.interpolate(0.25).unwrap();
        assert_eq!(it.t(), 0.25);
        assert_eq!(it.state(CellId::new(0)).unwrap()[0], 0.5);
        assert!(!it.freshly_initialized());
    }

    #[test]
    fn test_interpolate_out_of_range() {
        let mut it = ramp(0.0, 1.0);
        it.reset(1.0).unwrap();
        it.advance_one_step(1.0).unwrap();
        let err = it.interpolate(0.5).unwrap_err();
        assert!(matches!(err, IntegratorError::OutOfRange { .. }));
    }

    #[test]
    fn test_step_after_interpolate_starts_at_tn() {
        let mut it = ramp(0.0, 1.0);
        it.reset(0.0).unwrap();
        it.advance_one_step(1.0).unwrap();
        it.interpolate(0.5).unwrap();
        it.advance_one_step(1.0).unwrap();
        assert_eq!((it.t0(), it.tn()), (1.0, 2.0));
        assert_eq!(it.state(CellId::new(0)).unwrap()[0], 2.0);
    }

    #[test]
    fn test_init_after_state_change() {
        let mut it = ramp(0.0, 1.0);
        it.reset(0.0).unwrap();
        it.advance_one_step(1.0).unwrap();
        it.retreat_to(0.5).unwrap();
        it.state_mut(CellId::new(0)).unwrap()[0] += 10.0;
        it.set_init_flag();
        assert!(it.needs_init());
        it.init(0.5).unwrap();
        assert_eq!((it.t0(), it.tn(), it.t()), (0.5, 0.5, 0.5));
        it.advance_one_step(0.5).unwrap();
        assert_eq!(it.state(CellId::new(0)).unwrap()[0], 11.0);
    }

    #[test]
    fn test_leaky_rejects_bad_tau() {
        let mut it = EulerIntegrator::new(vec![(
            CellId::new(3),
            Box::new(LeakyCell::new(-65.0, 0.0, 0.0)) as Box<dyn CellModel>,
        )]);
        it.reset(0.0).unwrap();
        assert!(matches!(
            it.advance_one_step(0.1),
            Err(IntegratorError::StepRejected { .. })
        ));
    }

    #[test]
    fn test_multiple_cells_have_separate_state() {
        let mut it = EulerIntegrator::new(vec![
            (CellId::new(0), Box::new(RampCell::new(0.0, 1.0)) as Box<dyn CellModel>),
            (CellId::new(5), Box::new(RampCell::new(100.0, -1.0))),
        ]);
        it.reset(0.0).unwrap();
        it.advance_one_step(2.0).unwrap();
        assert_eq!(it.state(CellId::new(0)).unwrap()[0], 2.0);
        assert_eq!(it.state(CellId::new(5)).unwrap()[0], 98.0);
        assert!(it.state(CellId::new(1)).is_none());
    }
}
