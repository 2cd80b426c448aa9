//! Integrator instances owned by one thread (or, under the global method,
//! by the whole scheduler).

use std::collections::HashMap;

use crate::error::IntegratorError;
use crate::ids::CellId;
use crate::integrator::Integrator;
use crate::queue::{QueueHandle, TimeQueue};

/// What [`SolverSet::handle_step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Re-initialized after a discontinuity; conditions see a fresh state.
    Inited,
    /// Moved inside the last step; nothing new to evaluate.
    Interpolated,
    /// Took a new step.
    Stepped,
}

/// A set of integrators with an index from cell to instance.
///
/// Under the local method every cell has its own instance and a
/// `TimeQueue<usize>` orders the instances by their current time, so the
/// driver can always advance the one that is furthest behind.
pub struct SolverSet {
    integrators: Vec<Box<dyn Integrator>>,
    cells: HashMap<CellId, usize>,
    order: Option<TimeQueue<usize>>,
    handles: Vec<Option<QueueHandle>>,
    dt: f64,
}

impl SolverSet {
    pub fn new(integrators: Vec<Box<dyn Integrator>>, ordered: bool, dt: f64) -> Self {
        let mut cells = HashMap::new();
        for (i, integ) in integrators.iter().enumerate() {
            for cell in integ.cells() {
                cells.insert(*cell, i);
            }
        }
        let handles = vec![None; integrators.len()];
        SolverSet {
            integrators,
            cells,
            order: ordered.then(TimeQueue::new),
            handles,
            dt,
        }
    }

    /// A set with no integrators, for threads that own no cells.
    pub fn empty(dt: f64) -> Self {
        Self::new(Vec::new(), false, dt)
    }

    pub fn len(&self) -> usize {
        self.integrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrators.is_empty()
    }

    pub fn integrator(&self, i: usize) -> Option<&dyn Integrator> {
        self.integrators.get(i).map(|b| b.as_ref())
    }

    /// Index of the instance integrating `cell`.
    pub fn integrator_of(&self, cell: CellId) -> Option<usize> {
        self.cells.get(&cell).copied()
    }

    pub fn owns(&self, cell: CellId) -> bool {
        self.cells.contains_key(&cell)
    }

    pub fn state(&self, cell: CellId) -> Option<&[f64]> {
        let i = self.integrator_of(cell)?;
        self.integrators[i].state(cell)
    }

    pub fn state_mut(&mut self, cell: CellId) -> Option<&mut [f64]> {
        let i = self.integrator_of(cell)?;
        self.integrators[i].state_mut(cell)
    }

    /// Current time of instance `i`.
    pub fn time_of(&self, i: usize) -> f64 {
        self.integrators.get(i).map_or(f64::INFINITY, |g| g.t())
    }

    /// Earliest instance and its time.
    pub fn least(&self) -> Option<(usize, f64)> {
        match &self.order {
            Some(q) => q.peek().map(|(t, i)| (*i, t)),
            None => self
                .integrators
                .iter()
                .enumerate()
                .map(|(i, g)| (i, g.t()))
                .min_by(|a, b| a.1.total_cmp(&b.1)),
        }
    }

    /// Time of the earliest instance, `f64::INFINITY` without integrators.
    pub fn least_time(&self) -> f64 {
        self.least().map_or(f64::INFINITY, |(_, t)| t)
    }

    /// Re-key instance `i` after its time changed.
    fn resync(&mut self, i: usize) {
        let t = self.integrators[i].t();
        let Some(order) = self.order.as_mut() else { return };
        match self.handles[i] {
            Some(h) if order.move_to(h, t) => {}
            _ => self.handles[i] = Some(order.insert(t, i)),
        }
    }

    /// Load initial states everywhere and initialize at `t`.
    pub fn reset(&mut self, t: f64) -> Result<(), IntegratorError> {
        if let Some(order) = self.order.as_mut() {
            order.clear();
        }
        self.handles.iter_mut().for_each(|h| *h = None);
        for i in 0..self.integrators.len() {
            self.integrators[i].reset(t)?;
            self.resync(i);
        }
        Ok(())
    }

    /// Re-initialize every instance at `t` from its current state.
    pub fn reinit(&mut self, t: f64) -> Result<(), IntegratorError> {
        for i in 0..self.integrators.len() {
            self.integrators[i].init(t)?;
            self.resync(i);
        }
        Ok(())
    }

    /// Bring the instance owning `cell` to `t` before an event touches it.
    ///
    /// An instance ahead of `t` retreats inside its last step. With
    /// `discontinuous` the state is about to change, so the instance must
    /// re-initialize before its next step. Returns `false` if no instance
    /// owns `cell`.
    pub fn bring_to(&mut self, cell: CellId, t: f64, discontinuous: bool) -> Result<bool, IntegratorError> {
        let Some(i) = self.integrator_of(cell) else {
            return Ok(false);
        };
        let integ = &mut self.integrators[i];
        if integ.t() > t {
            integ.retreat_to(t)?;
        }
        if discontinuous {
            integ.set_init_flag();
        }
        self.resync(i);
        Ok(true)
    }

    /// Move every instance to `t` inside its last step.
    pub fn interpolate_all(&mut self, t: f64) -> Result<(), IntegratorError> {
        for i in 0..self.integrators.len() {
            let integ = &mut self.integrators[i];
            if integ.t() != t {
                integ.interpolate(t)?;
            }
            self.resync(i);
        }
        Ok(())
    }

    /// Leave every instance at `tout` if its last step covers it.
    pub fn settle_at(&mut self, tout: f64) -> Result<(), IntegratorError> {
        for i in 0..self.integrators.len() {
            let integ = &mut self.integrators[i];
            if integ.t() > tout && integ.t0() <= tout {
                integ.interpolate(tout)?;
            }
            self.resync(i);
        }
        Ok(())
    }

    /// One unit of work for instance `i`, never skipping past the next
    /// pending event time `te`:
    ///
    /// 1. re-initialize if an event made the state discontinuous,
    /// 2. else interpolate to `te` if the last step already covers it,
    /// 3. else finish the last step if the state sits inside it,
    /// 4. else take a new step of at most `dt`.
    pub fn handle_step(&mut self, i: usize, te: f64) -> Result<StepKind, IntegratorError> {
        let dt = self.dt;
        let integ = &mut self.integrators[i];
        let kind = if integ.needs_init() {
            let t = integ.t();
            integ.init(t)?;
            StepKind::Inited
        } else if te <= integ.tn() {
            integ.interpolate(te.max(integ.t()))?;
            StepKind::Interpolated
        } else if integ.t() < integ.tn() {
            let tn = integ.tn();
            integ.interpolate(tn)?;
            StepKind::Interpolated
        } else {
            integ.advance_one_step(dt)?;
            StepKind::Stepped
        };
        self.resync(i);
        Ok(kind)
    }

    /// Whether any instance needs an init.
    pub fn any_needs_init(&self) -> bool {
        self.integrators.iter().any(|g| g.needs_init())
    }

    /// Advance every instance in lockstep by one unit of work, as a single
    /// integrator would. Returns the step kind of the first instance.
    pub fn handle_step_all(&mut self, te: f64) -> Result<StepKind, IntegratorError> {
        if self.any_needs_init() {
            for integ in self.integrators.iter_mut() {
                integ.set_init_flag();
            }
        }
        let mut kind = StepKind::Interpolated;
        for i in 0..self.integrators.len() {
            let k = self.handle_step(i, te)?;
            if i == 0 {
                kind = k;
            }
        }
        Ok(kind)
    }

    /// Fixed-step advance: init where needed, then step every instance by
    /// `dt`.
    pub fn fixed_step(&mut self) -> Result<(), IntegratorError> {
        let dt = self.dt;
        for integ in self.integrators.iter_mut() {
            if integ.needs_init() {
                let t = integ.t();
                integ.init(t)?;
            }
            integ.advance_one_step(dt)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SolverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverSet")
            .field("integrators", &self.integrators.len())
            .field("least", &self.least())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::{CellModel, EulerIntegrator, RampCell};

    fn per_cell(slopes: &[f64]) -> SolverSet {
        let integs: Vec<Box<dyn Integrator>> = slopes
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let cells = vec![(CellId::new(i as u32), Box::new(RampCell::new(0.0, *s)) as Box<dyn CellModel>)];
                Box::new(EulerIntegrator::new(cells)) as Box<dyn Integrator>
            })
            .collect();
        SolverSet::new(integs, true, 1.0)
    }

    #[test]
    fn test_least_follows_steps() {
        let mut s = per_cell(&[1.0, 1.0]);
        s.reset(0.0).unwrap();
        assert_eq!(s.least_time(), 0.0);
        let (i, _) = s.least().unwrap();
        assert_eq!(s.handle_step(i, f64::INFINITY).unwrap(), StepKind::Stepped);
        let (j, t) = s.least().unwrap();
        assert_ne!(i, j);
        assert_eq!(t, 0.0);
        s.handle_step(j, f64::INFINITY).unwrap();
        assert_eq!(s.least_time(), 1.0);
    }

    #[test]
    fn test_handle_step_interpolates_to_event() {
        let mut s = per_cell(&[2.0]);
        s.reset(0.0).unwrap();
        s.handle_step(0, f64::INFINITY).unwrap();
        // Event at 0.5 inside [0, 1]: retreat there, mark discontinuous.
        s.bring_to(CellId::new(0), 0.5, true).unwrap();
        assert_eq!(s.state(CellId::new(0)).unwrap()[0], 1.0);
        assert_eq!(s.handle_step(0, f64::INFINITY).unwrap(), StepKind::Inited);
        assert_eq!(s.time_of(0), 0.5);
        assert_eq!(s.handle_step(0, f64::INFINITY).unwrap(), StepKind::Stepped);
        assert_eq!(s.time_of(0), 1.5);
        // A sample at 0.75 moves the state without a discontinuity.
        s.bring_to(CellId::new(0), 0.75, false).unwrap();
        assert_eq!(s.handle_step(0, 1.0).unwrap(), StepKind::Interpolated);
        assert_eq!(s.time_of(0), 1.0);
        assert_eq!(s.handle_step(0, f64::INFINITY).unwrap(), StepKind::Interpolated);
        assert_eq!(s.time_of(0), 1.5);
    }

    #[test]
    fn test_bring_to_unknown_cell() {
        let mut s = per_cell(&[1.0]);
        s.reset(0.0).unwrap();
        assert!(!s.bring_to(CellId::new(9), 0.0, true).unwrap());
    }

    #[test]
    fn test_settle_at() {
        let mut s = per_cell(&[1.0]);
        s.reset(0.0).unwrap();
        s.handle_step(0, f64::INFINITY).unwrap();
        s.settle_at(0.25).unwrap();
        assert_eq!(s.time_of(0), 0.25);
        assert_eq!(s.state(CellId::new(0)).unwrap()[0], 0.25);
    }

    #[test]
    fn test_empty_set() {
        let s = SolverSet::empty(0.1);
        assert!(s.is_empty());
        assert_eq!(s.least_time(), f64::INFINITY);
    }
}
