//! Hamiltonian state and leapfrog integration.

use crate::error::Result;
use crate::model::LogDensity;

/// Phase-space state of one chain: position, momentum, and the cached
/// potential (negative log density) with its gradient.
#[derive(Debug, Clone)]
pub struct HmcState {
    pub q: Vec<f64>,
    pub p: Vec<f64>,
    pub potential: f64,
    pub grad_potential: Vec<f64>,
}

impl HmcState {
    /// Total energy H = U(q) + 0.5 * p' M^-1 p with diagonal inverse mass.
    pub fn hamiltonian(&self, inv_mass: &[f64]) -> f64 {
        let kinetic: f64 = self
            .p
            .iter()
            .zip(inv_mass)
            .map(|(&p, &m)| 0.5 * p * p * m)
            .sum();
        self.potential + kinetic
    }
}

/// Leapfrog integrator over a target density with diagonal inverse mass.
pub struct LeapfrogIntegrator<'a, M: LogDensity + ?Sized> {
    target: &'a M,
    step_size: f64,
    inv_mass: Vec<f64>,
}

impl<'a, M: LogDensity + ?Sized> LeapfrogIntegrator<'a, M> {
    pub fn new(target: &'a M, step_size: f64, inv_mass: Vec<f64>) -> Self {
        Self {
            target,
            step_size,
            inv_mass,
        }
    }

    /// Evaluate the target at `q` and wrap it in a state with zero momentum.
    pub fn init_state(&self, q: Vec<f64>) -> Result<HmcState> {
        let (potential, grad_potential) = self.target.nll_grad(&q)?;
        let p = vec![0.0; q.len()];
        Ok(HmcState {
            q,
            p,
            potential,
            grad_potential,
        })
    }

    /// One leapfrog step of size `direction * step_size` in place.
    pub fn step_dir(&self, state: &mut HmcState, direction: i32) -> Result<()> {
        let eps = self.step_size * direction as f64;
        let half = 0.5 * eps;

        for (p, g) in state.p.iter_mut().zip(&state.grad_potential) {
            *p -= half * g;
        }
        for ((q, &p), &m) in state.q.iter_mut().zip(&state.p).zip(&self.inv_mass) {
            *q += eps * p * m;
        }
        let (potential, grad_potential) = self.target.nll_grad(&state.q)?;
        state.potential = potential;
        state.grad_potential = grad_potential;
        for (p, g) in state.p.iter_mut().zip(&state.grad_potential) {
            *p -= half * g;
        }
        Ok(())
    }
}
