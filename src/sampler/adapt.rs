//! Warm-up adaptation: step size and diagonal mass matrix.
//!
//! Each chain owns one `WindowedAdaptation` value, so adaptation state is
//! explicit and fully reproducible from the chain seed; nothing is shared
//! between chains.

use crate::model::LogDensity;
use crate::sampler::hmc::LeapfrogIntegrator;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Heuristic search for an initial step size (Hoffman & Gelman 2014, Alg. 4):
/// double or halve until one leapfrog step crosses 50% acceptance.
pub fn find_reasonable_step_size<M: LogDensity + ?Sized, R: Rng + ?Sized>(
    target: &M,
    q: &[f64],
    inv_mass: &[f64],
    rng: &mut R,
) -> f64 {
    let mut eps = 1.0;

    let integrator = LeapfrogIntegrator::new(target, eps, inv_mass.to_vec());
    let mut state = match integrator.init_state(q.to_vec()) {
        Ok(s) => s,
        Err(_) => return 0.1,
    };
    for (p, &m) in state.p.iter_mut().zip(inv_mass) {
        let z: f64 = StandardNormal.sample(rng);
        *p = z / m.sqrt();
    }
    let h0 = state.hamiltonian(inv_mass);

    let log_accept = |eps: f64| -> Option<f64> {
        let integrator = LeapfrogIntegrator::new(target, eps, inv_mass.to_vec());
        let mut trial = state.clone();
        integrator.step_dir(&mut trial, 1).ok()?;
        let h = trial.hamiltonian(inv_mass);
        if h.is_finite() {
            Some(h0 - h)
        } else {
            None
        }
    };

    let first = match log_accept(eps) {
        Some(a) => a,
        None => return 0.1,
    };
    // direction: +1 doubles while acceptance is high, -1 halves while low.
    let dir: f64 = if first > (0.5f64).ln() { 1.0 } else { -1.0 };

    for _ in 0..50 {
        let accept = match log_accept(eps) {
            Some(a) => a,
            None => break,
        };
        if dir * accept <= dir * (0.5f64).ln() {
            break;
        }
        eps *= (2.0f64).powf(dir);
    }

    eps.clamp(1e-10, 1e2)
}

/// Dual-averaging step-size adaptation (Nesterov primal averaging as used
/// in NUTS), driving the mean acceptance probability to `target`.
#[derive(Debug, Clone)]
pub struct DualAveraging {
    mu: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    target: f64,
    counter: usize,
}

impl DualAveraging {
    pub fn new(init_step_size: f64, target: f64) -> Self {
        Self {
            mu: (10.0 * init_step_size).ln(),
            log_eps: init_step_size.ln(),
            log_eps_bar: 0.0,
            h_bar: 0.0,
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            target,
            counter: 0,
        }
    }

    /// Step size to use for the next transition.
    pub fn current(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Averaged step size to freeze after warm-up.
    pub fn adapted(&self) -> f64 {
        if self.counter == 0 {
            self.current()
        } else {
            self.log_eps_bar.exp()
        }
    }

    /// Update with the mean acceptance probability of one transition.
    pub fn update(&mut self, accept_prob: f64) {
        self.counter += 1;
        let m = self.counter as f64;
        let eta = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.target - accept_prob);
        self.log_eps = self.mu - m.sqrt() / self.gamma * self.h_bar;
        let weight = m.powf(-self.kappa);
        self.log_eps_bar = weight * self.log_eps + (1.0 - weight) * self.log_eps_bar;
    }
}

/// Running variance accumulator (Welford).
#[derive(Debug, Clone)]
struct RunningVariance {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningVariance {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn push(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..x.len() {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (x[i] - self.mean[i]);
        }
    }

    /// Regularized sample variance, shrunk toward unit scale the way Stan
    /// regularizes its diagonal metric.
    fn regularized_variance(&self) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        Some(
            self.m2
                .iter()
                .map(|&m2| {
                    let var = m2 / (n - 1.0);
                    (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
                })
                .collect(),
        )
    }
}

/// Windowed warm-up schedule: a fast initial buffer adapting only the step
/// size, doubling slow windows estimating the diagonal metric, and a fast
/// terminal buffer re-settling the step size on the final metric.
#[derive(Debug, Clone)]
pub struct WindowedAdaptation {
    step: DualAveraging,
    inv_mass: Vec<f64>,
    n_warmup: usize,
    init_buffer: usize,
    term_start: usize,
    window_end: usize,
    window_size: usize,
    variance: RunningVariance,
}

impl WindowedAdaptation {
    pub fn new(dim: usize, n_warmup: usize, target_accept: f64, init_step_size: f64) -> Self {
        // Stan's default buffers, scaled down proportionally when the
        // warm-up is too short to hold them.
        let (init_buffer, term_buffer, base_window) = if n_warmup >= 150 {
            (75, 50, 25)
        } else {
            let init = (n_warmup * 15 / 100).max(1);
            let term = (n_warmup * 10 / 100).max(1);
            let base = n_warmup.saturating_sub(init + term).max(1);
            (init, term, base)
        };
        let term_start = n_warmup.saturating_sub(term_buffer);
        let window_end = (init_buffer + base_window).min(term_start);

        Self {
            step: DualAveraging::new(init_step_size, target_accept),
            inv_mass: vec![1.0; dim],
            n_warmup,
            init_buffer,
            term_start,
            window_end,
            window_size: base_window,
            variance: RunningVariance::new(dim),
        }
    }

    /// Step size for the next transition.
    pub fn step_size(&self) -> f64 {
        self.step.current()
    }

    /// Current diagonal inverse mass estimate.
    pub fn inv_mass_diag(&self) -> &[f64] {
        &self.inv_mass
    }

    /// Step size to use after warm-up.
    pub fn adapted_step_size(&self) -> f64 {
        self.step.adapted()
    }

    /// Record one warm-up transition.
    pub fn update(&mut self, iter: usize, q: &[f64], accept_prob: f64) {
        if iter >= self.n_warmup {
            return;
        }
        self.step.update(accept_prob);

        let in_slow_window = iter >= self.init_buffer && iter < self.term_start;
        if !in_slow_window {
            return;
        }
        self.variance.push(q);

        if iter + 1 == self.window_end {
            if let Some(var) = self.variance.regularized_variance() {
                // Inverse mass = posterior variance estimate.
                self.inv_mass = var;
            }
            self.variance = RunningVariance::new(self.inv_mass.len());
            self.window_size *= 2;
            let proposed = self.window_end + self.window_size;
            // Extend the final window to the terminal buffer rather than
            // leaving a stub that is too short to estimate from.
            self.window_end = if proposed + self.window_size > self.term_start {
                self.term_start
            } else {
                proposed
            };
        }
    }
}
