//! No-U-Turn transitions.
//!
//! Slice-based NUTS with multinomial selection inside each subtree:
//! trajectories are grown by tree doubling until the path starts turning
//! back on itself or the energy error diverges, and the proposal is drawn
//! uniformly among slice-admissible states.

use crate::error::{DemandError, Result};
use crate::model::LogDensity;
use crate::sampler::hmc::{HmcState, LeapfrogIntegrator};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Maximum energy error before declaring a divergence.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Result of one NUTS transition.
#[derive(Debug, Clone)]
pub struct NutsTransition {
    pub q: Vec<f64>,
    pub potential: f64,
    pub grad_potential: Vec<f64>,
    pub depth: usize,
    pub divergent: bool,
    pub accept_prob: f64,
    pub energy: f64,
}

/// Trajectory tree built by recursive doubling.
struct NutsTree {
    q_left: Vec<f64>,
    p_left: Vec<f64>,
    grad_left: Vec<f64>,
    q_right: Vec<f64>,
    p_right: Vec<f64>,
    grad_right: Vec<f64>,
    q_proposal: Vec<f64>,
    potential_proposal: f64,
    grad_proposal: Vec<f64>,
    log_sum_weight: f64,
    n_leapfrog: usize,
    divergent: bool,
    turning: bool,
    sum_accept_prob: f64,
}

/// U-turn check: has the trajectory started moving back toward itself at
/// either end?
fn is_turning(dq: &[f64], p_left: &[f64], p_right: &[f64], inv_mass: &[f64]) -> bool {
    let dot_left: f64 = dq
        .iter()
        .zip(p_left)
        .zip(inv_mass)
        .map(|((&d, &p), &m)| d * p * m)
        .sum();
    let dot_right: f64 = dq
        .iter()
        .zip(p_right)
        .zip(inv_mass)
        .map(|((&d, &p), &m)| d * p * m)
        .sum();
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

/// Build a single-leaf tree: one leapfrog step in `direction`.
///
/// A non-finite density along the way is contained as a divergent leaf
/// rather than aborting the chain; it surfaces in the divergence
/// diagnostics like any other divergence.
fn build_leaf<M: LogDensity + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, M>,
    state: &HmcState,
    direction: i32,
    log_u: f64,
    h0: f64,
    inv_mass: &[f64],
) -> Result<NutsTree> {
    let mut new_state = state.clone();
    let step = integrator.step_dir(&mut new_state, direction);
    if let Err(err) = step {
        if !matches!(err, DemandError::NonFiniteDensity(_)) {
            return Err(err);
        }
        return Ok(NutsTree {
            q_left: state.q.clone(),
            p_left: state.p.clone(),
            grad_left: state.grad_potential.clone(),
            q_right: state.q.clone(),
            p_right: state.p.clone(),
            grad_right: state.grad_potential.clone(),
            q_proposal: state.q.clone(),
            potential_proposal: state.potential,
            grad_proposal: state.grad_potential.clone(),
            log_sum_weight: f64::NEG_INFINITY,
            n_leapfrog: 1,
            divergent: true,
            turning: false,
            sum_accept_prob: 0.0,
        });
    }

    let h = new_state.hamiltonian(inv_mass);
    let energy_error = h - h0;
    let divergent = !energy_error.is_finite() || energy_error.abs() > DIVERGENCE_THRESHOLD;
    // Slice condition: keep states with log_u <= -H.
    let in_slice = log_u <= -h;
    let log_weight = if in_slice && !divergent {
        0.0
    } else {
        f64::NEG_INFINITY
    };
    let accept_prob = if energy_error.is_finite() {
        (-energy_error).exp().min(1.0)
    } else {
        0.0
    };

    Ok(NutsTree {
        q_left: new_state.q.clone(),
        p_left: new_state.p.clone(),
        grad_left: new_state.grad_potential.clone(),
        q_right: new_state.q.clone(),
        p_right: new_state.p.clone(),
        grad_right: new_state.grad_potential.clone(),
        q_proposal: new_state.q,
        potential_proposal: new_state.potential,
        grad_proposal: new_state.grad_potential,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        divergent,
        turning: false,
        sum_accept_prob: accept_prob,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_tree<M: LogDensity + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, M>,
    state: &HmcState,
    depth: usize,
    direction: i32,
    log_u: f64,
    h0: f64,
    inv_mass: &[f64],
    rng: &mut R,
) -> Result<NutsTree> {
    if depth == 0 {
        return build_leaf(integrator, state, direction, log_u, h0, inv_mass);
    }

    let mut inner = build_tree(
        integrator,
        state,
        depth - 1,
        direction,
        log_u,
        h0,
        inv_mass,
        rng,
    )?;
    if inner.divergent || inner.turning {
        return Ok(inner);
    }

    let edge_state = if direction > 0 {
        HmcState {
            q: inner.q_right.clone(),
            p: inner.p_right.clone(),
            potential: 0.0, // unused during tree building
            grad_potential: inner.grad_right.clone(),
        }
    } else {
        HmcState {
            q: inner.q_left.clone(),
            p: inner.p_left.clone(),
            potential: 0.0,
            grad_potential: inner.grad_left.clone(),
        }
    };
    let outer = build_tree(
        integrator,
        &edge_state,
        depth - 1,
        direction,
        log_u,
        h0,
        inv_mass,
        rng,
    )?;

    // Multinomial merge: take the outer proposal with probability
    // proportional to its share of the slice weight.
    let merged_weight = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - merged_weight).exp();
    if rng.random::<f64>() < accept_outer {
        inner.q_proposal = outer.q_proposal;
        inner.potential_proposal = outer.potential_proposal;
        inner.grad_proposal = outer.grad_proposal;
    }

    inner.log_sum_weight = merged_weight;
    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept_prob += outer.sum_accept_prob;
    inner.divergent = inner.divergent || outer.divergent;

    if direction > 0 {
        inner.q_right = outer.q_right;
        inner.p_right = outer.p_right;
        inner.grad_right = outer.grad_right;
    } else {
        inner.q_left = outer.q_left;
        inner.p_left = outer.p_left;
        inner.grad_left = outer.grad_left;
    }

    let dq: Vec<f64> = inner
        .q_right
        .iter()
        .zip(&inner.q_left)
        .map(|(&r, &l)| r - l)
        .collect();
    inner.turning = inner.turning
        || outer.turning
        || is_turning(&dq, &inner.p_left, &inner.p_right, inv_mass);

    Ok(inner)
}

/// Run one NUTS transition from `current`.
pub fn nuts_transition<M: LogDensity + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, M>,
    current: &HmcState,
    max_treedepth: usize,
    inv_mass: &[f64],
    rng: &mut R,
) -> Result<NutsTransition> {
    let mut state = current.clone();
    // Refresh momentum ~ N(0, M).
    for (p, &m) in state.p.iter_mut().zip(inv_mass) {
        let z: f64 = StandardNormal.sample(rng);
        *p = z / m.sqrt();
    }

    let h0 = state.hamiltonian(inv_mass);
    // Slice variable: log u with u ~ Uniform(0, exp(-H0)).
    let log_u = rng.random::<f64>().ln() - h0;

    let mut tree = NutsTree {
        q_left: state.q.clone(),
        p_left: state.p.clone(),
        grad_left: state.grad_potential.clone(),
        q_right: state.q.clone(),
        p_right: state.p.clone(),
        grad_right: state.grad_potential.clone(),
        q_proposal: state.q.clone(),
        potential_proposal: state.potential,
        grad_proposal: state.grad_potential.clone(),
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        divergent: false,
        turning: false,
        sum_accept_prob: 0.0,
    };

    let mut depth = 0;
    let mut depth_reached = 0;
    while depth <= max_treedepth {
        depth_reached = depth;
        let direction: i32 = if rng.random::<bool>() { 1 } else { -1 };

        let edge_state = if direction > 0 {
            HmcState {
                q: tree.q_right.clone(),
                p: tree.p_right.clone(),
                potential: 0.0,
                grad_potential: tree.grad_right.clone(),
            }
        } else {
            HmcState {
                q: tree.q_left.clone(),
                p: tree.p_left.clone(),
                potential: 0.0,
                grad_potential: tree.grad_left.clone(),
            }
        };
        let subtree = build_tree(
            integrator,
            &edge_state,
            depth,
            direction,
            log_u,
            h0,
            inv_mass,
            rng,
        )?;

        let merged_weight = log_sum_exp(tree.log_sum_weight, subtree.log_sum_weight);
        let accept_subtree = (subtree.log_sum_weight - merged_weight).exp();
        if rng.random::<f64>() < accept_subtree {
            tree.q_proposal = subtree.q_proposal;
            tree.potential_proposal = subtree.potential_proposal;
            tree.grad_proposal = subtree.grad_proposal;
        }

        tree.log_sum_weight = merged_weight;
        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        tree.divergent = tree.divergent || subtree.divergent;
        tree.turning = tree.turning || subtree.turning;

        if direction > 0 {
            tree.q_right = subtree.q_right;
            tree.p_right = subtree.p_right;
            tree.grad_right = subtree.grad_right;
        } else {
            tree.q_left = subtree.q_left;
            tree.p_left = subtree.p_left;
            tree.grad_left = subtree.grad_left;
        }

        if tree.divergent || tree.turning {
            break;
        }
        let dq: Vec<f64> = tree
            .q_right
            .iter()
            .zip(&tree.q_left)
            .map(|(&r, &l)| r - l)
            .collect();
        if is_turning(&dq, &tree.p_left, &tree.p_right, inv_mass) {
            break;
        }

        depth += 1;
    }

    let n_total = tree.n_leapfrog.max(1) as f64;
    Ok(NutsTransition {
        q: tree.q_proposal,
        potential: tree.potential_proposal,
        grad_potential: tree.grad_proposal,
        depth: depth_reached,
        divergent: tree.divergent,
        accept_prob: tree.sum_accept_prob / n_total,
        energy: h0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct StdNormal {
        dim: usize,
    }

    impl LogDensity for StdNormal {
        fn dim(&self) -> usize {
            self.dim
        }
        fn parameter_names(&self) -> Vec<String> {
            (0..self.dim).map(|i| format!("x[{i}]")).collect()
        }
        fn initial_position(&self) -> Vec<f64> {
            vec![0.0; self.dim]
        }
        fn nll_grad(&self, position: &[f64]) -> Result<(f64, Vec<f64>)> {
            let nll = 0.5 * position.iter().map(|x| x * x).sum::<f64>();
            Ok((nll, position.to_vec()))
        }
    }

    fn init_state(target: &StdNormal, integrator: &LeapfrogIntegrator<'_, StdNormal>) -> HmcState {
        integrator
            .init_state(vec![0.5; target.dim])
            .expect("finite init")
    }

    #[test]
    fn transition_produces_valid_diagnostics() {
        let target = StdNormal { dim: 4 };
        let inv_mass = vec![1.0; 4];
        let integrator = LeapfrogIntegrator::new(&target, 0.2, inv_mass.clone());
        let state = init_state(&target, &integrator);

        let mut rng = StdRng::seed_from_u64(42);
        let t = nuts_transition(&integrator, &state, 10, &inv_mass, &mut rng).unwrap();

        assert!(t.depth <= 10);
        assert!((0.0..=1.0).contains(&t.accept_prob));
        assert!(t.energy.is_finite());
        assert_eq!(t.q.len(), 4);
    }

    #[test]
    fn transition_is_deterministic_for_a_seed() {
        let target = StdNormal { dim: 3 };
        let inv_mass = vec![1.0; 3];
        let integrator = LeapfrogIntegrator::new(&target, 0.15, inv_mass.clone());
        let state = init_state(&target, &integrator);

        let mut rng1 = StdRng::seed_from_u64(9);
        let t1 = nuts_transition(&integrator, &state, 8, &inv_mass, &mut rng1).unwrap();
        let mut rng2 = StdRng::seed_from_u64(9);
        let t2 = nuts_transition(&integrator, &state, 8, &inv_mass, &mut rng2).unwrap();

        assert_eq!(t1.q, t2.q);
        assert_eq!(t1.depth, t2.depth);
        assert_eq!(t1.divergent, t2.divergent);
    }

    #[test]
    fn chain_of_transitions_samples_the_target() {
        // Long-run mean/variance of a standard normal should be ~0 / ~1.
        let target = StdNormal { dim: 1 };
        let inv_mass = vec![1.0];
        let integrator = LeapfrogIntegrator::new(&target, 0.4, inv_mass.clone());
        let mut state = init_state(&target, &integrator);

        let mut rng = StdRng::seed_from_u64(2024);
        let mut draws = Vec::new();
        for _ in 0..2000 {
            let t = nuts_transition(&integrator, &state, 10, &inv_mass, &mut rng).unwrap();
            state.q = t.q;
            state.potential = t.potential;
            state.grad_potential = t.grad_potential;
            draws.push(state.q[0]);
        }

        let mean = crate::utils::mean(&draws);
        let var = crate::utils::variance(&draws);
        assert!(mean.abs() < 0.1, "mean {mean} too far from 0");
        assert!((var - 1.0).abs() < 0.2, "variance {var} too far from 1");
    }

    #[test]
    fn divergent_target_is_contained_not_fatal() {
        // A target whose density turns non-finite away from the origin.
        struct Cliff;
        impl LogDensity for Cliff {
            fn dim(&self) -> usize {
                1
            }
            fn parameter_names(&self) -> Vec<String> {
                vec!["x".to_string()]
            }
            fn initial_position(&self) -> Vec<f64> {
                vec![0.0]
            }
            fn nll_grad(&self, position: &[f64]) -> Result<(f64, Vec<f64>)> {
                let x = position[0];
                if x.abs() > 1.0 {
                    return Err(crate::error::DemandError::NonFiniteDensity(
                        "off the cliff".to_string(),
                    ));
                }
                Ok((0.5 * x * x, vec![x]))
            }
        }

        let target = Cliff;
        let inv_mass = vec![1.0];
        let integrator = LeapfrogIntegrator::new(&target, 2.0, inv_mass.clone());
        let mut state = integrator.init_state(vec![0.0]).unwrap();

        let mut rng = StdRng::seed_from_u64(5);
        let mut saw_divergence = false;
        for _ in 0..20 {
            let t = nuts_transition(&integrator, &state, 6, &inv_mass, &mut rng).unwrap();
            saw_divergence = saw_divergence || t.divergent;
            // Proposals never leave the region where the density is finite.
            assert!(t.q[0].abs() <= 1.0);
            state.q = t.q;
            state.potential = t.potential;
            state.grad_potential = t.grad_potential;
        }
        assert!(saw_divergence);
    }

    #[test]
    fn log_sum_exp_handles_negative_infinity() {
        assert_eq!(
            log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
        let v = log_sum_exp(0.0, f64::NEG_INFINITY);
        assert!((v - 0.0).abs() < 1e-12);
    }
}
