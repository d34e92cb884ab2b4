//! Multi-chain orchestration.
//!
//! Chains are embarrassingly parallel: they share the model by immutable
//! reference and nothing else. Each chain derives its own RNG and
//! adaptation state from the base seed and its chain index, so results are
//! reproducible and independent of scheduling order.

use crate::core::ChainDraws;
use crate::error::{DemandError, Result};
use crate::model::LogDensity;
use crate::sampler::adapt::{find_reasonable_step_size, WindowedAdaptation};
use crate::sampler::hmc::LeapfrogIntegrator;
use crate::sampler::nuts::nuts_transition;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sampler configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of independent chains.
    pub chains: usize,
    /// Warm-up (adaptation) iterations per chain, discarded.
    pub warmup: usize,
    /// Retained draws per chain.
    pub draws: usize,
    /// Maximum tree depth per transition.
    pub max_treedepth: usize,
    /// Target mean acceptance probability for step-size adaptation.
    pub target_accept: f64,
    /// Initial step size; found heuristically when `None`.
    pub init_step_size: Option<f64>,
    /// Stddev of the jitter applied to each chain's starting position.
    pub jitter_sd: f64,
    /// Base seed; chain i derives its own stream from `seed` and `i`.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            draws: 1000,
            max_treedepth: 10,
            target_accept: 0.8,
            init_step_size: None,
            jitter_sd: 0.5,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(DemandError::InvalidParameter(
                "at least one chain is required".to_string(),
            ));
        }
        if self.draws == 0 {
            return Err(DemandError::InvalidParameter(
                "at least one retained draw is required".to_string(),
            ));
        }
        if self.max_treedepth == 0 {
            return Err(DemandError::InvalidParameter(
                "max_treedepth must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.target_accept) || self.target_accept <= 0.0 {
            return Err(DemandError::InvalidParameter(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if let Some(eps) = self.init_step_size {
            if !eps.is_finite() || eps <= 0.0 {
                return Err(DemandError::InvalidParameter(format!(
                    "init_step_size must be positive and finite, got {eps}"
                )));
            }
        }
        if !self.jitter_sd.is_finite() || self.jitter_sd < 0.0 {
            return Err(DemandError::InvalidParameter(format!(
                "jitter_sd must be non-negative and finite, got {}",
                self.jitter_sd
            )));
        }
        Ok(())
    }
}

fn chain_seed(base: u64, chain: u64) -> u64 {
    base.wrapping_add(chain.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Run all configured chains in parallel and collect their draws.
pub fn sample_chains<M: LogDensity>(model: &M, config: &SamplerConfig) -> Result<Vec<ChainDraws>> {
    sample_chains_with_cancel(model, config, None)
}

/// Like [`sample_chains`], but checks `cancel` before starting each chain.
///
/// Chains that already started run to completion (the sampler's numerical
/// state is not resumable mid-trajectory); chains not yet started are
/// skipped. Fails with [`DemandError::Cancelled`] if no chain completed.
pub fn sample_chains_with_cancel<M: LogDensity>(
    model: &M,
    config: &SamplerConfig,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<ChainDraws>> {
    config.validate()?;

    let results: Vec<Option<ChainDraws>> = (0..config.chains)
        .into_par_iter()
        .map(|chain| {
            if let Some(flag) = cancel {
                if flag.load(Ordering::SeqCst) {
                    return Ok(None);
                }
            }
            run_chain(model, config, chain_seed(config.seed, chain as u64)).map(Some)
        })
        .collect::<Result<_>>()?;

    let chains: Vec<ChainDraws> = results.into_iter().flatten().collect();
    if chains.is_empty() {
        return Err(DemandError::Cancelled);
    }
    Ok(chains)
}

/// Run a single chain: jittered init, warm-up with windowed adaptation,
/// then sampling at the frozen step size and metric.
fn run_chain<M: LogDensity + ?Sized>(
    model: &M,
    config: &SamplerConfig,
    seed: u64,
) -> Result<ChainDraws> {
    let dim = model.dim();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut q = model.initial_position();
    if q.len() != dim {
        return Err(DemandError::DimensionMismatch {
            expected: dim,
            got: q.len(),
        });
    }
    if config.jitter_sd > 0.0 {
        let normal = Normal::new(0.0, config.jitter_sd).map_err(|e| {
            DemandError::InvalidParameter(format!("invalid jitter distribution: {e}"))
        })?;
        for v in &mut q {
            *v += normal.sample(&mut rng);
        }
    }

    let unit_mass = vec![1.0; dim];
    let init_eps = match config.init_step_size {
        Some(eps) => eps,
        None => find_reasonable_step_size(model, &q, &unit_mass, &mut rng),
    };
    let mut adaptation = WindowedAdaptation::new(dim, config.warmup, config.target_accept, init_eps);

    let integrator = LeapfrogIntegrator::new(model, init_eps, unit_mass);
    let mut state = integrator.init_state(q)?;

    for i in 0..config.warmup {
        let eps = adaptation.step_size();
        let inv_mass = adaptation.inv_mass_diag().to_vec();
        let warmup_integrator = LeapfrogIntegrator::new(model, eps, inv_mass.clone());

        let transition = nuts_transition(
            &warmup_integrator,
            &state,
            config.max_treedepth,
            &inv_mass,
            &mut rng,
        )?;
        state.q = transition.q;
        state.potential = transition.potential;
        state.grad_potential = transition.grad_potential;

        adaptation.update(i, &state.q, transition.accept_prob);
    }

    let step_size = adaptation.adapted_step_size();
    let inv_mass = adaptation.inv_mass_diag().to_vec();
    let sample_integrator = LeapfrogIntegrator::new(model, step_size, inv_mass.clone());

    let mut draws = Vec::with_capacity(config.draws);
    let mut divergences = Vec::with_capacity(config.draws);
    let mut tree_depths = Vec::with_capacity(config.draws);
    let mut accept_probs = Vec::with_capacity(config.draws);
    let mut energies = Vec::with_capacity(config.draws);

    for _ in 0..config.draws {
        let transition = nuts_transition(
            &sample_integrator,
            &state,
            config.max_treedepth,
            &inv_mass,
            &mut rng,
        )?;
        state.q = transition.q;
        state.potential = transition.potential;
        state.grad_potential = transition.grad_potential;

        draws.push(state.q.clone());
        divergences.push(transition.divergent);
        tree_depths.push(transition.depth);
        accept_probs.push(transition.accept_prob);
        energies.push(transition.energy);
    }

    Ok(ChainDraws {
        draws,
        divergences,
        tree_depths,
        accept_probs,
        energies,
        step_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    #[derive(Clone)]
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

    fn quick_config() -> SamplerConfig {
        SamplerConfig {
            chains: 2,
            warmup: 100,
            draws: 50,
            seed: 42,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn chains_have_requested_shape() {
        let model = StdNormal { dim: 3 };
        let chains = sample_chains(&model, &quick_config()).unwrap();
        assert_eq!(chains.len(), 2);
        for c in &chains {
            assert_eq!(c.draws.len(), 50);
            assert!(c.draws.iter().all(|d| d.len() == 3));
            assert_eq!(c.divergences.len(), 50);
            assert!(c.step_size > 0.0);
        }
    }

    #[test]
    fn same_seed_reproduces_draws() {
        let model = StdNormal { dim: 2 };
        let a = sample_chains(&model, &quick_config()).unwrap();
        let b = sample_chains(&model, &quick_config()).unwrap();
        for (ca, cb) in a.iter().zip(&b) {
            assert_eq!(ca.draws, cb.draws);
            assert_eq!(ca.energies, cb.energies);
        }
    }

    #[test]
    fn chains_are_distinct_streams() {
        let model = StdNormal { dim: 2 };
        let chains = sample_chains(&model, &quick_config()).unwrap();
        assert_ne!(chains[0].draws, chains[1].draws);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let model = StdNormal { dim: 1 };
        for config in [
            SamplerConfig {
                chains: 0,
                ..quick_config()
            },
            SamplerConfig {
                draws: 0,
                ..quick_config()
            },
            SamplerConfig {
                max_treedepth: 0,
                ..quick_config()
            },
            SamplerConfig {
                target_accept: 1.5,
                ..quick_config()
            },
            SamplerConfig {
                init_step_size: Some(0.0),
                ..quick_config()
            },
            SamplerConfig {
                jitter_sd: -1.0,
                ..quick_config()
            },
        ] {
            assert!(sample_chains(&model, &config).is_err());
        }
    }

    #[test]
    fn preset_cancel_flag_skips_all_chains() {
        let model = StdNormal { dim: 1 };
        let cancel = AtomicBool::new(true);
        let result = sample_chains_with_cancel(&model, &quick_config(), Some(&cancel));
        assert!(matches!(result, Err(DemandError::Cancelled)));
    }

    #[test]
    fn unset_cancel_flag_runs_normally() {
        let model = StdNormal { dim: 1 };
        let cancel = AtomicBool::new(false);
        let chains = sample_chains_with_cancel(&model, &quick_config(), Some(&cancel)).unwrap();
        assert_eq!(chains.len(), 2);
    }

    #[test]
    fn zero_warmup_still_samples() {
        let model = StdNormal { dim: 1 };
        let config = SamplerConfig {
            chains: 1,
            warmup: 0,
            draws: 10,
            init_step_size: Some(0.5),
            ..SamplerConfig::default()
        };
        let chains = sample_chains(&model, &config).unwrap();
        assert_eq!(chains[0].draws.len(), 10);
    }
}
