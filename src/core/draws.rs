//! Posterior draw collections produced by the sampler.

use crate::error::{DemandError, Result};

/// Draws and per-transition diagnostics from a single chain.
///
/// Draws are stored draw-major: `draws[i]` is the full parameter vector of
/// iteration `i` (post warm-up).
#[derive(Debug, Clone)]
pub struct ChainDraws {
    /// Parameter vectors, one per retained iteration.
    pub draws: Vec<Vec<f64>>,
    /// Whether each transition ended in a divergence.
    pub divergences: Vec<bool>,
    /// Tree depth reached by each transition.
    pub tree_depths: Vec<usize>,
    /// Mean leapfrog acceptance probability of each transition.
    pub accept_probs: Vec<f64>,
    /// Hamiltonian energy at the start of each transition.
    pub energies: Vec<f64>,
    /// Step size in effect after warm-up adaptation.
    pub step_size: f64,
}

/// An immutable (chain, draw, parameter) collection.
///
/// Produced by the inference engine, consumed read-only by posterior
/// summarization and any downstream export. Chains are exchangeable; the
/// chain index exists only for diagnostics.
#[derive(Debug, Clone)]
pub struct PosteriorDraws {
    param_names: Vec<String>,
    chains: Vec<ChainDraws>,
}

impl PosteriorDraws {
    /// Assemble a draw collection, validating that every chain carries the
    /// same number of draws and that every draw matches the parameter count.
    pub fn new(param_names: Vec<String>, chains: Vec<ChainDraws>) -> Result<Self> {
        if chains.is_empty() {
            return Err(DemandError::EmptyData);
        }
        let n_params = param_names.len();
        let n_draws = chains[0].draws.len();
        for chain in &chains {
            if chain.draws.len() != n_draws {
                return Err(DemandError::DimensionMismatch {
                    expected: n_draws,
                    got: chain.draws.len(),
                });
            }
            for draw in &chain.draws {
                if draw.len() != n_params {
                    return Err(DemandError::DimensionMismatch {
                        expected: n_params,
                        got: draw.len(),
                    });
                }
            }
        }
        Ok(Self {
            param_names,
            chains,
        })
    }

    /// Number of chains.
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Number of retained draws per chain.
    pub fn n_draws(&self) -> usize {
        self.chains[0].draws.len()
    }

    /// Number of parameters per draw.
    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    /// Parameter names, in draw-vector order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Look up a parameter index by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    /// Per-chain access to the raw chains.
    pub fn chains(&self) -> &[ChainDraws] {
        &self.chains
    }

    /// Extract one parameter's draws as per-chain series.
    pub fn parameter_draws(&self, param: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.draws.iter().map(|d| d[param]).collect())
            .collect()
    }

    /// All draws of one parameter pooled across chains.
    pub fn pooled_parameter_draws(&self, param: usize) -> Vec<f64> {
        self.chains
            .iter()
            .flat_map(|c| c.draws.iter().map(|d| d[param]))
            .collect()
    }

    /// Total number of divergent transitions across all chains.
    pub fn divergence_count(&self) -> usize {
        self.chains
            .iter()
            .map(|c| c.divergences.iter().filter(|&&d| d).count())
            .sum()
    }

    /// Number of transitions that saturated the given tree depth.
    pub fn treedepth_hits(&self, max_treedepth: usize) -> usize {
        self.chains
            .iter()
            .map(|c| c.tree_depths.iter().filter(|&&d| d >= max_treedepth).count())
            .sum()
    }

    /// Total retained draws across chains.
    pub fn total_draws(&self) -> usize {
        self.n_chains() * self.n_draws()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(draws: Vec<Vec<f64>>) -> ChainDraws {
        let n = draws.len();
        ChainDraws {
            draws,
            divergences: vec![false; n],
            tree_depths: vec![3; n],
            accept_probs: vec![0.9; n],
            energies: vec![0.0; n],
            step_size: 0.1,
        }
    }

    #[test]
    fn draws_expose_shape_and_names() {
        let names = vec!["a".to_string(), "b".to_string()];
        let chains = vec![
            chain_of(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
            chain_of(vec![vec![5.0, 6.0], vec![7.0, 8.0]]),
        ];
        let draws = PosteriorDraws::new(names, chains).unwrap();

        assert_eq!(draws.n_chains(), 2);
        assert_eq!(draws.n_draws(), 2);
        assert_eq!(draws.n_params(), 2);
        assert_eq!(draws.param_index("b"), Some(1));
        assert_eq!(draws.param_index("missing"), None);
        assert_eq!(draws.parameter_draws(0), vec![vec![1.0, 3.0], vec![5.0, 7.0]]);
        assert_eq!(draws.pooled_parameter_draws(1), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(draws.total_draws(), 4);
    }

    #[test]
    fn draws_reject_ragged_chains() {
        let names = vec!["a".to_string()];
        let chains = vec![
            chain_of(vec![vec![1.0], vec![2.0]]),
            chain_of(vec![vec![3.0]]),
        ];
        assert!(PosteriorDraws::new(names, chains).is_err());
    }

    #[test]
    fn draws_reject_wrong_parameter_count() {
        let names = vec!["a".to_string(), "b".to_string()];
        let chains = vec![chain_of(vec![vec![1.0]])];
        assert!(PosteriorDraws::new(names, chains).is_err());
    }

    #[test]
    fn divergence_and_depth_counters() {
        let names = vec!["a".to_string()];
        let mut c = chain_of(vec![vec![1.0], vec![2.0], vec![3.0]]);
        c.divergences = vec![true, false, true];
        c.tree_depths = vec![10, 2, 10];
        let draws = PosteriorDraws::new(names, vec![c]).unwrap();

        assert_eq!(draws.divergence_count(), 2);
        assert_eq!(draws.treedepth_hits(10), 2);
    }
}
