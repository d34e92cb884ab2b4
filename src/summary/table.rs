//! Per-parameter posterior summaries.

use crate::core::PosteriorDraws;
use crate::error::{DemandError, Result};
use crate::summary::diagnostics::{ess_bulk, ess_tail, mcse_mean, mcse_sd, split_rhat};
use crate::utils::{mean, quantile, std_dev};

/// Configuration for posterior summarization.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Probability mass of the central credible interval.
    pub interval_mass: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            interval_mass: 0.94,
        }
    }
}

impl SummaryConfig {
    fn validate(&self) -> Result<()> {
        if !self.interval_mass.is_finite()
            || self.interval_mass <= 0.0
            || self.interval_mass >= 1.0
        {
            return Err(DemandError::InvalidParameter(format!(
                "interval_mass must be in (0, 1), got {}",
                self.interval_mass
            )));
        }
        Ok(())
    }
}

/// Point and interval estimates plus convergence diagnostics for one
/// parameter.
#[derive(Debug, Clone)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// Central credible interval (lower, upper).
    pub interval: (f64, f64),
    pub mcse_mean: f64,
    pub mcse_sd: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    /// Split potential-scale-reduction; NaN with fewer than two chains.
    pub rhat: f64,
}

/// Summarize every parameter in a draw collection.
///
/// Pure function of the draws: no model or data access. With a single
/// chain the scale-reduction statistic is reported as NaN; everything else
/// degrades gracefully.
pub fn summarize(draws: &PosteriorDraws, config: &SummaryConfig) -> Result<Vec<ParameterSummary>> {
    config.validate()?;
    let alpha = 1.0 - config.interval_mass;

    let mut out = Vec::with_capacity(draws.n_params());
    for p in 0..draws.n_params() {
        let chains = draws.parameter_draws(p);
        let pooled = draws.pooled_parameter_draws(p);

        let mean_v = mean(&pooled);
        let sd_v = if pooled.len() < 2 {
            0.0
        } else {
            std_dev(&pooled)
        };
        let lower = quantile(&pooled, alpha / 2.0);
        let upper = quantile(&pooled, 1.0 - alpha / 2.0);
        let bulk = ess_bulk(&chains);
        let tail = ess_tail(&chains);

        out.push(ParameterSummary {
            name: draws.param_names()[p].clone(),
            mean: mean_v,
            sd: sd_v,
            interval: (lower, upper),
            mcse_mean: mcse_mean(sd_v, bulk),
            mcse_sd: mcse_sd(sd_v, bulk),
            ess_bulk: bulk,
            ess_tail: tail,
            rhat: split_rhat(&chains),
        });
    }
    Ok(out)
}

/// Run-level convergence report assembled from the draw collection and the
/// per-parameter summaries.
#[derive(Debug, Clone)]
pub struct DiagnosticsReport {
    pub n_chains: usize,
    pub n_draws_per_chain: usize,
    /// Divergent transitions across all chains.
    pub divergences: usize,
    pub divergence_rate: f64,
    /// Transitions that saturated the maximum tree depth.
    pub max_treedepth_hits: usize,
    /// Worst split R-hat across parameters (NaN with a single chain).
    pub max_rhat: f64,
    /// Smallest bulk ESS across parameters.
    pub min_ess_bulk: f64,
}

/// Assemble the run-level diagnostics report.
pub fn diagnostics_report(
    draws: &PosteriorDraws,
    summaries: &[ParameterSummary],
    max_treedepth: usize,
) -> DiagnosticsReport {
    let total = draws.total_draws().max(1);
    let divergences = draws.divergence_count();

    let max_rhat = summaries
        .iter()
        .map(|s| s.rhat)
        .fold(f64::NAN, |acc, r| if r > acc || acc.is_nan() { r } else { acc });
    let min_ess_bulk = summaries
        .iter()
        .map(|s| s.ess_bulk)
        .fold(f64::INFINITY, f64::min);

    DiagnosticsReport {
        n_chains: draws.n_chains(),
        n_draws_per_chain: draws.n_draws(),
        divergences,
        divergence_rate: divergences as f64 / total as f64,
        max_treedepth_hits: draws.treedepth_hits(max_treedepth),
        max_rhat,
        min_ess_bulk,
    }
}
