//! High-level entry point: build the model, sample, summarize.

use crate::core::{ChainDraws, PosteriorDraws, SalesSeries};
use crate::error::Result;
use crate::model::{DemandModel, LogDensity, ModelConfig};
use crate::sampler::{sample_chains_with_cancel, SamplerConfig};
use crate::summary::{
    diagnostics_report, summarize, DiagnosticsReport, ParameterSummary, SummaryConfig,
};
use std::sync::atomic::AtomicBool;

/// Full configuration for one fit: model structure, sampler settings, and
/// summarization options.
#[derive(Debug, Clone, Default)]
pub struct FitConfig {
    pub model: ModelConfig,
    pub sampler: SamplerConfig,
    pub summary: SummaryConfig,
}

/// Result of a fit: the immutable draw collection, the per-parameter
/// summary table, and the run-level diagnostics.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub draws: PosteriorDraws,
    pub summary: Vec<ParameterSummary>,
    pub diagnostics: DiagnosticsReport,
    model: DemandModel,
}

impl FitResult {
    /// Summary row for a parameter by name.
    pub fn summary_for(&self, name: &str) -> Option<&ParameterSummary> {
        self.summary.iter().find(|s| s.name == name)
    }

    /// Posterior-mean latent trend at observation resolution (log-rate
    /// scale), for the plotting/export collaborator.
    pub fn posterior_mean_trend(&self) -> Result<Vec<f64>> {
        self.posterior_mean_of(|model, q| model.trend_trajectory(q))
    }

    /// Posterior-mean expected rate per observation.
    pub fn posterior_mean_rate(&self) -> Result<Vec<f64>> {
        self.posterior_mean_of(|model, q| model.rate_trajectory(q))
    }

    fn posterior_mean_of<F>(&self, f: F) -> Result<Vec<f64>>
    where
        F: Fn(&DemandModel, &[f64]) -> Result<Vec<f64>>,
    {
        let dim = self.model.dim();
        let mut acc = vec![0.0; self.model.n_obs()];
        let mut count = 0usize;
        for chain in self.draws.chains() {
            for draw in &chain.draws {
                let traj = f(&self.model, &draw[..dim])?;
                for (a, v) in acc.iter_mut().zip(&traj) {
                    *a += v;
                }
                count += 1;
            }
        }
        let inv = 1.0 / count as f64;
        for a in &mut acc {
            *a *= inv;
        }
        Ok(acc)
    }
}

/// Fit the latent-demand model to a series.
///
/// Validation happens up front; the configured chains then run in
/// parallel, and summarization begins only after every chain's draws are
/// materialized. Convergence problems are reported in
/// [`FitResult::diagnostics`], never raised as errors.
///
/// # Example
/// ```no_run
/// use demandmc::core::SalesSeries;
/// use demandmc::fit::{fit, FitConfig};
///
/// let counts = vec![12, 15, 9, 11, 14, 8, 10];
/// let log_price = vec![2.3; 7];
/// let weekday = vec![1, 2, 3, 4, 5, 6, 7];
/// let doy: Vec<f64> = (0..7).map(|i| i as f64 / 365.0).collect();
/// let series = SalesSeries::new(counts, log_price, weekday, doy).unwrap();
///
/// let result = fit(&series, &FitConfig::default()).unwrap();
/// for row in &result.summary {
///     println!("{}: {:.3} ± {:.3}", row.name, row.mean, row.sd);
/// }
/// ```
pub fn fit(series: &SalesSeries, config: &FitConfig) -> Result<FitResult> {
    fit_inner(series, config, None)
}

/// Bounded-time variant of [`fit`]: the flag is checked before each chain
/// starts; chains already running finish normally.
pub fn fit_with_cancel(
    series: &SalesSeries,
    config: &FitConfig,
    cancel: &AtomicBool,
) -> Result<FitResult> {
    fit_inner(series, config, Some(cancel))
}

fn fit_inner(
    series: &SalesSeries,
    config: &FitConfig,
    cancel: Option<&AtomicBool>,
) -> Result<FitResult> {
    let model = DemandModel::new(series, config.model.clone())?;
    let chains = sample_chains_with_cancel(&model, &config.sampler, cancel)?;

    // Append the scalar deterministic quantities to each draw so they are
    // summarized alongside the free parameters.
    let chains: Vec<ChainDraws> = chains
        .into_iter()
        .map(|mut chain| {
            for draw in &mut chain.draws {
                let extra = model.deterministics(draw);
                draw.extend(extra);
            }
            chain
        })
        .collect();

    let mut names = model.parameter_names();
    names.extend(model.deterministic_names());

    let draws = PosteriorDraws::new(names, chains)?;
    let summary = summarize(&draws, &config.summary)?;
    let diagnostics = diagnostics_report(&draws, &summary, config.sampler.max_treedepth);

    Ok(FitResult {
        draws,
        summary,
        diagnostics,
        model,
    })
}
