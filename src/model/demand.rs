//! Generative model for a latent daily sales process.
//!
//! Log-rate: η(t) = trend(t) + weekday(t) + seasonal(t) [+ price(t)]
//!
//! The trend is a Gaussian random walk over (optionally downsampled) knots,
//! weekday and annual effects are centered contrast/RBF expansions, and the
//! observed counts are Poisson with rate exp(η). All parameters live in
//! unconstrained space; positive quantities (trend scale, seasonal width)
//! are sampled through their logarithms with the prior transformed
//! accordingly, so the sampler never sees a constraint boundary.

use crate::basis::{
    cumulative_trajectory, cumulative_trajectory_adjoint, KnotGrid, SeasonalBasis,
};
use crate::core::SalesSeries;
use crate::error::{DemandError, Result};
use statrs::function::gamma::ln_gamma;

/// Number of weekday levels.
const N_WEEKDAYS: usize = 7;

/// Target density interface consumed by the sampler.
///
/// Implementations return the negative log posterior and its gradient in a
/// single call; NUTS evaluates both at every leapfrog step, and computing
/// them together shares the basis evaluations.
pub trait LogDensity: Send + Sync {
    /// Dimension of the unconstrained parameter vector.
    fn dim(&self) -> usize;

    /// Parameter names, in position order.
    fn parameter_names(&self) -> Vec<String>;

    /// Deterministic starting position for a chain (before jitter).
    fn initial_position(&self) -> Vec<f64>;

    /// Negative log density and gradient at `position`.
    fn nll_grad(&self, position: &[f64]) -> Result<(f64, Vec<f64>)>;
}

/// Structural configuration of the demand model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Temporal downsampling factor for the latent trend (1 = one knot per
    /// observation).
    pub downsample: usize,
    /// Number of periodic RBF centers for the annual effect.
    pub n_seasonal_centers: usize,
    /// Whether the price-elasticity term enters the log-rate.
    pub include_price_effect: bool,
    /// Prior standard deviation of the global baseline level.
    pub baseline_sd: f64,
    /// Exponential prior rate on the trend volatility.
    pub trend_scale_rate: f64,
    /// Exponential prior rate on the seasonal basis width.
    pub seasonal_width_rate: f64,
    /// Ceiling applied to the log-rate before exponentiation.
    pub log_rate_cap: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            downsample: 1,
            n_seasonal_centers: 12,
            include_price_effect: true,
            baseline_sd: 10.0,
            trend_scale_rate: 10.0,
            seasonal_width_rate: 10.0,
            log_rate_cap: 20.0,
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.downsample == 0 {
            return Err(DemandError::InvalidParameter(
                "downsample factor must be at least 1".to_string(),
            ));
        }
        if self.n_seasonal_centers == 0 {
            return Err(DemandError::InvalidParameter(
                "n_seasonal_centers must be at least 1".to_string(),
            ));
        }
        for (name, v) in [
            ("baseline_sd", self.baseline_sd),
            ("trend_scale_rate", self.trend_scale_rate),
            ("seasonal_width_rate", self.seasonal_width_rate),
            ("log_rate_cap", self.log_rate_cap),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(DemandError::InvalidParameter(format!(
                    "{name} must be positive and finite, got {v}"
                )));
            }
        }
        Ok(())
    }
}

/// Index layout of the unconstrained parameter vector, in generative order.
#[derive(Debug, Clone, Copy)]
struct ParamLayout {
    log_trend_scale: usize,
    baseline: usize,
    trend_raw: usize,
    n_trend_raw: usize,
    weekday: usize,
    log_seasonal_width: usize,
    seasonal: usize,
    n_seasonal: usize,
    price_raw: usize,
    dim: usize,
}

impl ParamLayout {
    fn new(n_knots: usize, n_seasonal: usize) -> Self {
        let n_trend_raw = n_knots - 1;
        let trend_raw = 2;
        let weekday = trend_raw + n_trend_raw;
        let log_seasonal_width = weekday + (N_WEEKDAYS - 1);
        let seasonal = log_seasonal_width + 1;
        let price_raw = seasonal + n_seasonal;
        Self {
            log_trend_scale: 0,
            baseline: 1,
            trend_raw,
            n_trend_raw,
            weekday,
            log_seasonal_width,
            seasonal,
            n_seasonal,
            price_raw,
            dim: price_raw + 1,
        }
    }
}

/// Latent-demand model over one sales series.
///
/// Owns read-only copies of the covariates and the precomputed basis
/// machinery; cheap to share across chains by reference.
#[derive(Debug, Clone)]
pub struct DemandModel {
    counts: Vec<f64>,
    weekday_idx: Vec<usize>,
    centered_log_price: Vec<f64>,
    seasonal_basis: SeasonalBasis,
    knots: KnotGrid,
    layout: ParamLayout,
    config: ModelConfig,
    /// Σ ln(y_t!), the constant part of the Poisson log-pmf.
    ln_count_factorial_sum: f64,
}

impl DemandModel {
    /// Build a model from a validated series and configuration.
    ///
    /// All dimension checks happen here, before any sampling.
    pub fn new(series: &SalesSeries, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let n = series.len();
        let knots = KnotGrid::new(n, config.downsample)?;
        if knots.n_knots() < 2 {
            return Err(DemandError::InvalidParameter(format!(
                "downsample factor {} leaves fewer than 2 trend knots for {} observations",
                config.downsample, n
            )));
        }
        let seasonal_basis =
            SeasonalBasis::new(series.day_of_year_fraction(), config.n_seasonal_centers)?;

        let counts: Vec<f64> = series.counts().iter().map(|&c| c as f64).collect();
        let weekday_idx: Vec<usize> = series.weekday().iter().map(|&w| (w - 1) as usize).collect();
        let ln_count_factorial_sum = counts.iter().map(|&y| ln_gamma(y + 1.0)).sum();

        Ok(Self {
            counts,
            weekday_idx,
            centered_log_price: series.centered_log_price(),
            seasonal_basis,
            knots,
            layout: ParamLayout::new(knots.n_knots(), config.n_seasonal_centers),
            config,
            ln_count_factorial_sum,
        })
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.counts.len()
    }

    /// Number of latent-trend knots.
    pub fn n_knots(&self) -> usize {
        self.knots.n_knots()
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn check_dim(&self, position: &[f64]) -> Result<()> {
        if position.len() != self.layout.dim {
            return Err(DemandError::DimensionMismatch {
                expected: self.layout.dim,
                got: position.len(),
            });
        }
        Ok(())
    }

    /// Trend volatility σ at `position`.
    pub fn trend_scale(&self, position: &[f64]) -> f64 {
        position[self.layout.log_trend_scale].exp()
    }

    /// Seasonal basis width at `position`.
    pub fn seasonal_width(&self, position: &[f64]) -> f64 {
        position[self.layout.log_seasonal_width].exp()
    }

    /// Realized price elasticity at `position`; non-positive by
    /// construction (demand does not rise with price).
    pub fn elasticity(&self, position: &[f64]) -> f64 {
        -position[self.layout.price_raw].exp()
    }

    /// Latent trend at observation resolution (log-rate scale).
    pub fn trend_trajectory(&self, position: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(position)?;
        let sigma = self.trend_scale(position);
        let baseline = position[self.layout.baseline];
        let raw = &position[self.layout.trend_raw..self.layout.trend_raw + self.layout.n_trend_raw];
        let shape = self.knots.interpolate(&cumulative_trajectory(raw))?;
        Ok(shape.iter().map(|&s| baseline + sigma * s).collect())
    }

    /// Expected Poisson rate per observation at `position`.
    pub fn rate_trajectory(&self, position: &[f64]) -> Result<Vec<f64>> {
        Ok(self
            .log_rate(position)?
            .into_iter()
            .map(f64::exp)
            .collect())
    }

    /// Names of the scalar deterministic quantities recorded with each draw.
    pub fn deterministic_names(&self) -> Vec<String> {
        vec![
            "trend_scale".to_string(),
            "seasonal_width".to_string(),
            "elasticity".to_string(),
        ]
    }

    /// Scalar deterministic quantities at `position`, matching
    /// [`DemandModel::deterministic_names`].
    pub fn deterministics(&self, position: &[f64]) -> Vec<f64> {
        vec![
            self.trend_scale(position),
            self.seasonal_width(position),
            self.elasticity(position),
        ]
    }

    /// Clipped log-rate per observation.
    fn log_rate(&self, position: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(position)?;
        let l = &self.layout;
        let trend = self.trend_trajectory(position)?;
        let weekday_effects =
            cumulative_trajectory(&position[l.weekday..l.weekday + N_WEEKDAYS - 1]);
        let width = self.seasonal_width(position);
        let basis = self.seasonal_basis.evaluate(width)?;
        let coef = &position[l.seasonal..l.seasonal + l.n_seasonal];
        let elasticity = self.elasticity(position);

        Ok((0..self.counts.len())
            .map(|t| {
                let seasonal: f64 = basis[t].iter().zip(coef).map(|(b, c)| b * c).sum();
                let mut eta = trend[t] + weekday_effects[self.weekday_idx[t]] + seasonal;
                if self.config.include_price_effect {
                    eta += elasticity * self.centered_log_price[t];
                }
                eta.min(self.config.log_rate_cap)
            })
            .collect())
    }
}

impl LogDensity for DemandModel {
    fn dim(&self) -> usize {
        self.layout.dim
    }

    fn parameter_names(&self) -> Vec<String> {
        let l = &self.layout;
        let mut names = Vec::with_capacity(l.dim);
        names.push("log_trend_scale".to_string());
        names.push("baseline".to_string());
        for i in 0..l.n_trend_raw {
            names.push(format!("trend_raw[{i}]"));
        }
        for i in 0..N_WEEKDAYS - 1 {
            names.push(format!("weekday[{i}]"));
        }
        names.push("log_seasonal_width".to_string());
        for i in 0..l.n_seasonal {
            names.push(format!("seasonal[{i}]"));
        }
        names.push("price_raw".to_string());
        names
    }

    fn initial_position(&self) -> Vec<f64> {
        let mut p = vec![0.0; self.layout.dim];
        // Start positive scales at their prior means and the baseline near
        // the observed mean log count; everything else at zero.
        p[self.layout.log_trend_scale] = -self.config.trend_scale_rate.ln();
        p[self.layout.log_seasonal_width] = -self.config.seasonal_width_rate.ln();
        let mean_count = crate::utils::mean(&self.counts).max(0.1);
        p[self.layout.baseline] = mean_count.ln();
        p
    }

    fn nll_grad(&self, position: &[f64]) -> Result<(f64, Vec<f64>)> {
        self.check_dim(position)?;
        let l = self.layout;
        let cfg = &self.config;
        let n = self.counts.len();

        let log_sigma = position[l.log_trend_scale];
        let sigma = log_sigma.exp();
        let baseline = position[l.baseline];
        let trend_raw = &position[l.trend_raw..l.trend_raw + l.n_trend_raw];
        let weekday_raw = &position[l.weekday..l.weekday + N_WEEKDAYS - 1];
        let log_width = position[l.log_seasonal_width];
        let width = log_width.exp();
        let seasonal_coef = &position[l.seasonal..l.seasonal + l.n_seasonal];
        let price_raw = position[l.price_raw];
        let elasticity = -price_raw.exp();

        // Structured effects at observation resolution.
        let trend_shape = self.knots.interpolate(&cumulative_trajectory(trend_raw))?;
        let weekday_effects = cumulative_trajectory(weekday_raw);
        let (basis, dbasis) = self.seasonal_basis.evaluate_with_width_gradient(width)?;

        let mut nll = self.ln_count_factorial_sum;
        // d nll / d eta_t; zero where the log-rate ceiling is active.
        let mut obs_grad = vec![0.0; n];
        let mut seasonal_grad = vec![0.0; l.n_seasonal];
        let mut weekday_level_grad = vec![0.0; N_WEEKDAYS];
        let mut grad_baseline = 0.0;
        let mut grad_log_sigma_lik = 0.0;
        let mut grad_log_width_lik = 0.0;
        let mut grad_price_lik = 0.0;

        for t in 0..n {
            let seasonal: f64 = basis[t]
                .iter()
                .zip(seasonal_coef)
                .map(|(b, c)| b * c)
                .sum();
            let mut eta = baseline + sigma * trend_shape[t]
                + weekday_effects[self.weekday_idx[t]]
                + seasonal;
            if cfg.include_price_effect {
                eta += elasticity * self.centered_log_price[t];
            }

            let clipped = eta > cfg.log_rate_cap;
            let eta = eta.min(cfg.log_rate_cap);
            let rate = eta.exp();
            let y = self.counts[t];
            nll += rate - y * eta;

            let g = if clipped { 0.0 } else { rate - y };
            obs_grad[t] = g;
            grad_baseline += g;
            grad_log_sigma_lik += g * sigma * trend_shape[t];
            let dseasonal_dwidth: f64 = dbasis[t]
                .iter()
                .zip(seasonal_coef)
                .map(|(db, c)| db * c)
                .sum();
            grad_log_width_lik += g * width * dseasonal_dwidth;
            for (gs, b) in seasonal_grad.iter_mut().zip(&basis[t]) {
                *gs += g * b;
            }
            weekday_level_grad[self.weekday_idx[t]] += g;
            if cfg.include_price_effect {
                grad_price_lik += g * elasticity * self.centered_log_price[t];
            }
        }

        let knot_grad = self.knots.accumulate(&obs_grad)?;
        let scaled_knot_grad: Vec<f64> = knot_grad.iter().map(|&g| g * sigma).collect();
        let trend_raw_grad = cumulative_trajectory_adjoint(&scaled_knot_grad);
        let weekday_raw_grad = cumulative_trajectory_adjoint(&weekday_level_grad);

        let mut grad = vec![0.0; l.dim];

        // Priors. Positive scales carry Exponential priors expressed through
        // the log transform: nll term r*exp(u) - u, gradient r*exp(u) - 1.
        nll += cfg.trend_scale_rate * sigma - log_sigma;
        grad[l.log_trend_scale] = grad_log_sigma_lik + cfg.trend_scale_rate * sigma - 1.0;

        nll += 0.5 * (baseline / cfg.baseline_sd).powi(2);
        grad[l.baseline] = grad_baseline + baseline / (cfg.baseline_sd * cfg.baseline_sd);

        for (i, &v) in trend_raw.iter().enumerate() {
            nll += 0.5 * v * v;
            grad[l.trend_raw + i] = trend_raw_grad[i] + v;
        }

        for (i, &w) in weekday_raw.iter().enumerate() {
            nll += 0.5 * w * w;
            grad[l.weekday + i] = weekday_raw_grad[i] + w;
        }

        nll += cfg.seasonal_width_rate * width - log_width;
        grad[l.log_seasonal_width] = grad_log_width_lik + cfg.seasonal_width_rate * width - 1.0;

        for (i, &c) in seasonal_coef.iter().enumerate() {
            nll += 0.5 * c * c;
            grad[l.seasonal + i] = seasonal_grad[i] + c;
        }

        nll += 0.5 * price_raw * price_raw;
        grad[l.price_raw] = grad_price_lik + price_raw;

        if !nll.is_finite() {
            return Err(DemandError::NonFiniteDensity(format!(
                "nll = {nll} at trend scale {sigma:.3e}, width {width:.3e}"
            )));
        }

        Ok((nll, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_series(n: usize) -> SalesSeries {
        let counts: Vec<u32> = (0..n).map(|i| 5 + (i % 4) as u32).collect();
        let log_price: Vec<f64> = (0..n).map(|i| 2.0 + 0.1 * ((i % 5) as f64)).collect();
        let weekday: Vec<u8> = (0..n).map(|i| (i % 7) as u8 + 1).collect();
        let doy: Vec<f64> = (0..n).map(|i| (i % 365) as f64 / 365.0).collect();
        SalesSeries::new(counts, log_price, weekday, doy).unwrap()
    }

    fn nontrivial_position(model: &DemandModel) -> Vec<f64> {
        let mut q = model.initial_position();
        for (i, v) in q.iter_mut().enumerate() {
            *v += 0.1 * ((i as f64 * 0.7).sin());
        }
        q
    }

    #[test]
    fn dimensions_follow_layout() {
        let series = test_series(20);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        // log_trend_scale + baseline + 19 innovations + 6 weekday
        // + log_seasonal_width + 12 seasonal + price_raw
        assert_eq!(model.dim(), 2 + 19 + 6 + 1 + 12 + 1);
        assert_eq!(model.parameter_names().len(), model.dim());
        assert_eq!(model.parameter_names()[0], "log_trend_scale");
        assert_eq!(model.parameter_names()[1], "baseline");
        assert_eq!(*model.parameter_names().last().unwrap(), "price_raw");
    }

    #[test]
    fn downsampling_reduces_dimension() {
        let series = test_series(21);
        let config = ModelConfig {
            downsample: 5,
            ..ModelConfig::default()
        };
        let model = DemandModel::new(&series, config).unwrap();
        // ceil(20 / 5) + 1 = 5 knots -> 4 innovations.
        assert_eq!(model.n_knots(), 5);
        assert_eq!(model.dim(), 2 + 4 + 6 + 1 + 12 + 1);
    }

    #[test]
    fn nll_is_finite_at_init() {
        let series = test_series(30);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let (nll, grad) = model.nll_grad(&model.initial_position()).unwrap();
        assert!(nll.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let series = test_series(25);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let q = nontrivial_position(&model);
        let (_, grad) = model.nll_grad(&q).unwrap();

        let eps = 1e-6;
        for i in 0..model.dim() {
            let mut plus = q.clone();
            let mut minus = q.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let (f_plus, _) = model.nll_grad(&plus).unwrap();
            let (f_minus, _) = model.nll_grad(&minus).unwrap();
            let fd = (f_plus - f_minus) / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-4, max_relative = 1e-4);
        }
    }

    #[test]
    fn gradient_matches_finite_difference_with_downsampling() {
        let series = test_series(23);
        let config = ModelConfig {
            downsample: 4,
            ..ModelConfig::default()
        };
        let model = DemandModel::new(&series, config).unwrap();
        let q = nontrivial_position(&model);
        let (_, grad) = model.nll_grad(&q).unwrap();

        let eps = 1e-6;
        for i in 0..model.dim() {
            let mut plus = q.clone();
            let mut minus = q.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let (f_plus, _) = model.nll_grad(&plus).unwrap();
            let (f_minus, _) = model.nll_grad(&minus).unwrap();
            let fd = (f_plus - f_minus) / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-4, max_relative = 1e-4);
        }
    }

    #[test]
    fn price_effect_toggle_is_additive() {
        // With a constant price the centered covariate is zero, so the
        // toggle must not change the density.
        let n = 15;
        let counts: Vec<u32> = (0..n).map(|i| 3 + (i % 3) as u32).collect();
        let log_price = vec![1.5; n];
        let weekday: Vec<u8> = (0..n).map(|i| (i % 7) as u8 + 1).collect();
        let doy: Vec<f64> = (0..n).map(|i| i as f64 / 365.0).collect();
        let series = SalesSeries::new(counts, log_price, weekday, doy).unwrap();

        let with = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let without = DemandModel::new(
            &series,
            ModelConfig {
                include_price_effect: false,
                ..ModelConfig::default()
            },
        )
        .unwrap();

        assert_eq!(with.dim(), without.dim());
        let q = nontrivial_position(&with);
        let (nll_with, _) = with.nll_grad(&q).unwrap();
        let (nll_without, _) = without.nll_grad(&q).unwrap();
        assert_relative_eq!(nll_with, nll_without, epsilon = 1e-10);
    }

    #[test]
    fn elasticity_is_never_positive() {
        let series = test_series(10);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let mut q = model.initial_position();
        for &raw in &[-3.0, 0.0, 2.5] {
            q[model.dim() - 1] = raw;
            assert!(model.elasticity(&q) <= 0.0);
        }
    }

    #[test]
    fn log_rate_ceiling_keeps_density_finite() {
        let series = test_series(10);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let mut q = model.initial_position();
        q[1] = 500.0; // absurd baseline; unguarded exp would overflow
        let (nll, grad) = model.nll_grad(&q).unwrap();
        assert!(nll.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
        let rates = model.rate_trajectory(&q).unwrap();
        assert!(rates.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn wrong_position_length_fails_fast() {
        let series = test_series(10);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let q = vec![0.0; model.dim() - 1];
        assert!(matches!(
            model.nll_grad(&q),
            Err(DemandError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let series = test_series(10);
        for config in [
            ModelConfig {
                downsample: 0,
                ..ModelConfig::default()
            },
            ModelConfig {
                n_seasonal_centers: 0,
                ..ModelConfig::default()
            },
            ModelConfig {
                baseline_sd: 0.0,
                ..ModelConfig::default()
            },
            ModelConfig {
                trend_scale_rate: -1.0,
                ..ModelConfig::default()
            },
            ModelConfig {
                log_rate_cap: f64::INFINITY,
                ..ModelConfig::default()
            },
        ] {
            assert!(DemandModel::new(&series, config).is_err());
        }
    }

    #[test]
    fn trend_trajectory_starts_at_baseline() {
        let series = test_series(12);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let q = nontrivial_position(&model);
        let trend = model.trend_trajectory(&q).unwrap();
        // The contrast fixes the first knot at zero, so trend[0] == baseline.
        assert_relative_eq!(trend[0], q[1], epsilon = 1e-12);
        assert_eq!(trend.len(), 12);
    }

    #[test]
    fn deterministics_match_names() {
        let series = test_series(8);
        let model = DemandModel::new(&series, ModelConfig::default()).unwrap();
        let q = model.initial_position();
        assert_eq!(
            model.deterministic_names().len(),
            model.deterministics(&q).len()
        );
        assert_relative_eq!(
            model.deterministics(&q)[0],
            model.trend_scale(&q),
            epsilon = 1e-15
        );
    }
}
