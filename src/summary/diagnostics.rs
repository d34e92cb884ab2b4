//! Convergence diagnostics over raw posterior draws.
//!
//! Split potential-scale-reduction and effective sample sizes follow the
//! split-chain scheme with Geyer initial-positive-sequence truncation of
//! the autocorrelation sum. All functions are pure over the draw arrays.

use crate::utils::{fractional_ranks, quantile, quantile_normal};

/// Split every chain into two halves (the odd trailing draw is dropped).
fn split_halves(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        let half = c.len() / 2;
        out.push(c[..half].to_vec());
        out.push(c[half..2 * half].to_vec());
    }
    out
}

/// Split potential-scale-reduction statistic (R-hat).
///
/// Compares within-chain to between-chain variance after splitting each
/// chain in half. Returns NaN when fewer than two chains are supplied or
/// the chains are too short to split.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    if chains.len() < 2 {
        return f64::NAN;
    }
    let split = split_halves(chains);
    let n = split.iter().map(|c| c.len()).min().unwrap_or(0);
    if n < 2 {
        return f64::NAN;
    }
    let m = split.len();

    let means: Vec<f64> = split.iter().map(|c| crate::utils::mean(&c[..n])).collect();
    let vars: Vec<f64> = split
        .iter()
        .map(|c| crate::utils::variance(&c[..n]))
        .collect();

    let w = vars.iter().sum::<f64>() / m as f64;
    let overall = means.iter().sum::<f64>() / m as f64;
    let b = means.iter().map(|mu| (mu - overall).powi(2)).sum::<f64>() * n as f64
        / (m - 1) as f64;

    let var_hat = (n as f64 - 1.0) / n as f64 * w + b / n as f64;
    if w > 1e-10 {
        (var_hat / w).sqrt()
    } else {
        1.0
    }
}

/// Effective sample size of a set of (already split) sequences.
///
/// Averages per-sequence autocorrelations, sums them in Geyer pairs until
/// a pair turns non-positive, and converts the integrated autocorrelation
/// time into an ESS clamped to [1, total draws].
fn ess_of_sequences(seqs: &[Vec<f64>]) -> f64 {
    let m = seqs.len();
    let n = seqs.iter().map(|s| s.len()).min().unwrap_or(0);
    let total = seqs.iter().map(|s| s.len()).sum::<usize>() as f64;
    if m == 0 || n < 4 {
        return total.max(1.0);
    }

    let means: Vec<f64> = seqs.iter().map(|s| crate::utils::mean(&s[..n])).collect();
    let gamma0: Vec<f64> = seqs
        .iter()
        .zip(&means)
        .map(|(s, &mu)| {
            let g0 = s[..n].iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / n as f64;
            g0.max(1e-16)
        })
        .collect();

    let rho = |lag: usize| -> f64 {
        let mut acc = 0.0;
        for (k, s) in seqs.iter().enumerate() {
            let mu = means[k];
            let mut cov = 0.0;
            for t in 0..n - lag {
                cov += (s[t] - mu) * (s[t + lag] - mu);
            }
            cov /= (n - lag) as f64;
            acc += cov / gamma0[k];
        }
        acc / m as f64
    };

    let max_lag = (n - 1).min(1000);
    let mut tau = 1.0;
    let mut lag = 1;
    while lag < max_lag {
        let mut pair = rho(lag);
        if lag + 1 <= max_lag {
            pair += rho(lag + 1);
        }
        if !pair.is_finite() || pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }

    if !tau.is_finite() || tau <= 0.0 {
        return 1.0;
    }
    (total / tau).clamp(1.0, total)
}

/// Rank-normalize draws across all chains: pooled fractional ranks mapped
/// through the standard normal quantile function.
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let z: Vec<f64> = fractional_ranks(&pooled)
        .into_iter()
        .map(quantile_normal)
        .collect();
    let mut out = Vec::with_capacity(chains.len());
    let mut offset = 0;
    for c in chains {
        out.push(z[offset..offset + c.len()].to_vec());
        offset += c.len();
    }
    out
}

/// Bulk effective sample size: ESS of the rank-normalized split chains.
pub fn ess_bulk(chains: &[Vec<f64>]) -> f64 {
    ess_of_sequences(&split_halves(&rank_normalize(chains)))
}

/// Tail effective sample size: the smaller ESS of the 5% and 95% quantile
/// exceedance indicators.
pub fn ess_tail(chains: &[Vec<f64>]) -> f64 {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let mut out = f64::INFINITY;
    for p in [0.05, 0.95] {
        let cutoff = quantile(&pooled, p);
        let indicator: Vec<Vec<f64>> = chains
            .iter()
            .map(|c| {
                c.iter()
                    .map(|&x| if x <= cutoff { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        out = out.min(ess_of_sequences(&split_halves(&indicator)));
    }
    out
}

/// Monte Carlo standard error of the posterior mean.
pub fn mcse_mean(sd: f64, ess: f64) -> f64 {
    if ess > 0.0 {
        sd / ess.sqrt()
    } else {
        f64::NAN
    }
}

/// Monte Carlo standard error of the posterior standard deviation, under a
/// normal approximation.
pub fn mcse_sd(sd: f64, ess: f64) -> f64 {
    if ess <= 1.0 {
        return f64::NAN;
    }
    let factor = (std::f64::consts::E * (1.0 - 1.0 / ess).powf(ess - 1.0) - 1.0).max(0.0);
    sd * factor.sqrt()
}
