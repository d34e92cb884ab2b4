//! SalesSeries input bundle for daily sales data.

use crate::error::{DemandError, Result};
use chrono::{Datelike, NaiveDate};

/// A validated bundle of daily sales observations and calendar covariates.
///
/// One entry per calendar day, in order, with no gaps assumed. The model
/// consumes this structure directly; parsing flat files and cleaning raw
/// data is the caller's responsibility.
///
/// # Example
/// ```
/// use demandmc::core::SalesSeries;
///
/// let counts = vec![12, 15, 9, 11];
/// let log_price = vec![2.3, 2.3, 2.5, 2.5];
/// let weekday = vec![1, 2, 3, 4]; // Monday..Thursday
/// let doy = vec![0.0, 1.0 / 365.0, 2.0 / 365.0, 3.0 / 365.0];
/// let series = SalesSeries::new(counts, log_price, weekday, doy).unwrap();
/// assert_eq!(series.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct SalesSeries {
    /// Observed sales counts per day.
    counts: Vec<u32>,
    /// Natural log of the offered price per day.
    log_price: Vec<f64>,
    /// Day of week, 1 = Monday .. 7 = Sunday.
    weekday: Vec<u8>,
    /// Position within the year as a fraction in [0, 1), leap-year aware.
    day_of_year_fraction: Vec<f64>,
}

impl SalesSeries {
    /// Create a series from pre-computed covariates.
    ///
    /// Validates that all vectors share one length, that weekdays lie in
    /// 1..=7, that day-of-year fractions lie in [0, 1), and that log prices
    /// are finite. Fails before any inference work starts.
    pub fn new(
        counts: Vec<u32>,
        log_price: Vec<f64>,
        weekday: Vec<u8>,
        day_of_year_fraction: Vec<f64>,
    ) -> Result<Self> {
        let n = counts.len();
        if n == 0 {
            return Err(DemandError::EmptyData);
        }
        for len in [log_price.len(), weekday.len(), day_of_year_fraction.len()] {
            if len != n {
                return Err(DemandError::DimensionMismatch {
                    expected: n,
                    got: len,
                });
            }
        }
        for (i, &wd) in weekday.iter().enumerate() {
            if !(1..=7).contains(&wd) {
                return Err(DemandError::InvalidCovariate {
                    index: i,
                    reason: format!("weekday must be in 1..=7, got {wd}"),
                });
            }
        }
        for (i, &f) in day_of_year_fraction.iter().enumerate() {
            if !f.is_finite() || !(0.0..1.0).contains(&f) {
                return Err(DemandError::InvalidCovariate {
                    index: i,
                    reason: format!("day-of-year fraction must be in [0, 1), got {f}"),
                });
            }
        }
        for (i, &lp) in log_price.iter().enumerate() {
            if !lp.is_finite() {
                return Err(DemandError::InvalidCovariate {
                    index: i,
                    reason: format!("log price must be finite, got {lp}"),
                });
            }
        }

        Ok(Self {
            counts,
            log_price,
            weekday,
            day_of_year_fraction,
        })
    }

    /// Create a series from calendar dates and raw prices.
    ///
    /// Computes the weekday (1 = Monday) and the leap-year-aware day-of-year
    /// fraction from each date, and log-transforms the strictly positive
    /// prices. Dates must be in strictly increasing order.
    pub fn from_dates(dates: &[NaiveDate], counts: Vec<u32>, price: Vec<f64>) -> Result<Self> {
        if dates.len() != counts.len() {
            return Err(DemandError::DimensionMismatch {
                expected: dates.len(),
                got: counts.len(),
            });
        }
        if dates.len() != price.len() {
            return Err(DemandError::DimensionMismatch {
                expected: dates.len(),
                got: price.len(),
            });
        }
        for w in dates.windows(2) {
            if w[1] <= w[0] {
                return Err(DemandError::DateError(
                    "dates must be strictly increasing".to_string(),
                ));
            }
        }

        let weekday: Vec<u8> = dates
            .iter()
            .map(|d| d.weekday().number_from_monday() as u8)
            .collect();
        let day_of_year_fraction: Vec<f64> = dates
            .iter()
            .map(|d| {
                let days_in_year = if d.leap_year() { 366.0 } else { 365.0 };
                (d.ordinal0() as f64) / days_in_year
            })
            .collect();
        let log_price: Vec<f64> = price
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if p > 0.0 && p.is_finite() {
                    Ok(p.ln())
                } else {
                    Err(DemandError::InvalidCovariate {
                        index: i,
                        reason: format!("price must be positive and finite, got {p}"),
                    })
                }
            })
            .collect::<Result<_>>()?;

        Self::new(counts, log_price, weekday, day_of_year_fraction)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check if the series is empty.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Observed sales counts.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Log prices.
    pub fn log_price(&self) -> &[f64] {
        &self.log_price
    }

    /// Weekday labels (1 = Monday .. 7 = Sunday).
    pub fn weekday(&self) -> &[u8] {
        &self.weekday
    }

    /// Day-of-year fractions in [0, 1).
    pub fn day_of_year_fraction(&self) -> &[f64] {
        &self.day_of_year_fraction
    }

    /// Mean-centered log price, the covariate behind the elasticity term.
    ///
    /// Centering keeps the price effect identifiable against the global
    /// baseline, like every other structured effect in the model.
    pub fn centered_log_price(&self) -> Vec<f64> {
        let m = crate::utils::mean(&self.log_price);
        self.log_price.iter().map(|&x| x - m).collect()
    }
}
