//! Shared statistical utilities.

pub mod stats;

pub use stats::{fractional_ranks, mean, quantile, quantile_normal, std_dev, variance};
