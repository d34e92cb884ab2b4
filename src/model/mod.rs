//! Probabilistic model definitions.

pub mod demand;

pub use demand::{DemandModel, LogDensity, ModelConfig};
