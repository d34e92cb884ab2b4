//! Core data structures: input series and posterior draw collections.

pub mod draws;
pub mod series;

pub use draws::{ChainDraws, PosteriorDraws};
pub use series::SalesSeries;
