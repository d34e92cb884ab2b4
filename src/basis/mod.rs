//! Deterministic feature construction: contrasts, periodic bases, knot grids.

pub mod contrast;
pub mod knots;
pub mod periodic;

pub use contrast::{
    cumulative_trajectory, cumulative_trajectory_adjoint, successive_difference_contrasts,
};
pub use knots::KnotGrid;
pub use periodic::{periodic_radial_basis, seasonal_basis, SeasonalBasis};
