//! Gradient-based posterior sampling: NUTS with warm-up adaptation.

pub mod adapt;
pub mod chain;
pub mod hmc;
pub mod nuts;

pub use adapt::{find_reasonable_step_size, DualAveraging, WindowedAdaptation};
pub use chain::{sample_chains, sample_chains_with_cancel, SamplerConfig};
pub use hmc::{HmcState, LeapfrogIntegrator};
pub use nuts::{nuts_transition, NutsTransition};
