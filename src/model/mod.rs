//! Autoregressive model fitting and extrapolation.

pub mod burg;
pub mod predict;

pub use burg::BurgEstimator;
pub use predict::extrapolate;
