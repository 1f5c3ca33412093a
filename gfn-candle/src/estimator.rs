//! Estimators.
//!
//! A [`FunctionEstimator`] evaluates a batch of states into logits or log-flows
//! according to its [`EstimatorRole`]. [`LogZEstimator`] holds the single
//! learnable log-partition scalar of trajectory balance.
mod base;
mod log_z;
pub use base::{EstimatorRole, FunctionEstimator};
pub use log_z::LogZEstimator;
