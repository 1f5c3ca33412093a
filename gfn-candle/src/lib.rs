#![warn(missing_docs)]
//! GFlowNet estimators, samplers and losses implemented with
//! [candle](https://crates.io/crates/candle-core).
//!
//! Training data flows from an estimator through an
//! [`ActionsSampler`](sampler::ActionsSampler) into a trajectories,
//! transitions or states sampler, optionally through a replay buffer, and
//! finally into a parametrization-aware [`Loss`](loss::Loss). The diagram on
//! [`TrajectoriesSampler`](sampler::TrajectoriesSampler) shows the full loop.
//!
//! Discrete bookkeeping (states, masks, actions, termination indices) lives
//! host-side in [`ndarray`] arrays. Everything that must be differentiable
//! (logits, flows, residuals) is a candle [`Tensor`](candle_core::Tensor), so
//! the scalar returned by a loss can be handed to any candle optimizer together
//! with [`Parametrization::parameters`](parametrization::Parametrization::parameters).
pub mod containers;
pub mod env;
pub mod estimator;
pub mod loss;
pub mod mlp;
pub mod model;
pub mod parametrization;
pub mod sampler;
pub mod util;

#[cfg(test)]
pub(crate) mod fixture;
