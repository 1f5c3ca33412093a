//! Configurations of samplers.
use gfn_core::util::ConfigFile;
use serde::{Deserialize, Serialize};

/// Configuration of [`ActionsSampler`](super::ActionsSampler).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ActionsSamplerConfig {
    /// Logits are divided by the temperature before normalization.
    pub temperature: f64,

    /// Subtracted from the exit logit of forward policies.
    pub sf_bias: f64,

    /// Weight of the uniform distribution over legal actions mixed into the
    /// policy.
    pub epsilon: f64,

    /// Seed of the random number generator.
    pub seed: u64,
}

impl Default for ActionsSamplerConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            sf_bias: 0.0,
            epsilon: 0.0,
            seed: 42,
        }
    }
}

impl ActionsSamplerConfig {
    /// Sets the temperature.
    pub fn temperature(mut self, v: f64) -> Self {
        self.temperature = v;
        self
    }

    /// Sets the bias against the exit action.
    pub fn sf_bias(mut self, v: f64) -> Self {
        self.sf_bias = v;
        self
    }

    /// Sets the weight of uniform exploration.
    pub fn epsilon(mut self, v: f64) -> Self {
        self.epsilon = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }
}

impl ConfigFile for ActionsSamplerConfig {}

/// Configuration of [`TrajectoriesSampler`](super::TrajectoriesSampler).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct TrajectoriesSamplerConfig {
    /// Actions sampler.
    pub actions: ActionsSamplerConfig,

    /// Cap on the number of steps, tighter than the environment's bound when
    /// given.
    pub max_steps: Option<usize>,
}

impl TrajectoriesSamplerConfig {
    /// Sets the configuration of the actions sampler.
    pub fn actions(mut self, v: ActionsSamplerConfig) -> Self {
        self.actions = v;
        self
    }

    /// Sets the cap on the number of steps.
    pub fn max_steps(mut self, v: usize) -> Self {
        self.max_steps = Some(v);
        self
    }
}

impl ConfigFile for TrajectoriesSamplerConfig {}
