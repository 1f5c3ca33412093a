//! Sampling of actions from an estimator.
use super::ActionsSamplerConfig;
use crate::{
    containers::States,
    estimator::{EstimatorRole, FunctionEstimator},
    util::{mask_to_tensor, masked_log_softmax},
};
use anyhow::Result;
use candle_core::Tensor;
use gfn_core::{Container, GfnError};
use log::trace;
use ndarray::{Array1, Array2};
use rand::{distributions::WeightedIndex, rngs::StdRng, Rng, SeedableRng};

/// Draws one legal action per state from the policy defined by an estimator.
///
/// Estimators of role [`EstimatorRole::LogitPf`] and
/// [`EstimatorRole::LogEdgeFlow`] give forward samplers, the latter being
/// normalized edge flows. [`EstimatorRole::LogitPb`] gives a backward sampler.
pub struct ActionsSampler {
    estimator: FunctionEstimator,
    config: ActionsSamplerConfig,
    is_backward: bool,
    rng: StdRng,
}

impl ActionsSampler {
    /// Constructs a sampler.
    pub fn new(estimator: FunctionEstimator, config: ActionsSamplerConfig) -> Result<Self> {
        let is_backward = match estimator.role() {
            EstimatorRole::LogitPf | EstimatorRole::LogEdgeFlow => false,
            EstimatorRole::LogitPb => true,
            EstimatorRole::LogStateFlow => {
                return Err(GfnError::EstimatorRoleMismatch {
                    expected: "a policy or edge flow estimator".into(),
                    found: estimator.role().to_string(),
                }
                .into())
            }
        };
        if config.temperature <= 0.0 {
            return Err(GfnError::InvalidConfig(format!(
                "temperature must be positive, got {}",
                config.temperature
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&config.epsilon) {
            return Err(GfnError::InvalidConfig(format!(
                "epsilon must lie in [0, 1], got {}",
                config.epsilon
            ))
            .into());
        }
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            estimator,
            config,
            is_backward,
            rng,
        })
    }

    /// Whether the sampler draws backward actions.
    pub fn is_backward(&self) -> bool {
        self.is_backward
    }

    /// The estimator defining the policy.
    pub fn estimator(&self) -> &FunctionEstimator {
        &self.estimator
    }

    fn masks<'a>(&self, states: &'a States) -> &'a Array2<bool> {
        match self.is_backward {
            false => states.forward_masks(),
            true => states.backward_masks(),
        }
    }

    /// Log-probabilities of all actions after temperature and exit bias,
    /// `-inf` for illegal ones. Exploration is not included.
    pub fn log_probs(&self, states: &States) -> Result<Tensor> {
        let logits = (self.estimator.forward(states)? / self.config.temperature)?;
        let logits = match !self.is_backward && self.config.sf_bias != 0.0 {
            false => logits,
            true => {
                let m = logits.dim(1)?;
                let mut bias = vec![0f32; m];
                bias[m - 1] = self.config.sf_bias as f32;
                let bias = Tensor::from_vec(bias, m, logits.device())?;
                logits.broadcast_sub(&bias)?
            }
        };
        let mask = mask_to_tensor(self.masks(states), logits.device())?;
        masked_log_softmax(&logits, &mask)
    }

    /// Samples one action per state.
    ///
    /// Returns the actions and their log-probabilities under the distribution
    /// actually sampled from.
    pub fn sample(&mut self, states: &States) -> Result<(Array1<i64>, Array1<f32>)> {
        if states.is_empty() {
            return Ok((Array1::zeros(0), Array1::zeros(0)));
        }
        let lps = self.log_probs(states)?.to_vec2::<f32>()?;
        let masks = self.masks(states);
        let eps = self.config.epsilon as f32;
        let mut actions = Vec::with_capacity(lps.len());
        let mut log_probs = Vec::with_capacity(lps.len());

        for (lp, mask) in lps.iter().zip(masks.outer_iter()) {
            let n_legal = mask.iter().filter(|&&m| m).count() as f32;
            let probs = lp
                .iter()
                .zip(mask.iter())
                .map(|(&lp, &m)| match m {
                    true => (1.0 - eps) * lp.exp() + eps / n_legal,
                    false => 0.0,
                })
                .collect::<Vec<_>>();
            let a = self.rng.sample(WeightedIndex::new(&probs)?);
            actions.push(a as i64);
            log_probs.push(match eps > 0.0 {
                true => probs[a].ln(),
                false => lp[a],
            });
        }
        trace!("Sampled {} actions", actions.len());

        Ok((Array1::from(actions), Array1::from(log_probs)))
    }
}
