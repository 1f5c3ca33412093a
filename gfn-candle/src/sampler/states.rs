//! Sampling of visited states.
use super::{TrajectoriesSampler, TrajectoriesSamplerConfig};
use crate::{containers::States, env::Env, estimator::FunctionEstimator};
use anyhow::Result;
use gfn_core::{Container, GfnError};
use log::debug;

/// Samples forward rollouts and keeps the states they visit.
///
/// The returned batch holds every visited state except the sink state, the
/// source state included, ordered by step then rollout. It is the training
/// batch of [`FlowMatching`](crate::loss::FlowMatching) on states.
pub struct StatesSampler<E: Env> {
    trajectories_sampler: TrajectoriesSampler<E>,
}

impl<E: Env> StatesSampler<E> {
    /// Wraps a forward trajectories sampler.
    pub fn new(trajectories_sampler: TrajectoriesSampler<E>) -> Result<Self> {
        if trajectories_sampler.is_backward() {
            return Err(GfnError::InvalidConfig(
                "states are sampled with a forward policy".into(),
            )
            .into());
        }
        Ok(Self {
            trajectories_sampler,
        })
    }

    /// Constructs a sampler from an estimator and a configuration.
    pub fn build(
        env: E,
        estimator: FunctionEstimator,
        config: TrajectoriesSamplerConfig,
    ) -> Result<Self> {
        Self::new(TrajectoriesSampler::build(env, estimator, config)?)
    }

    /// Samples `n_trajectories` rollouts and returns their visited states.
    pub fn sample_states(&mut self, n_trajectories: usize) -> Result<States> {
        let trajs = self.trajectories_sampler.sample_trajectories(n_trajectories)?;
        let states = trajs.visited_states()?;
        debug!(
            "Sampled {} states from {} rollouts",
            states.len(),
            n_trajectories
        );
        Ok(states)
    }

    /// Same as [`StatesSampler::sample_states`].
    pub fn sample(&mut self, n_trajectories: usize) -> Result<States> {
        self.sample_states(n_trajectories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{HyperGrid, HyperGridConfig},
        estimator::EstimatorRole,
        model::ModuleConfig,
    };
    use candle_core::Device;

    #[test]
    fn test_visited_states() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default().ndim(2).height(4));
        let pf = FunctionEstimator::new(
            &env,
            EstimatorRole::LogitPf,
            &ModuleConfig::Uniform,
            &Device::Cpu,
        )?;
        let config = TrajectoriesSamplerConfig::default();

        // Both samplers draw the same actions from the same seed.
        let mut sampler = StatesSampler::build(env.clone(), pf.clone(), config.clone())?;
        let states = sampler.sample_states(5)?;
        let trajs = TrajectoriesSampler::build(env.clone(), pf, config)?.sample(5)?;

        assert_eq!(states, trajs.visited_states()?);
        assert_eq!(states.len(), trajs.when_is_done().sum());
        assert!(states.is_sink_state().iter().all(|s| !s));
        assert_eq!(states.is_initial_state().iter().filter(|&&s| s).count(), 5);
        Ok(())
    }

    #[test]
    fn test_backward_policy_is_rejected() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default().ndim(2).height(4));
        let pb = FunctionEstimator::new(
            &env,
            EstimatorRole::LogitPb,
            &ModuleConfig::Uniform,
            &Device::Cpu,
        )?;
        assert!(StatesSampler::build(env, pb, TrajectoriesSamplerConfig::default()).is_err());
        Ok(())
    }
}
