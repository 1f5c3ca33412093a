//! Trajectory balance.
use super::{
    base::{check_batch, clamped, missing, step_log_probs, sum_per_rollout},
    Loss, TbConfig,
};
use crate::{
    containers::Trajectories,
    parametrization::{AnyParametrization, TbParametrization},
    util::ids_to_tensor,
};
use anyhow::Result;
use candle_core::Tensor;
use gfn_core::Scheme;
use log::trace;

/// Trajectory balance loss.
///
/// The score of a complete rollout `tau` is
/// `log Z + sum log PF(tau) - sum log PB(tau) - log R(x)`, and the loss is
/// the mean of the squared scores.
#[derive(Clone)]
pub struct TrajectoryBalance {
    parametrization: TbParametrization,
    config: TbConfig,
}

impl TrajectoryBalance {
    /// Constructs the loss.
    pub fn new(parametrization: TbParametrization, config: TbConfig) -> Self {
        Self {
            parametrization,
            config,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: TbConfig) -> Self {
        self.config = config;
        self
    }

    /// The trained parametrization.
    pub fn parametrization(&self) -> &TbParametrization {
        &self.parametrization
    }

    /// Per-rollout scores, shape `(n_trajectories,)`.
    pub fn scores(&self, trajs: &Trajectories) -> Result<Tensor> {
        check_batch(trajs, trajs.is_backward())?;
        let p = &self.parametrization;
        let n = trajs.n_trajectories();
        let steps = trajs.valid_steps();
        let (log_pf, log_pb) =
            step_log_probs(p.logit_pf(), p.logit_pb(), trajs, &steps, self.config.on_policy)?;
        let log_pf = sum_per_rollout(&log_pf, &steps, n)?;
        let log_pb = sum_per_rollout(&log_pb, &steps, n)?;
        let log_rewards = clamped(
            trajs.log_rewards().iter().copied(),
            self.config.log_reward_clip_min,
            log_pf.device(),
        )?;
        let scores = (log_pf - log_pb)?
            .broadcast_add(p.log_z().tensor())?
            .sub(&log_rewards)?;
        Ok(scores)
    }
}

/// Rollouts that take no action are left out of the mean.
impl Loss<Trajectories> for TrajectoryBalance {
    fn loss(&self, trajs: &Trajectories) -> Result<Tensor> {
        let scores = self.scores(trajs)?;
        let taken = trajs
            .when_is_done()
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let scores = scores.index_select(&ids_to_tensor(&taken, scores.device())?, 0)?;
        let loss = scores.sqr()?.mean_all()?;
        trace!("TB loss: {:?}", loss);
        Ok(loss)
    }
}

impl TryFrom<AnyParametrization> for TrajectoryBalance {
    type Error = anyhow::Error;

    fn try_from(p: AnyParametrization) -> Result<Self> {
        match p {
            AnyParametrization::Tb(p) => Ok(Self::new(p, TbConfig::default())),
            AnyParametrization::Fm(_) => Err(missing(Scheme::TrajectoryBalance, "logit_pf")),
            _ => Err(missing(Scheme::TrajectoryBalance, "log_z")),
        }
    }
}
