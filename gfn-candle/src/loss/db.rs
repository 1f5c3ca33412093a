//! Detailed balance.
use super::{
    base::{check_batch, clamped, missing, policy_log_probs},
    DbConfig, Loss,
};
use crate::{
    containers::{Trajectories, Transitions},
    parametrization::{AnyParametrization, DbParametrization},
    util::{array_to_tensor, ids_to_tensor},
};
use anyhow::Result;
use candle_core::Tensor;
use gfn_core::{Container, GfnError, Scheme};
use log::trace;

/// Detailed balance loss.
///
/// A transition `s -> s'` scores
/// `log F(s) + log PF(s'|s) - log F(s') - log PB(s|s')`, and a transition into
/// the sink scores `log F(s) + log PF(exit|s) - log R(s)`. The loss is the
/// mean of the squared scores.
#[derive(Clone, Debug)]
pub struct DetailedBalance {
    parametrization: DbParametrization,
    config: DbConfig,
}

impl DetailedBalance {
    /// Constructs the loss.
    pub fn new(parametrization: DbParametrization, config: DbConfig) -> Self {
        Self {
            parametrization,
            config,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: DbConfig) -> Self {
        self.config = config;
        self
    }

    /// The trained parametrization.
    pub fn parametrization(&self) -> &DbParametrization {
        &self.parametrization
    }

    /// Scores of the non-terminating transitions followed by those of the
    /// terminating ones.
    pub fn scores(&self, transitions: &Transitions) -> Result<Tensor> {
        check_batch(transitions, transitions.is_backward())?;
        let p = &self.parametrization;
        let states = transitions.states();
        let device = p.log_f().device();
        let exit = states.n_actions() - 1;
        let actions = transitions
            .actions()
            .iter()
            .enumerate()
            .map(|(row, &a)| match a {
                a if a < 0 => Err(GfnError::IllegalAction { row, action: a }.into()),
                a => Ok(a as usize),
            })
            .collect::<Result<Vec<_>>>()?;

        let log_pf = match self.config.on_policy {
            true => array_to_tensor(transitions.log_probs(), device)?,
            false => policy_log_probs(p.logit_pf(), states, &actions, false)?,
        };
        let preds = (p.log_f().forward(states)?.squeeze(1)? + log_pf)?;

        let (terminal, inner): (Vec<usize>, Vec<usize>) =
            (0..transitions.len()).partition(|&i| actions[i] == exit);
        let mut scores = vec![];
        if !inner.is_empty() {
            let next = transitions.next_states().select(&inner)?;
            let acts = inner.iter().map(|&i| actions[i]).collect::<Vec<_>>();
            let log_pb = policy_log_probs(p.logit_pb(), &next, &acts, true)?;
            let log_f_next = p.log_f().forward(&next)?.squeeze(1)?;
            let preds = preds.index_select(&ids_to_tensor(&inner, device)?, 0)?;
            scores.push(((preds - log_f_next)? - log_pb)?);
        }
        if !terminal.is_empty() {
            let log_rewards = clamped(
                terminal.iter().map(|&i| transitions.log_rewards()[i]),
                self.config.log_reward_clip_min,
                device,
            )?;
            let preds = preds.index_select(&ids_to_tensor(&terminal, device)?, 0)?;
            scores.push((preds - log_rewards)?);
        }
        Ok(Tensor::cat(&scores, 0)?)
    }
}

impl Loss<Transitions> for DetailedBalance {
    fn loss(&self, transitions: &Transitions) -> Result<Tensor> {
        let loss = self.scores(transitions)?.sqr()?.mean_all()?;
        trace!("DB loss: {:?}", loss);
        Ok(loss)
    }
}

impl Loss<Trajectories> for DetailedBalance {
    fn loss(&self, trajs: &Trajectories) -> Result<Tensor> {
        check_batch(trajs, trajs.is_backward())?;
        self.loss(&trajs.to_transitions()?)
    }
}

impl TryFrom<AnyParametrization> for DetailedBalance {
    type Error = anyhow::Error;

    fn try_from(p: AnyParametrization) -> Result<Self> {
        match p {
            AnyParametrization::Db(p) => Ok(Self::new(p, DbConfig::default())),
            AnyParametrization::SubTb(p) => Ok(Self::new(p.into(), DbConfig::default())),
            AnyParametrization::Tb(_) => Err(missing(Scheme::DetailedBalance, "log_f")),
            AnyParametrization::Fm(_) => Err(missing(Scheme::DetailedBalance, "logit_pf")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        estimator::{EstimatorRole, FunctionEstimator},
        fixture::handmade,
        model::ModuleConfig,
    };
    use candle_core::Device;

    #[test]
    fn test_handmade_scores() -> Result<()> {
        let (env, trajs) = handmade()?;
        let device = Device::Cpu;
        let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &ModuleConfig::Uniform, &device)?;
        let pb = FunctionEstimator::new(&env, EstimatorRole::LogitPb, &ModuleConfig::Uniform, &device)?;
        let log_f = FunctionEstimator::new(&env, EstimatorRole::LogStateFlow, &ModuleConfig::Zero, &device)?;
        let loss = DetailedBalance::new(DbParametrization::new(pf, pb, log_f)?, DbConfig::default());

        let l2 = 2f32.ln();
        let l3 = 3f32.ln();
        // Three inner steps, each leaving a state with three legal actions
        // into a state with a single parent; then the three exits from
        // [1,0], [0,0] and [0,2].
        let expected = [
            -l3,
            -l3,
            -l3,
            -l3 - 0.1f32.ln(),
            -l3 - 0.6f32.ln(),
            -l2 - 0.6f32.ln(),
        ];
        let transitions = trajs.to_transitions()?;
        let mut scores = loss.scores(&transitions)?.to_vec1::<f32>()?;
        let mut expected = expected.to_vec();
        scores.sort_by(|a, b| a.total_cmp(b));
        expected.sort_by(|a, b| a.total_cmp(b));
        for (s, e) in scores.iter().zip(expected.iter()) {
            assert!((s - e).abs() < 1e-5, "{} != {}", s, e);
        }

        let mean = expected.iter().map(|e| e * e).sum::<f32>() / 6.0;
        let from_trajs = Loss::<Trajectories>::loss(&loss, &trajs)?.to_scalar::<f32>()?;
        assert!((from_trajs - mean).abs() < 1e-4);
        Ok(())
    }
}
