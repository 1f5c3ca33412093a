//! Flow matching.
use super::{
    base::{check_batch, clamped, missing},
    FmConfig, Loss,
};
use crate::{
    containers::{States, Trajectories},
    env::Env,
    parametrization::{AnyParametrization, FmParametrization},
    util::{gather_columns, logsumexp, mask_to_tensor},
};
use anyhow::Result;
use candle_core::{Device, Tensor};
use gfn_core::{Container, GfnError, Scheme};
use log::trace;
use ndarray::{Array1, Array2, Axis};

/// Replaces the entries of `xs` where `mask` is false with `-inf`.
fn masked(xs: &Tensor, mask: &Array2<bool>, device: &Device) -> Result<Tensor> {
    let neg_inf = Tensor::full(f32::NEG_INFINITY, xs.dims(), device)?;
    Ok(mask_to_tensor(mask, device)?.where_cond(xs, &neg_inf)?)
}

/// Flow matching loss on the edge flows `log F(s -> s')`.
///
/// Every intermediary state `s` of the batch scores
/// `logsumexp_{s'' -> s} log F(s'' -> s) - logsumexp_{s -> s'} log F(s -> s')`,
/// the outgoing edges including the one into the sink state, and every
/// terminating state `x` scores `log F(x -> s_f) - log R(x)`. The loss is the
/// mean squared score of the first kind plus `alpha` times that of the second.
///
/// Parents are enumerated with the environment, so the loss owns one.
pub struct FlowMatching<E: Env> {
    parametrization: FmParametrization,
    env: E,
    config: FmConfig,
}

impl<E: Env> FlowMatching<E> {
    /// Constructs the loss.
    pub fn new(parametrization: FmParametrization, env: E, config: FmConfig) -> Self {
        Self {
            parametrization,
            env,
            config,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: FmConfig) -> Self {
        self.config = config;
        self
    }

    /// The trained parametrization.
    pub fn parametrization(&self) -> &FmParametrization {
        &self.parametrization
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Flow matching scores of states that are neither the source nor the sink.
    pub fn flow_matching_scores(&self, states: &States) -> Result<Tensor> {
        let estimator = self.parametrization.log_edge_flow();
        let device = estimator.device();
        let m = states.len();
        let n_backward = self.env.n_actions() - 1;

        let outgoing = masked(&estimator.forward(states)?, states.forward_masks(), device)?;
        let outgoing = logsumexp(&outgoing, 1)?;

        // Parents through backward action b fill rows b * m .. (b + 1) * m;
        // rows of illegal actions hold the state itself and are masked out.
        let backward_masks = states.backward_masks();
        let mut parents = Array2::zeros((n_backward * m, self.env.state_dim()));
        for (row, mut parent) in parents.axis_iter_mut(Axis(0)).enumerate() {
            let (b, k) = (row / m, row % m);
            let state = states.tensor().row(k);
            match backward_masks[[k, b]] {
                true => parent.assign(&self.env.maskless_backward_step(state, b)),
                false => parent.assign(&state),
            }
        }
        let parents = self.env.make_states(parents)?;
        let cols = (0..n_backward)
            .flat_map(|b| std::iter::repeat(b).take(m))
            .collect::<Vec<_>>();
        let incoming = gather_columns(&estimator.forward(&parents)?, &cols)?
            .reshape((n_backward, m))?
            .t()?
            .contiguous()?;
        let incoming = logsumexp(&masked(&incoming, backward_masks, device)?, 1)?;

        Ok((incoming - outgoing)?)
    }

    /// Reward matching scores of the terminating states of a batch.
    pub fn reward_matching_scores(&self, trajs: &Trajectories) -> Result<Tensor> {
        self.exit_scores(&trajs.last_states()?, trajs.log_rewards())
    }

    /// `log F(x -> s_f) - log R(x)` for each row of `states`.
    fn exit_scores(&self, states: &States, log_rewards: &Array1<f32>) -> Result<Tensor> {
        let estimator = self.parametrization.log_edge_flow();
        let exits = vec![self.env.exit_action(); states.len()];
        let to_sink = gather_columns(&estimator.forward(states)?, &exits)?;
        let log_rewards = clamped(
            log_rewards.iter().copied(),
            self.config.log_reward_clip_min,
            estimator.device(),
        )?;
        Ok((to_sink - log_rewards)?)
    }
}

impl<E: Env> Loss<Trajectories> for FlowMatching<E> {
    fn loss(&self, trajs: &Trajectories) -> Result<Tensor> {
        check_batch(trajs, trajs.is_backward())?;
        let rm = self.reward_matching_scores(trajs)?.sqr()?.mean_all()?;
        let rm = (rm * self.config.alpha)?;
        let intermediary = trajs.intermediary_states()?;
        let loss = match intermediary.is_empty() {
            true => rm,
            false => {
                let fm = self.flow_matching_scores(&intermediary)?;
                (fm.sqr()?.mean_all()? + rm)?
            }
        };
        trace!("FM loss: {:?}", loss);
        Ok(loss)
    }
}

/// Flow matching on bare states.
///
/// Rows other than the source and the sink are flow matched. Every row that
/// can take the exit action is reward matched, since `F(x -> s_f) = R(x)`
/// must hold wherever that edge exists.
impl<E: Env> Loss<States> for FlowMatching<E> {
    fn loss(&self, states: &States) -> Result<Tensor> {
        check_batch(states, false)?;
        let exit = self.env.exit_action();
        let is_initial = states.is_initial_state();
        let is_sink = states.is_sink_state();
        let inner = (0..states.len())
            .filter(|&i| !is_initial[i] && !is_sink[i])
            .collect::<Vec<_>>();
        let terminating = (0..states.len())
            .filter(|&i| states.forward_masks()[[i, exit]])
            .collect::<Vec<_>>();

        let fm = match inner.is_empty() {
            true => None,
            false => {
                let fm = self.flow_matching_scores(&states.select(&inner)?)?;
                Some(fm.sqr()?.mean_all()?)
            }
        };
        let rm = match terminating.is_empty() {
            true => None,
            false => {
                let terminating = states.select(&terminating)?;
                let log_rewards = self.env.log_reward(&terminating);
                let rm = self.exit_scores(&terminating, &log_rewards)?;
                Some((rm.sqr()?.mean_all()? * self.config.alpha)?)
            }
        };
        let loss = match (fm, rm) {
            (Some(fm), Some(rm)) => (fm + rm)?,
            (Some(term), None) | (None, Some(term)) => term,
            (None, None) => {
                return Err(GfnError::ShapeMismatch(
                    "no state to match flows or rewards on".into(),
                )
                .into())
            }
        };
        trace!("FM loss on states: {:?}", loss);
        Ok(loss)
    }
}

impl<E: Env> TryFrom<(AnyParametrization, E)> for FlowMatching<E> {
    type Error = anyhow::Error;

    fn try_from((p, env): (AnyParametrization, E)) -> Result<Self> {
        match p {
            AnyParametrization::Fm(p) => Ok(Self::new(p, env, FmConfig::default())),
            _ => Err(missing(Scheme::FlowMatching, "log_edge_flow")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::HyperGrid,
        estimator::{EstimatorRole, FunctionEstimator},
        fixture::handmade,
        model::ModuleConfig,
        parametrization::EstimatorSet,
    };

    fn zero_fm() -> Result<(Trajectories, FlowMatching<HyperGrid>)> {
        let (env, trajs) = handmade()?;
        let log_edge_flow = FunctionEstimator::new(
            &env,
            EstimatorRole::LogEdgeFlow,
            &ModuleConfig::Zero,
            &Device::Cpu,
        )?;
        let p = FmParametrization::new(log_edge_flow)?;
        Ok((trajs, FlowMatching::new(p, env, FmConfig::default())))
    }

    #[test]
    fn test_handmade_scores() -> Result<()> {
        let (trajs, loss) = zero_fm()?;
        let l2 = 2f32.ln();
        let l3 = 3f32.ln();

        // [1,0], [0,1] and [0,2] have one parent each; the first two have
        // three children, the last one two.
        let fm = loss
            .flow_matching_scores(&trajs.intermediary_states()?)?
            .to_vec1::<f32>()?;
        for (s, e) in fm.iter().zip([-l3, -l3, -l2].iter()) {
            assert!((s - e).abs() < 1e-5, "{} != {}", s, e);
        }

        let rm = loss.reward_matching_scores(&trajs)?.to_vec1::<f32>()?;
        let expected_rm = [-0.1f32.ln(), -0.6f32.ln(), -0.6f32.ln()];
        for (s, e) in rm.iter().zip(expected_rm.iter()) {
            assert!((s - e).abs() < 1e-5, "{} != {}", s, e);
        }

        let expected = (2.0 * l3 * l3 + l2 * l2) / 3.0
            + 0.5 * expected_rm.iter().map(|e| e * e).sum::<f32>() / 3.0;
        let loss = loss.with_config(FmConfig::default().alpha(0.5));
        let value = loss.loss(&trajs)?.to_scalar::<f32>()?;
        assert!((value - expected).abs() < 1e-4, "{} != {}", value, expected);
        Ok(())
    }

    #[test]
    fn test_loss_on_states() -> Result<()> {
        let (trajs, loss) = zero_fm()?;
        let l2 = 2f32.ln();
        let l3 = 3f32.ln();
        let states = trajs.visited_states()?;

        // Three copies of the source are only reward matched. Every row can
        // exit, and zero flows leave `-log R` as the reward matching score.
        let rm = loss.env().log_reward(&states);
        let expected = (2.0 * l3 * l3 + l2 * l2) / 3.0
            + 0.5 * rm.iter().map(|r| r * r).sum::<f32>() / 6.0;
        let loss = loss.with_config(FmConfig::default().alpha(0.5));
        let value = loss.loss(&states)?.to_scalar::<f32>()?;
        assert!((value - expected).abs() < 1e-4, "{} != {}", value, expected);

        // Sink rows neither exit nor have parents.
        let sinks = loss.env().sink_states(2)?;
        let err = loss.loss(&sinks).err().expect("sink states carry no flow");
        assert!(matches!(
            err.downcast_ref::<GfnError>(),
            Some(GfnError::ShapeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_try_from() -> Result<()> {
        let (env, _) = handmade()?;
        let device = Device::Cpu;
        let set = EstimatorSet::default()
            .logit_pf(FunctionEstimator::new(
                &env,
                EstimatorRole::LogitPf,
                &ModuleConfig::Uniform,
                &device,
            )?)
            .logit_pb(FunctionEstimator::new(
                &env,
                EstimatorRole::LogitPb,
                &ModuleConfig::Uniform,
                &device,
            )?)
            .log_f(FunctionEstimator::new(
                &env,
                EstimatorRole::LogStateFlow,
                &ModuleConfig::Zero,
                &device,
            )?);
        let db = AnyParametrization::build(Scheme::DetailedBalance, set)?;
        let err = FlowMatching::try_from((db, env)).err().expect("DB has no edge flows");
        assert!(matches!(
            err.downcast_ref::<GfnError>(),
            Some(GfnError::MissingEstimator { role, .. }) if role == "log_edge_flow"
        ));
        Ok(())
    }
}
