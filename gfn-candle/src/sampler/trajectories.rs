//! Sampling of complete rollouts.
use super::{ActionsSampler, TrajectoriesSamplerConfig};
use crate::{
    containers::{States, Trajectories},
    env::Env,
    estimator::FunctionEstimator,
};
use anyhow::Result;
use gfn_core::{Container, GfnError};
use log::debug;
use ndarray::{Array1, Array2};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Samples rollouts by repeatedly drawing actions and stepping an [`Env`].
///
/// The training loop built on top of this sampler looks as follows:
///
/// ```mermaid
/// graph LR
///     A[FunctionEstimator]-->|logits|B[ActionsSampler]
///     B -->|actions|C[TrajectoriesSampler]
///     C -->|Env::step|C
///     C -->|Trajectories|D[ReplayBuffer]
///     C -->|Trajectories|E[Loss]
///     D -->|Trajectories|E
///     E -->|scalar tensor|F[Optimizer]
///     F -->|parameters|A
/// ```
///
/// * Forward samplers start from the source state and a rollout is done once
///   it reaches the sink state. Backward samplers start from given states and
///   a rollout is done once it reaches the source state.
/// * Only rows that are not done are evaluated. Done rows record the padding
///   action `-1` with log-probability `0`.
/// * Sampling stops when every rollout is done or after the environment's
///   [`Env::max_trajectory_length`] steps, optionally tightened by
///   [`TrajectoriesSamplerConfig::max_steps`]. A rollout cut by the cap has
///   `when_is_done` equal to the number of steps taken without having reached
///   its end; callers should exclude such rollouts before storing them.
pub struct TrajectoriesSampler<E: Env> {
    env: E,
    actions_sampler: ActionsSampler,
    max_steps: Option<usize>,
}

impl<E: Env> TrajectoriesSampler<E> {
    /// Constructs a sampler from an already built actions sampler.
    pub fn new(env: E, actions_sampler: ActionsSampler, max_steps: Option<usize>) -> Self {
        Self {
            env,
            actions_sampler,
            max_steps,
        }
    }

    /// Constructs a sampler from an estimator and a configuration.
    pub fn build(
        env: E,
        estimator: FunctionEstimator,
        config: TrajectoriesSamplerConfig,
    ) -> Result<Self> {
        let actions_sampler = ActionsSampler::new(estimator, config.actions)?;
        Ok(Self::new(env, actions_sampler, config.max_steps))
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Whether the sampler draws backward rollouts.
    pub fn is_backward(&self) -> bool {
        self.actions_sampler.is_backward()
    }

    /// Samples `n` forward rollouts from the source state.
    ///
    /// Backward samplers need seed states, see
    /// [`TrajectoriesSampler::sample_trajectories_from`].
    pub fn sample_trajectories(&mut self, n: usize) -> Result<Trajectories> {
        if self.is_backward() {
            return Err(GfnError::InvalidConfig(
                "backward rollouts must be seeded with states".into(),
            )
            .into());
        }
        let states = self.env.reset(n)?;
        self.sample_trajectories_from(states)
    }

    /// Same as [`TrajectoriesSampler::sample_trajectories`].
    pub fn sample(&mut self, n: usize) -> Result<Trajectories> {
        self.sample_trajectories(n)
    }

    /// Samples one rollout per given state.
    pub fn sample_trajectories_from(&mut self, states: States) -> Result<Trajectories> {
        let n = states.len();
        let is_backward = self.is_backward();
        let cap = self
            .max_steps
            .map_or(self.env.max_trajectory_length(), |m| {
                m.min(self.env.max_trajectory_length())
            });
        let mut dones = match is_backward {
            false => states.is_sink_state(),
            true => states.is_initial_state(),
        };
        let mut when_is_done = Array1::<usize>::zeros(n);
        let mut trajectories_states = vec![states.clone()];
        let mut trajectories_actions: Vec<Array1<i64>> = vec![];
        let mut trajectories_log_probs: Vec<Array1<f32>> = vec![];
        let mut states = states;
        let mut step = 0;

        while dones.iter().any(|d| !d) && step < cap {
            let active = (0..n).filter(|&i| !dones[i]).collect::<Vec<_>>();
            let (a, lp) = self.actions_sampler.sample(&states.select(&active)?)?;
            let mut actions = Array1::from_elem(n, -1i64);
            let mut log_probs = Array1::<f32>::zeros(n);
            for (k, &i) in active.iter().enumerate() {
                actions[i] = a[k];
                log_probs[i] = lp[k];
            }

            let (next, new_dones) = match is_backward {
                false => self.env.step(&states, &actions)?,
                true => self.env.backward_step(&states, &actions)?,
            };
            step += 1;
            for &i in active.iter().filter(|&&i| new_dones[i]) {
                dones[i] = true;
                when_is_done[i] = step;
            }

            trajectories_actions.push(actions);
            trajectories_log_probs.push(log_probs);
            trajectories_states.push(next.clone());
            states = next;
        }
        for i in (0..n).filter(|&i| !dones[i]) {
            when_is_done[i] = step;
        }

        let log_rewards = self.log_rewards(&trajectories_states, &when_is_done, is_backward)?;
        let actions = Array2::from_shape_fn((step, n), |(t, i)| trajectories_actions[t][i]);
        let log_probs = Array2::from_shape_fn((step, n), |(t, i)| trajectories_log_probs[t][i]);
        debug!(
            "Sampled {} {} rollouts in {} steps",
            n,
            if is_backward { "backward" } else { "forward" },
            step
        );

        Trajectories::new(
            trajectories_states,
            actions,
            log_probs,
            when_is_done,
            log_rewards,
            is_backward,
        )
    }

    /// Log-rewards of the terminating states of forward rollouts, of the seed
    /// states of backward rollouts.
    fn log_rewards(
        &self,
        states: &[States],
        when_is_done: &Array1<usize>,
        is_backward: bool,
    ) -> Result<Array1<f32>> {
        let n = when_is_done.len();
        let picks = match is_backward {
            false => (0..n)
                .filter(|&i| when_is_done[i] > 0)
                .map(|i| (when_is_done[i] - 1, i))
                .collect::<Vec<_>>(),
            true => {
                let is_sink = states[0].is_sink_state();
                (0..n).filter(|&i| !is_sink[i]).map(|i| (0, i)).collect()
            }
        };
        let mut log_rewards = Array1::zeros(n);
        if picks.is_empty() {
            return Ok(log_rewards);
        }
        let rewarded = self.env.log_reward(&States::gather(states, &picks)?);
        for (&(_, i), &r) in picks.iter().zip(rewarded.iter()) {
            log_rewards[i] = r;
        }
        Ok(log_rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{HyperGrid, HyperGridConfig},
        estimator::EstimatorRole,
        model::ModuleConfig,
        sampler::ActionsSamplerConfig,
    };
    use candle_core::Device;

    fn env() -> HyperGrid {
        HyperGrid::new(HyperGridConfig::default().ndim(2).height(4))
    }

    fn estimator(env: &HyperGrid, role: EstimatorRole) -> Result<FunctionEstimator> {
        FunctionEstimator::new(env, role, &ModuleConfig::Uniform, &Device::Cpu)
    }

    #[test]
    fn test_forward_rollouts() -> Result<()> {
        let env = env();
        let pf = estimator(&env, EstimatorRole::LogitPf)?;
        let mut sampler =
            TrajectoriesSampler::build(env.clone(), pf, TrajectoriesSamplerConfig::default())?;
        let trajs = sampler.sample(10)?;

        assert_eq!(trajs.n_trajectories(), 10);
        let max_length = *trajs.when_is_done().iter().max().unwrap();
        assert_eq!(trajs.max_length(), max_length);
        assert!(max_length <= env.max_trajectory_length());
        for (i, &d) in trajs.when_is_done().iter().enumerate() {
            assert!(d >= 1);
            assert_eq!(trajs.actions()[[d - 1, i]], 2);
            assert!(trajs.states()[d].is_sink_state()[i]);
            assert!(trajs.actions().column(i).iter().skip(d).all(|&a| a == -1));
            assert!(trajs.log_probs().column(i).iter().skip(d).all(|&p| p == 0.0));
        }
        let expected = env.log_reward(&trajs.last_states()?);
        assert_eq!(trajs.log_rewards(), &expected);
        Ok(())
    }

    #[test]
    fn test_step_cap() -> Result<()> {
        let env = env();
        let pf = estimator(&env, EstimatorRole::LogitPf)?;
        let config = TrajectoriesSamplerConfig::default()
            .actions(ActionsSamplerConfig::default().sf_bias(100.0))
            .max_steps(2);
        let mut sampler = TrajectoriesSampler::build(env, pf, config)?;
        let trajs = sampler.sample(4)?;
        assert_eq!(trajs.max_length(), 2);
        assert!(trajs.when_is_done().iter().all(|&d| d == 2));
        Ok(())
    }

    #[test]
    fn test_backward_rollouts() -> Result<()> {
        let env = env();
        let pb = estimator(&env, EstimatorRole::LogitPb)?;
        let mut sampler =
            TrajectoriesSampler::build(env.clone(), pb, TrajectoriesSamplerConfig::default())?;
        assert!(sampler.sample(3).is_err());

        let seeds = env.all_states()?;
        let trajs = sampler.sample_trajectories_from(seeds.clone())?;
        assert!(trajs.is_backward());
        assert_eq!(trajs.log_rewards(), &env.log_reward(&seeds));
        for (i, row) in seeds.tensor().outer_iter().enumerate() {
            let d = trajs.when_is_done()[i];
            assert_eq!(d as i64, row.sum());
            assert!(trajs.states()[d].is_initial_state()[i]);
        }
        Ok(())
    }
}
