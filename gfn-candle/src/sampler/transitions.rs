//! Sampling of single steps.
use super::ActionsSampler;
use crate::{
    containers::{States, Transitions},
    env::Env,
};
use anyhow::Result;
use gfn_core::{Container, GfnError};
use log::debug;
use ndarray::Array1;

/// Samples one step from each of a batch of states.
///
/// The sampler keeps no state between calls; to continue rollouts, feed the
/// `next_states` of a batch back into
/// [`TransitionsSampler::sample_transitions_from`].
pub struct TransitionsSampler<E: Env> {
    env: E,
    actions_sampler: ActionsSampler,
}

impl<E: Env> TransitionsSampler<E> {
    /// Constructs a sampler.
    pub fn new(env: E, actions_sampler: ActionsSampler) -> Self {
        Self {
            env,
            actions_sampler,
        }
    }

    /// Samples one forward step from `n` copies of the source state.
    pub fn sample_transitions(&mut self, n: usize) -> Result<Transitions> {
        if self.actions_sampler.is_backward() {
            return Err(GfnError::InvalidConfig(
                "backward transitions must be seeded with states".into(),
            )
            .into());
        }
        let states = self.env.reset(n)?;
        self.sample_transitions_from(states)
    }

    /// Samples one step from each given state. Sink states are dropped, and
    /// so are source states for a backward sampler.
    pub fn sample_transitions_from(&mut self, states: States) -> Result<Transitions> {
        let is_backward = self.actions_sampler.is_backward();
        let done = match is_backward {
            false => states.is_sink_state(),
            true => states.is_initial_state(),
        };
        let keep = (0..states.len()).filter(|&i| !done[i]).collect::<Vec<_>>();
        let states = states.select(&keep)?;

        let (actions, log_probs) = self.actions_sampler.sample(&states)?;
        let (next_states, is_done) = match is_backward {
            false => self.env.step(&states, &actions)?,
            true => self.env.backward_step(&states, &actions)?,
        };
        // Forward steps that exit are rewarded for the state they leave.
        let mut log_rewards = Array1::zeros(states.len());
        let done_ixs = (0..states.len()).filter(|&i| is_done[i]).collect::<Vec<_>>();
        if !is_backward && !done_ixs.is_empty() {
            let rewarded = self.env.log_reward(&states.select(&done_ixs)?);
            for (&i, &r) in done_ixs.iter().zip(rewarded.iter()) {
                log_rewards[i] = r;
            }
        }
        debug!("Sampled {} transitions", states.len());

        Transitions::new(
            states,
            actions,
            next_states,
            is_done,
            log_probs,
            log_rewards,
            is_backward,
        )
    }
}
