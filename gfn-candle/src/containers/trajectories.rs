//! A batch of rollouts.
use super::{States, Transitions};
use anyhow::Result;
use gfn_core::{util::check_indices, Container, GfnError, ObjectKind};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use std::fmt;

/// A batch of rollouts stored time-major.
///
/// `states[t]` holds the `n_trajectories` states at step `t`, for
/// `t = 0..=max_length`. `actions[[t, i]]` moves `states[t]` to
/// `states[t + 1]` in rollout `i`. A rollout takes `when_is_done[i]` actions,
/// the exit action included, so `states[when_is_done[i]]` is the sink state
/// and every later entry is padding (the same state, action `-1`, log-prob
/// `0`). Backward rollouts end at the source state instead.
///
/// `log_rewards[i]` is the log-reward of the terminating state
/// `states[when_is_done[i] - 1]`, see [`Trajectories::last_states`].
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectories {
    states: Vec<States>,
    actions: Array2<i64>,
    log_probs: Array2<f32>,
    when_is_done: Array1<usize>,
    log_rewards: Array1<f32>,
    is_backward: bool,
}

impl Trajectories {
    /// Builds a batch of rollouts, checking that all arrays agree.
    pub fn new(
        states: Vec<States>,
        actions: Array2<i64>,
        log_probs: Array2<f32>,
        when_is_done: Array1<usize>,
        log_rewards: Array1<f32>,
        is_backward: bool,
    ) -> Result<Self> {
        let (max_length, n) = actions.dim();
        if states.len() != max_length + 1 {
            return Err(GfnError::ShapeMismatch(format!(
                "{} state steps for {} action steps",
                states.len(),
                max_length
            ))
            .into());
        }
        if let Some(t) = states.iter().position(|s| s.len() != n) {
            return Err(GfnError::ShapeMismatch(format!(
                "states at step {} hold {} rows, expected {}",
                t,
                states[t].len(),
                n
            ))
            .into());
        }
        if log_probs.dim() != (max_length, n) {
            return Err(GfnError::ShapeMismatch(format!(
                "log_probs of shape {:?}, expected {:?}",
                log_probs.dim(),
                (max_length, n)
            ))
            .into());
        }
        if when_is_done.len() != n || log_rewards.len() != n {
            return Err(GfnError::ShapeMismatch(format!(
                "{} termination indices and {} log-rewards for {} rollouts",
                when_is_done.len(),
                log_rewards.len(),
                n
            ))
            .into());
        }
        if let Some(&index) = when_is_done.iter().find(|&&d| d > max_length) {
            return Err(GfnError::DoneIndexOutOfRange { index, max_length }.into());
        }
        let longest = when_is_done.iter().copied().max().unwrap_or(0);
        if longest != max_length {
            return Err(GfnError::ShapeMismatch(format!(
                "max_length = {} but the longest rollout takes {} actions",
                max_length, longest
            ))
            .into());
        }

        Ok(Self {
            states,
            actions,
            log_probs,
            when_is_done,
            log_rewards,
            is_backward,
        })
    }

    /// States at each step, `max_length + 1` entries.
    pub fn states(&self) -> &[States] {
        &self.states
    }

    /// Actions, shape `(max_length, n_trajectories)`.
    pub fn actions(&self) -> &Array2<i64> {
        &self.actions
    }

    /// Log-probabilities of the actions under the sampling policy.
    pub fn log_probs(&self) -> &Array2<f32> {
        &self.log_probs
    }

    /// Number of actions taken by each rollout.
    pub fn when_is_done(&self) -> &Array1<usize> {
        &self.when_is_done
    }

    /// Log-rewards of the terminating states.
    pub fn log_rewards(&self) -> &Array1<f32> {
        &self.log_rewards
    }

    /// Whether the rollouts were sampled with a backward policy.
    pub fn is_backward(&self) -> bool {
        self.is_backward
    }

    /// Number of rollouts.
    pub fn n_trajectories(&self) -> usize {
        self.when_is_done.len()
    }

    /// Length of the longest rollout.
    pub fn max_length(&self) -> usize {
        self.actions.nrows()
    }

    /// The state before the last action of each rollout.
    pub fn last_states(&self) -> Result<States> {
        let picks = self
            .when_is_done
            .iter()
            .enumerate()
            .map(|(i, &d)| match d {
                0 => Err(GfnError::ShapeMismatch(format!(
                    "rollout {} takes no action",
                    i
                ))),
                d => Ok((d - 1, i)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        States::gather(&self.states, &picks)
    }

    /// Every visited state but the sink state, seed states included, ordered
    /// by step then rollout.
    pub fn visited_states(&self) -> Result<States> {
        States::gather(&self.states, &self.valid_steps())
    }

    /// Visited states that are neither the seed state nor the sink state,
    /// ordered by step then rollout.
    pub fn intermediary_states(&self) -> Result<States> {
        States::gather(&self.states, &self.intermediary_picks())
    }

    pub(crate) fn intermediary_picks(&self) -> Vec<(usize, usize)> {
        self.valid_steps()
            .into_iter()
            .filter(|&(t, _)| t > 0)
            .collect()
    }

    /// `(t, i)` for every valid step, ordered by step then rollout.
    pub(crate) fn valid_steps(&self) -> Vec<(usize, usize)> {
        (0..self.max_length())
            .flat_map(|t| {
                self.when_is_done
                    .iter()
                    .enumerate()
                    .filter(move |&(_, &d)| t < d)
                    .map(move |(i, _)| (t, i))
            })
            .collect()
    }

    /// Flattens all valid steps into a batch of transitions, ordered by step
    /// then rollout.
    pub fn to_transitions(&self) -> Result<Transitions> {
        let picks = self.valid_steps();
        let next_picks = picks.iter().map(|&(t, i)| (t + 1, i)).collect::<Vec<_>>();
        let states = States::gather(&self.states, &picks)?;
        let next_states = States::gather(&self.states, &next_picks)?;
        let is_done = match self.is_backward {
            false => next_states.is_sink_state(),
            true => next_states.is_initial_state(),
        };
        let actions = picks.iter().map(|&(t, i)| self.actions[[t, i]]).collect();
        let log_probs = picks.iter().map(|&(t, i)| self.log_probs[[t, i]]).collect();
        let log_rewards = picks
            .iter()
            .zip(is_done.iter())
            .map(|(&(_, i), &done)| if done { self.log_rewards[i] } else { 0.0 })
            .collect();

        Transitions::new(
            states,
            actions,
            next_states,
            is_done,
            log_probs,
            log_rewards,
            self.is_backward,
        )
    }

    /// Appends `pad` steps of padding, repeating the final step like the
    /// samplers do for finished rollouts.
    fn pad(&mut self, pad: usize) -> Result<()> {
        if pad == 0 {
            return Ok(());
        }
        let n = self.n_trajectories();
        let last = self.states[self.max_length()].clone();
        self.states.extend(std::iter::repeat(last).take(pad));
        self.actions = concatenate(
            Axis(0),
            &[self.actions.view(), Array2::from_elem((pad, n), -1).view()],
        )?;
        self.log_probs = concatenate(
            Axis(0),
            &[self.log_probs.view(), Array2::zeros((pad, n)).view()],
        )?;
        Ok(())
    }
}

impl Container for Trajectories {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Trajectories
    }

    fn len(&self) -> usize {
        self.n_trajectories()
    }

    /// Selected rollouts, trimmed to the longest of them.
    fn select(&self, ixs: &[usize]) -> Result<Self> {
        check_indices(ixs, self.len())?;
        let when_is_done = self.when_is_done.select(Axis(0), ixs);
        let max_length = when_is_done.iter().copied().max().unwrap_or(0);
        let states = self.states[..=max_length]
            .iter()
            .map(|s| s.select(ixs))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            states,
            actions: self.actions.slice(s![..max_length, ..]).select(Axis(1), ixs),
            log_probs: self
                .log_probs
                .slice(s![..max_length, ..])
                .select(Axis(1), ixs),
            when_is_done,
            log_rewards: self.log_rewards.select(Axis(0), ixs),
            is_backward: self.is_backward,
        })
    }

    /// Appends rollouts, padding the shorter batch. Nothing is appended if
    /// the batches cannot be merged.
    fn extend(&mut self, other: &Self) -> Result<()> {
        if self.is_backward != other.is_backward {
            return Err(GfnError::ShapeMismatch(
                "cannot mix forward and backward rollouts".into(),
            )
            .into());
        }
        let max_length = self.max_length().max(other.max_length());
        let mut head = self.clone();
        let mut tail = other.clone();
        head.pad(max_length - head.max_length())?;
        tail.pad(max_length - tail.max_length())?;

        let states = head
            .states
            .iter()
            .zip(tail.states.iter())
            .map(|(a, b)| States::stack(&[a.clone(), b.clone()]))
            .collect::<Result<Vec<_>>>()?;
        let actions = concatenate(Axis(1), &[head.actions.view(), tail.actions.view()])?;
        let log_probs = concatenate(Axis(1), &[head.log_probs.view(), tail.log_probs.view()])?;
        let when_is_done = concatenate(
            Axis(0),
            &[head.when_is_done.view(), tail.when_is_done.view()],
        )?;
        let log_rewards = concatenate(
            Axis(0),
            &[head.log_rewards.view(), tail.log_rewards.view()],
        )?;

        *self = Self {
            states,
            actions,
            log_probs,
            when_is_done,
            log_rewards,
            is_backward: self.is_backward,
        };
        Ok(())
    }
}

impl fmt::Display for Trajectories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trajectories(n_trajectories={}, max_length={}, backward={})",
            self.n_trajectories(),
            self.max_length(),
            self.is_backward
        )
    }
}
