//! A flat batch of single steps.
use super::States;
use anyhow::Result;
use gfn_core::{util::check_indices, Container, GfnError, ObjectKind};
use ndarray::{concatenate, Array1, Axis};
use std::fmt;

/// A flat batch of independent steps `(state, action, next_state)`.
///
/// `log_rewards[i]` is the log-reward of `states[i]` and is only meaningful
/// where `is_done[i]`, that is when the action of a forward step is the exit
/// action.
#[derive(Clone, Debug, PartialEq)]
pub struct Transitions {
    states: States,
    actions: Array1<i64>,
    next_states: States,
    is_done: Array1<bool>,
    log_probs: Array1<f32>,
    log_rewards: Array1<f32>,
    is_backward: bool,
}

impl Transitions {
    /// Builds a batch of transitions, checking that all arrays agree.
    pub fn new(
        states: States,
        actions: Array1<i64>,
        next_states: States,
        is_done: Array1<bool>,
        log_probs: Array1<f32>,
        log_rewards: Array1<f32>,
        is_backward: bool,
    ) -> Result<Self> {
        let n = states.len();
        let lens = [
            actions.len(),
            next_states.len(),
            is_done.len(),
            log_probs.len(),
            log_rewards.len(),
        ];
        if lens.iter().any(|&l| l != n) {
            return Err(GfnError::ShapeMismatch(format!(
                "transitions of {} states with extents {:?}",
                n, lens
            ))
            .into());
        }

        Ok(Self {
            states,
            actions,
            next_states,
            is_done,
            log_probs,
            log_rewards,
            is_backward,
        })
    }

    /// States the actions were taken in.
    pub fn states(&self) -> &States {
        &self.states
    }

    /// Actions.
    pub fn actions(&self) -> &Array1<i64> {
        &self.actions
    }

    /// States reached by the actions.
    pub fn next_states(&self) -> &States {
        &self.next_states
    }

    /// Whether each step ends its rollout.
    pub fn is_done(&self) -> &Array1<bool> {
        &self.is_done
    }

    /// Log-probabilities of the actions under the sampling policy.
    pub fn log_probs(&self) -> &Array1<f32> {
        &self.log_probs
    }

    /// Log-rewards, meaningful where `is_done`.
    pub fn log_rewards(&self) -> &Array1<f32> {
        &self.log_rewards
    }

    /// Whether the steps were sampled with a backward policy.
    pub fn is_backward(&self) -> bool {
        self.is_backward
    }
}

impl Container for Transitions {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Transitions
    }

    fn len(&self) -> usize {
        self.actions.len()
    }

    fn select(&self, ixs: &[usize]) -> Result<Self> {
        check_indices(ixs, self.len())?;
        Ok(Self {
            states: self.states.select(ixs)?,
            actions: self.actions.select(Axis(0), ixs),
            next_states: self.next_states.select(ixs)?,
            is_done: self.is_done.select(Axis(0), ixs),
            log_probs: self.log_probs.select(Axis(0), ixs),
            log_rewards: self.log_rewards.select(Axis(0), ixs),
            is_backward: self.is_backward,
        })
    }

    fn extend(&mut self, other: &Self) -> Result<()> {
        if self.is_backward != other.is_backward {
            return Err(GfnError::ShapeMismatch(
                "cannot mix forward and backward transitions".into(),
            )
            .into());
        }
        let states = States::stack(&[self.states.clone(), other.states.clone()])?;
        let next_states = States::stack(&[self.next_states.clone(), other.next_states.clone()])?;
        let actions = concatenate(Axis(0), &[self.actions.view(), other.actions.view()])?;
        let is_done = concatenate(Axis(0), &[self.is_done.view(), other.is_done.view()])?;
        let log_probs = concatenate(Axis(0), &[self.log_probs.view(), other.log_probs.view()])?;
        let log_rewards = concatenate(
            Axis(0),
            &[self.log_rewards.view(), other.log_rewards.view()],
        )?;

        *self = Self {
            states,
            actions,
            next_states,
            is_done,
            log_probs,
            log_rewards,
            is_backward: self.is_backward,
        };
        Ok(())
    }
}

impl fmt::Display for Transitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transitions(n_transitions={}, backward={})",
            self.len(),
            self.is_backward
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{Env, HyperGrid, HyperGridConfig},
        fixture::handmade,
    };
    use ndarray::array;

    #[test]
    fn test_select_and_extend() -> Result<()> {
        let (_, trajs) = handmade()?;
        let mut tr = trajs.to_transitions()?;
        let done = tr.select(&[5, 1])?;
        assert_eq!(done.is_done(), &array![true, true]);
        assert_eq!(done.states().tensor(), &array![[0, 2], [0, 0]]);

        tr.extend(&done)?;
        assert_eq!(tr.len(), 8);
        assert_eq!(tr.actions()[7], 2);
        assert_eq!(tr.next_states().len(), 8);
        Ok(())
    }

    #[test]
    fn test_failed_extend_leaves_batch_unchanged() -> Result<()> {
        let (_, trajs) = handmade()?;
        let tr = trajs.to_transitions()?;

        let cube = HyperGrid::new(HyperGridConfig::default().ndim(3).height(3));
        let other = Transitions::new(
            cube.make_states(array![[0, 0, 0]])?,
            array![3],
            cube.make_states(array![[-1, -1, -1]])?,
            array![true],
            array![0.0],
            array![0.0],
            false,
        )?;
        let mut extended = tr.clone();
        assert!(extended.extend(&other).is_err());
        assert_eq!(extended, tr);
        Ok(())
    }

    #[test]
    fn test_new_checks_extents() -> Result<()> {
        let (_, trajs) = handmade()?;
        let tr = trajs.to_transitions()?;
        assert!(Transitions::new(
            tr.states().clone(),
            array![0, 1],
            tr.next_states().clone(),
            tr.is_done().clone(),
            tr.log_probs().clone(),
            tr.log_rewards().clone(),
            false,
        )
        .is_err());
        Ok(())
    }
}
