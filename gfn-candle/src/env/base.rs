//! Contract of a decision process.
use super::Preprocessor;
use crate::containers::States;
use anyhow::Result;
use gfn_core::{Container, GfnError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::RngCore;

/// A discrete decision process whose states form a DAG rooted at the source
/// state.
///
/// Forward actions are `0..n_actions`, the last one being the exit action
/// that moves a state to the sink. Backward action `b` undoes forward action
/// `b`, so there are `n_actions - 1` backward actions. The padding action
/// `-1` leaves a state unchanged.
///
/// Implementors provide the required methods. Batched stepping, masking of
/// sink rows and legality checks come with the provided methods.
pub trait Env {
    /// Dimension of a state.
    fn state_dim(&self) -> usize;

    /// Number of forward actions, the exit action included.
    fn n_actions(&self) -> usize;

    /// The source state `s0`.
    fn source_state(&self) -> Array1<i64>;

    /// The sink state `sf`.
    fn sink_state(&self) -> Array1<i64> {
        Array1::from_elem(self.state_dim(), -1)
    }

    /// Legal forward actions of each row, shape `(n, n_actions)`.
    ///
    /// Values computed for sink rows are discarded.
    fn forward_masks(&self, states: ArrayView2<i64>) -> Array2<bool>;

    /// Legal backward actions of each row, shape `(n, n_actions - 1)`.
    ///
    /// Values computed for sink rows are discarded.
    fn backward_masks(&self, states: ArrayView2<i64>) -> Array2<bool>;

    /// Applies a legal non-exit forward action to a single state.
    fn maskless_step(&self, state: ArrayView1<i64>, action: usize) -> Array1<i64>;

    /// Applies a legal backward action to a single state.
    fn maskless_backward_step(&self, state: ArrayView1<i64>, action: usize) -> Array1<i64>;

    /// Log-reward of terminating states.
    fn log_reward(&self, states: &States) -> Array1<f32>;

    /// Upper bound on the number of actions of a rollout, the exit included.
    fn max_trajectory_length(&self) -> usize;

    /// Preprocessor feeding neural estimators.
    fn preprocessor(&self) -> Preprocessor;

    /// Number of non-sink states, if they can be enumerated.
    fn n_states(&self) -> Option<usize> {
        None
    }

    /// Preprocessor mapping states to their index, if they can be enumerated.
    fn index_preprocessor(&self) -> Option<Preprocessor> {
        None
    }

    /// Draws `n` states uniformly at random.
    fn random_states(&self, n: usize, rng: &mut dyn RngCore) -> Result<States>;

    /// The exit action.
    fn exit_action(&self) -> usize {
        self.n_actions() - 1
    }

    /// Builds a batch of states, computing their masks.
    fn make_states(&self, tensor: Array2<i64>) -> Result<States> {
        if tensor.ncols() != self.state_dim() {
            return Err(GfnError::ShapeMismatch(format!(
                "expected states of dimension {}, got {}",
                self.state_dim(),
                tensor.ncols()
            ))
            .into());
        }
        let sink = self.sink_state();
        let mut forward_masks = self.forward_masks(tensor.view());
        let mut backward_masks = self.backward_masks(tensor.view());
        for (i, row) in tensor.outer_iter().enumerate() {
            if row == sink.view() {
                forward_masks.row_mut(i).fill(false);
                backward_masks.row_mut(i).fill(false);
            }
        }

        States::new(
            tensor,
            forward_masks,
            backward_masks,
            self.source_state(),
            sink,
        )
    }

    /// `n` copies of the source state.
    fn reset(&self, n: usize) -> Result<States> {
        let s0 = self.source_state();
        let tensor = Array2::from_shape_fn((n, self.state_dim()), |(_, j)| s0[j]);
        self.make_states(tensor)
    }

    /// `n` copies of the sink state.
    fn sink_states(&self, n: usize) -> Result<States> {
        let sf = self.sink_state();
        let tensor = Array2::from_shape_fn((n, self.state_dim()), |(_, j)| sf[j]);
        self.make_states(tensor)
    }

    /// Applies one forward action per row.
    ///
    /// Returns the next states and, for each row, whether the exit action was
    /// taken. Rows with action `-1` are left unchanged.
    fn step(&self, states: &States, actions: &Array1<i64>) -> Result<(States, Array1<bool>)> {
        check_actions(states, actions)?;
        let exit = self.exit_action();
        let sink = self.sink_state();
        let mut next = states.tensor().clone();
        let mut done = Array1::from_elem(states.len(), false);

        for (i, &a) in actions.iter().enumerate() {
            if a == -1 {
                continue;
            }
            if a < 0 || a as usize >= self.n_actions() || !states.forward_masks()[[i, a as usize]]
            {
                return Err(GfnError::IllegalAction { row: i, action: a }.into());
            }
            let a = a as usize;
            if a == exit {
                next.row_mut(i).assign(&sink);
                done[i] = true;
            } else {
                let row = self.maskless_step(states.tensor().row(i), a);
                next.row_mut(i).assign(&row);
            }
        }

        Ok((self.make_states(next)?, done))
    }

    /// Applies one backward action per row.
    ///
    /// Returns the previous states and, for each row, whether the source state
    /// was reached. Rows with action `-1` are left unchanged.
    fn backward_step(
        &self,
        states: &States,
        actions: &Array1<i64>,
    ) -> Result<(States, Array1<bool>)> {
        check_actions(states, actions)?;
        let source = self.source_state();
        let mut prev = states.tensor().clone();
        let mut done = Array1::from_elem(states.len(), false);

        for (i, &a) in actions.iter().enumerate() {
            if a == -1 {
                continue;
            }
            if a < 0
                || a as usize >= self.n_actions() - 1
                || !states.backward_masks()[[i, a as usize]]
            {
                return Err(GfnError::IllegalAction { row: i, action: a }.into());
            }
            let row = self.maskless_backward_step(states.tensor().row(i), a as usize);
            done[i] = row == source;
            prev.row_mut(i).assign(&row);
        }

        Ok((self.make_states(prev)?, done))
    }

    /// Reward of terminating states.
    fn reward(&self, states: &States) -> Array1<f32> {
        self.log_reward(states).mapv(f32::exp)
    }
}

fn check_actions(states: &States, actions: &Array1<i64>) -> Result<()> {
    if states.len() != actions.len() {
        return Err(GfnError::ShapeMismatch(format!(
            "{} actions for {} states",
            actions.len(),
            states.len()
        ))
        .into());
    }
    Ok(())
}
