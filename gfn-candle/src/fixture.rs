//! Hand-made batches shared by unit tests.
use crate::{
    containers::Trajectories,
    env::{Env, HyperGrid, HyperGridConfig},
};
use anyhow::Result;
use ndarray::array;

/// Three rollouts on a 2 x 3 grid:
/// `0: (0,0) -x-> (1,0) -exit->`, `1: (0,0) -exit->`,
/// `2: (0,0) -y-> (0,1) -y-> (0,2) -exit->`.
pub fn handmade() -> Result<(HyperGrid, Trajectories)> {
    let env = HyperGrid::new(HyperGridConfig::default().ndim(2).height(3));
    let states = vec![
        env.make_states(array![[0, 0], [0, 0], [0, 0]])?,
        env.make_states(array![[1, 0], [-1, -1], [0, 1]])?,
        env.make_states(array![[-1, -1], [-1, -1], [0, 2]])?,
        env.make_states(array![[-1, -1], [-1, -1], [-1, -1]])?,
    ];
    let actions = array![[0, 2, 1], [2, -1, 1], [-1, -1, 2]];
    let log_probs = array![[-1.0, -1.1, -1.2], [-0.5, 0.0, -0.6], [0.0, 0.0, -0.7]];
    let last = env.make_states(array![[1, 0], [0, 0], [0, 2]])?;
    let log_rewards = env.log_reward(&last);
    let trajs = Trajectories::new(
        states,
        actions,
        log_probs,
        array![2, 1, 3],
        log_rewards,
        false,
    )?;
    Ok((env, trajs))
}
