use crate::{
    containers::{States, Trajectories},
    estimator::FunctionEstimator,
    util::{gather_columns, ids_to_tensor, mask_to_tensor, masked_log_softmax},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use gfn_core::{Container, GfnError, Scheme};

/// A loss on batches of type `B`.
pub trait Loss<B> {
    /// Computes the loss, a rank-0 tensor.
    fn loss(&self, batch: &B) -> Result<Tensor>;
}

/// Fails on batches a loss cannot be computed on.
pub(super) fn check_batch<C: Container>(batch: &C, is_backward: bool) -> Result<()> {
    if is_backward {
        return Err(GfnError::BackwardTrajectories.into());
    }
    if batch.is_empty() {
        return Err(GfnError::ShapeMismatch("the batch is empty".into()).into());
    }
    Ok(())
}

/// Error of a loss built from a parametrization that lacks `role`.
pub(super) fn missing(scheme: Scheme, role: &str) -> anyhow::Error {
    GfnError::MissingEstimator {
        scheme: scheme.to_string(),
        role: role.to_string(),
    }
    .into()
}

/// Sums per-step values into per-rollout totals, shape `(n,)`.
pub(super) fn sum_per_rollout(
    values: &Tensor,
    steps: &[(usize, usize)],
    n: usize,
) -> Result<Tensor> {
    let zeros = Tensor::zeros(n, DType::F32, values.device())?;
    if steps.is_empty() {
        return Ok(zeros);
    }
    let ids = steps.iter().map(|&(_, i)| i).collect::<Vec<_>>();
    Ok(zeros.index_add(&ids_to_tensor(&ids, values.device())?, values, 0)?)
}

/// Log-rewards clamped from below.
pub(super) fn clamped(
    log_rewards: impl IntoIterator<Item = f32>,
    clip_min: f64,
    device: &Device,
) -> Result<Tensor> {
    let xs = log_rewards
        .into_iter()
        .map(|r| r.max(clip_min as f32))
        .collect::<Vec<_>>();
    let n = xs.len();
    Ok(Tensor::from_vec(xs, n, device)?)
}

/// Log-probabilities of the given actions under the policy of `estimator`.
pub(super) fn policy_log_probs(
    estimator: &FunctionEstimator,
    states: &States,
    actions: &[usize],
    backward: bool,
) -> Result<Tensor> {
    let logits = estimator.forward(states)?;
    let masks = match backward {
        false => states.forward_masks(),
        true => states.backward_masks(),
    };
    let log_probs = masked_log_softmax(&logits, &mask_to_tensor(masks, logits.device())?)?;
    gather_columns(&log_probs, actions)
}

/// Actions taken at the given steps, checked to be non-padding.
pub(super) fn step_actions(trajs: &Trajectories, steps: &[(usize, usize)]) -> Result<Vec<usize>> {
    steps
        .iter()
        .map(|&(t, i)| match trajs.actions()[[t, i]] {
            a if a < 0 => Err(GfnError::IllegalAction { row: i, action: a }.into()),
            a => Ok(a as usize),
        })
        .collect()
}

/// Log-probabilities of the forward and backward policies at each of the
/// given valid steps, shape `(steps.len(),)` each.
///
/// The backward log-probability of an exit step is zero. With `on_policy`,
/// forward log-probabilities are those recorded at sampling time.
pub(super) fn step_log_probs(
    logit_pf: &FunctionEstimator,
    logit_pb: &FunctionEstimator,
    trajs: &Trajectories,
    steps: &[(usize, usize)],
    on_policy: bool,
) -> Result<(Tensor, Tensor)> {
    if steps.is_empty() {
        return Err(GfnError::ShapeMismatch("the batch takes no action".into()).into());
    }
    let device = logit_pf.device();
    let k = steps.len();
    let actions = step_actions(trajs, steps)?;

    let log_pf = match on_policy {
        true => {
            let lps = steps
                .iter()
                .map(|&(t, i)| trajs.log_probs()[[t, i]])
                .collect::<Vec<_>>();
            Tensor::from_vec(lps, k, device)?
        }
        false => {
            let states = States::gather(trajs.states(), steps)?;
            policy_log_probs(logit_pf, &states, &actions, false)?
        }
    };

    let exit = trajs.states()[0].n_actions() - 1;
    let non_exit = (0..k).filter(|&j| actions[j] != exit).collect::<Vec<_>>();
    let log_pb = Tensor::zeros(k, DType::F32, device)?;
    let log_pb = match non_exit.is_empty() {
        true => log_pb,
        false => {
            let next = non_exit
                .iter()
                .map(|&j| (steps[j].0 + 1, steps[j].1))
                .collect::<Vec<_>>();
            let next = States::gather(trajs.states(), &next)?;
            let acts = non_exit.iter().map(|&j| actions[j]).collect::<Vec<_>>();
            let pb = policy_log_probs(logit_pb, &next, &acts, true)?;
            log_pb.index_add(&ids_to_tensor(&non_exit, device)?, &pb, 0)?
        }
    };

    Ok((log_pf, log_pb))
}
