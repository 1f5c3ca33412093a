//! Sub-trajectory balance.
use super::{
    base::{check_batch, missing, step_actions, step_log_probs},
    Loss, SubTbConfig,
};
use crate::{
    containers::{States, Trajectories},
    parametrization::{AnyParametrization, SubTbParametrization},
    util::ids_to_tensor,
};
use anyhow::Result;
use candle_core::{DType, Tensor};
use gfn_core::{GfnError, Scheme, Weighing};
use itertools::Itertools;
use log::trace;

/// A sub-trajectory `s_start -> ... -> s_end` of rollout `rollout`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: usize,
    end: usize,
    rollout: usize,
}

impl Segment {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Sub-trajectory balance loss.
///
/// For every sub-trajectory `s_i -> ... -> s_j` of a rollout, the residual is
/// `log F(s_i) + sum log PF - log F(s_j) - sum log PB`, where `log F` of the
/// sink state reached by the exit action is replaced by the clamped
/// log-reward of the terminating state. The loss is the weighted sum of the
/// squared residuals; the weights are given by [`Weighing`] and sum to one:
///
/// | weighing | sub-trajectories | weight |
/// |---|---|---|
/// | `DB` | length 1 | `1 / #steps` |
/// | `ModifiedDB` | length 1 | `1 / (n * done_k)` |
/// | `TB` | complete rollouts | `1 / n` |
/// | `equal` | all | `1 / #sub-trajectories` |
/// | `equal_within` | all | `2 / (n * done_k * (done_k + 1))` |
/// | `geometric` | all | `(1 - l) l^(L-1) / (1 - l^T) / #(length L)` |
/// | `geometric_within` | all | `l^(L-1) / (n * D_k)` |
///
/// with `n` rollouts, `done_k` the length of rollout `k`, `L` the length of
/// the sub-trajectory, `T` the longest rollout, `l` the decay `lamda` and
/// `D_k = sum_{L=1}^{done_k} (done_k - L + 1) l^(L-1)`.
///
/// With the `TB` weighing the loss equals [`TrajectoryBalance`] with
/// `log Z = log F(s0)`, and with the `DB` weighing it equals
/// [`DetailedBalance`] on the transitions of the batch.
///
/// [`TrajectoryBalance`]: super::TrajectoryBalance
/// [`DetailedBalance`]: super::DetailedBalance
#[derive(Clone, Debug)]
pub struct SubTrajectoryBalance {
    parametrization: SubTbParametrization,
    config: SubTbConfig,
}

impl SubTrajectoryBalance {
    /// Constructs the loss.
    ///
    /// # Errors
    ///
    /// [`GfnError::InvalidConfig`] if `lamda` is not in `(0, 1]`.
    pub fn new(parametrization: SubTbParametrization, config: SubTbConfig) -> Result<Self> {
        if !(config.lamda > 0.0 && config.lamda <= 1.0) {
            return Err(GfnError::InvalidConfig(format!(
                "lamda must be in (0, 1], got {}",
                config.lamda
            ))
            .into());
        }
        Ok(Self {
            parametrization,
            config,
        })
    }

    /// Replaces the configuration.
    pub fn with_config(self, config: SubTbConfig) -> Result<Self> {
        Self::new(self.parametrization, config)
    }

    /// The trained parametrization.
    pub fn parametrization(&self) -> &SubTbParametrization {
        &self.parametrization
    }

    /// The configuration.
    pub fn config(&self) -> &SubTbConfig {
        &self.config
    }

    /// Weighted segments of the batch; segments of weight zero are left out.
    ///
    /// Rollouts that take no action have no segment and do not count in the
    /// per-rollout averages, so the weights always sum to one.
    fn segments(&self, when_is_done: &[usize]) -> Vec<(Segment, f64)> {
        let n = when_is_done.iter().filter(|&&d| d > 0).count() as f64;
        let lamda = self.config.lamda;
        let max_length = when_is_done.iter().copied().max().unwrap_or(0);
        let all = when_is_done.iter().enumerate().flat_map(|(k, &done)| {
            (0..=done)
                .tuple_combinations()
                .map(move |(start, end)| Segment {
                    start,
                    end,
                    rollout: k,
                })
        });

        match self.config.weighing {
            Weighing::DetailedBalance => {
                let n_steps = when_is_done.iter().sum::<usize>() as f64;
                all.filter(|s| s.len() == 1)
                    .map(|s| (s, 1.0 / n_steps))
                    .collect()
            }
            Weighing::ModifiedDetailedBalance => all
                .filter(|s| s.len() == 1)
                .map(|s| (s, 1.0 / (n * when_is_done[s.rollout] as f64)))
                .collect(),
            Weighing::TrajectoryBalance => all
                .filter(|s| s.start == 0 && s.end == when_is_done[s.rollout])
                .map(|s| (s, 1.0 / n))
                .collect(),
            Weighing::Equal => {
                let total = when_is_done
                    .iter()
                    .map(|&d| d * (d + 1) / 2)
                    .sum::<usize>() as f64;
                all.map(|s| (s, 1.0 / total)).collect()
            }
            Weighing::EqualWithin => all
                .map(|s| {
                    let d = when_is_done[s.rollout] as f64;
                    (s, 2.0 / (d * (d + 1.0)) / n)
                })
                .collect(),
            Weighing::Geometric => {
                // Number of segments of each length, then the mass of each length.
                let counts = (1..=max_length)
                    .map(|l| {
                        when_is_done
                            .iter()
                            .map(|&d| (d + 1).saturating_sub(l))
                            .sum::<usize>() as f64
                    })
                    .collect::<Vec<_>>();
                let mass = |l: usize| match lamda < 1.0 {
                    true => {
                        (1.0 - lamda) * lamda.powi(l as i32 - 1)
                            / (1.0 - lamda.powi(max_length as i32))
                    }
                    false => 1.0 / max_length as f64,
                };
                all.map(|s| (s, mass(s.len()) / counts[s.len() - 1]))
                    .collect()
            }
            Weighing::GeometricWithin => {
                let norms = when_is_done
                    .iter()
                    .map(|&d| {
                        (1..=d)
                            .map(|l| (d - l + 1) as f64 * lamda.powi(l as i32 - 1))
                            .sum::<f64>()
                    })
                    .collect::<Vec<_>>();
                all.map(|s| {
                    let w = lamda.powi(s.len() as i32 - 1) / norms[s.rollout] / n;
                    (s, w)
                })
                .collect()
            }
        }
    }

    /// Residuals of the weighted segments, with their weights.
    fn residuals(&self, trajs: &Trajectories) -> Result<(Tensor, Tensor)> {
        check_batch(trajs, trajs.is_backward())?;
        let p = &self.parametrization;
        let device = p.log_f().device();
        let n = trajs.n_trajectories();
        let t_max = trajs.max_length();
        let when_is_done = trajs.when_is_done().to_vec();
        let flat = |t: usize, i: usize| t * n + i;

        let steps = trajs.valid_steps();
        let (log_pf, log_pb) =
            step_log_probs(p.logit_pf(), p.logit_pb(), trajs, &steps, self.config.on_policy)?;
        let step_ids = ids_to_tensor(
            &steps.iter().map(|&(t, i)| flat(t, i)).collect::<Vec<_>>(),
            device,
        )?;
        let zeros = Tensor::zeros(t_max * n, DType::F32, device)?;
        let log_pf = zeros.index_add(&step_ids, &log_pf, 0)?;
        let log_pb = zeros.index_add(&step_ids, &log_pb, 0)?;

        // Cumulated log-probability ratios: c[t, k] = sum_{u < t} (log PF - log PB).
        let c = (log_pf - log_pb)?.reshape((t_max, n))?.cumsum(0)?;
        let c = Tensor::cat(&[Tensor::zeros((1, n), DType::F32, device)?, c], 0)?;

        // Flows g[t, k]: log F(s_t) before the end of the rollout, the
        // log-reward at the end of a rollout that exited, log F(s_done) at the
        // end of one cut short.
        let exit = trajs.states()[0].n_actions() - 1;
        let last_actions = step_actions(
            trajs,
            &(0..n)
                .filter(|&k| when_is_done[k] > 0)
                .map(|k| (when_is_done[k] - 1, k))
                .collect::<Vec<_>>(),
        )?;
        let mut exited = vec![false; n];
        for (k, a) in (0..n).filter(|&k| when_is_done[k] > 0).zip(last_actions) {
            exited[k] = a == exit;
        }
        let mut picks = steps.clone();
        picks.extend(
            (0..n)
                .filter(|&k| when_is_done[k] > 0 && !exited[k])
                .map(|k| (when_is_done[k], k)),
        );
        let log_f = p
            .log_f()
            .forward(&States::gather(trajs.states(), &picks)?)?
            .squeeze(1)?;
        let pick_ids = ids_to_tensor(
            &picks.iter().map(|&(t, i)| flat(t, i)).collect::<Vec<_>>(),
            device,
        )?;
        let mut rewards = vec![0f32; (t_max + 1) * n];
        let clip = self.config.log_reward_clip_min as f32;
        for k in (0..n).filter(|&k| exited[k]) {
            rewards[flat(when_is_done[k], k)] = trajs.log_rewards()[k].max(clip);
        }
        let g = Tensor::from_vec(rewards, (t_max + 1) * n, device)?
            .index_add(&pick_ids, &log_f, 0)?;

        // The residual of segment (i, j) is q[i] - q[j].
        let q = (g - c.flatten_all()?)?;
        let segments = self.segments(&when_is_done);
        let (starts, ends): (Vec<usize>, Vec<usize>) = segments
            .iter()
            .map(|(s, _)| (flat(s.start, s.rollout), flat(s.end, s.rollout)))
            .unzip();
        let residuals = (q.index_select(&ids_to_tensor(&starts, device)?, 0)?
            - q.index_select(&ids_to_tensor(&ends, device)?, 0)?)?;
        let weights = segments.iter().map(|&(_, w)| w as f32).collect::<Vec<_>>();
        let weights = Tensor::from_vec(weights, segments.len(), device)?;
        Ok((residuals, weights))
    }
}

impl Loss<Trajectories> for SubTrajectoryBalance {
    fn loss(&self, trajs: &Trajectories) -> Result<Tensor> {
        let (residuals, weights) = self.residuals(trajs)?;
        let loss = (residuals.sqr()? * weights)?.sum_all()?;
        trace!("SubTB({}) loss: {:?}", self.config.weighing, loss);
        Ok(loss)
    }
}

impl TryFrom<AnyParametrization> for SubTrajectoryBalance {
    type Error = anyhow::Error;

    fn try_from(p: AnyParametrization) -> Result<Self> {
        let p = match p {
            AnyParametrization::SubTb(p) => p,
            AnyParametrization::Db(p) => p.into(),
            AnyParametrization::Tb(_) => {
                return Err(missing(Scheme::SubTrajectoryBalance, "log_f"))
            }
            AnyParametrization::Fm(_) => {
                return Err(missing(Scheme::SubTrajectoryBalance, "logit_pf"))
            }
        };
        Self::new(p, SubTbConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::Env,
        estimator::{EstimatorRole, FunctionEstimator},
        fixture::handmade,
        model::ModuleConfig,
    };
    use candle_core::Device;
    use gfn_core::Container;
    use ndarray::{array, Array2};

    fn uniform_subtb(config: SubTbConfig) -> Result<(Trajectories, SubTrajectoryBalance)> {
        let (env, trajs) = handmade()?;
        let device = Device::Cpu;
        let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &ModuleConfig::Uniform, &device)?;
        let pb = FunctionEstimator::new(&env, EstimatorRole::LogitPb, &ModuleConfig::Uniform, &device)?;
        let log_f = FunctionEstimator::new(&env, EstimatorRole::LogStateFlow, &ModuleConfig::Zero, &device)?;
        let p = SubTbParametrization::new(pf, pb, log_f)?;
        Ok((trajs, SubTrajectoryBalance::new(p, config)?))
    }

    #[test]
    fn test_weights_sum_to_one() -> Result<()> {
        let when_is_done = [2, 1, 3, 5];
        for weighing in Weighing::all() {
            for lamda in [0.5, 0.9, 1.0] {
                let config = SubTbConfig::default().weighing(weighing).lamda(lamda);
                let (_, loss) = uniform_subtb(config)?;
                let segments = loss.segments(&when_is_done);
                let total = segments.iter().map(|(_, w)| w).sum::<f64>();
                assert!((total - 1.0).abs() < 1e-9, "{} {}: {}", weighing, lamda, total);
                assert!(segments.iter().all(|&(s, w)| w > 0.0 && s.len() >= 1));
            }
        }
        Ok(())
    }

    #[test]
    fn test_rollouts_without_actions_are_ignored() -> Result<()> {
        for weighing in Weighing::all() {
            let (_, loss) = uniform_subtb(SubTbConfig::default().weighing(weighing))?;
            let segments = loss.segments(&[2, 0, 3, 1]);
            let total = segments.iter().map(|(_, w)| w).sum::<f64>();
            assert!((total - 1.0).abs() < 1e-9, "{}: {}", weighing, total);
            assert!(segments.iter().all(|&(s, _)| s.rollout != 1));

            // A rollout seeded with the sink state leaves the loss unchanged.
            let (env, trajs) = handmade()?;
            let empty = Trajectories::new(
                vec![env.sink_states(1)?],
                Array2::zeros((0, 1)),
                Array2::zeros((0, 1)),
                array![0],
                array![0.0],
                false,
            )?;
            let mut extended = trajs.clone();
            extended.extend(&empty)?;
            let a = loss.loss(&trajs)?.to_scalar::<f32>()?;
            let b = loss.loss(&extended)?.to_scalar::<f32>()?;
            assert!((a - b).abs() < 1e-5, "{}: {} != {}", weighing, a, b);
        }
        Ok(())
    }

    #[test]
    fn test_segments_of_tb_and_db_weighings() -> Result<()> {
        let when_is_done = [2, 1, 3];
        let (_, loss) = uniform_subtb(SubTbConfig::default().weighing(Weighing::TrajectoryBalance))?;
        let segments = loss.segments(&when_is_done);
        assert_eq!(segments.len(), 3);
        assert!(segments
            .iter()
            .all(|&(s, _)| s.start == 0 && s.end == when_is_done[s.rollout]));

        let (_, loss) = uniform_subtb(SubTbConfig::default().weighing(Weighing::DetailedBalance))?;
        let segments = loss.segments(&when_is_done);
        assert_eq!(segments.len(), 6);
        assert!(segments.iter().all(|&(s, w)| s.len() == 1 && (w - 1.0 / 6.0).abs() < 1e-12));

        let (_, loss) = uniform_subtb(SubTbConfig::default().weighing(Weighing::Equal))?;
        assert_eq!(loss.segments(&when_is_done).len(), 3 + 1 + 6);
        Ok(())
    }

    #[test]
    fn test_handmade_tb_weighing() -> Result<()> {
        let (trajs, loss) =
            uniform_subtb(SubTbConfig::default().weighing(Weighing::TrajectoryBalance))?;
        let l2 = 2f32.ln();
        let l3 = 3f32.ln();
        let scores = [
            -2.0 * l3 - 0.1f32.ln(),
            -l3 - 0.6f32.ln(),
            -2.0 * l3 - l2 - 0.6f32.ln(),
        ];
        let expected = scores.iter().map(|s| s * s).sum::<f32>() / 3.0;
        let value = loss.loss(&trajs)?.to_scalar::<f32>()?;
        assert!((value - expected).abs() < 1e-4, "{} != {}", value, expected);
        Ok(())
    }

    #[test]
    fn test_all_weighings_are_finite() -> Result<()> {
        for weighing in Weighing::all() {
            let (trajs, loss) = uniform_subtb(SubTbConfig::default().weighing(weighing))?;
            let value = loss.loss(&trajs)?.to_scalar::<f32>()?;
            assert!(value.is_finite() && value >= 0.0, "{}: {}", weighing, value);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_lamda() -> Result<()> {
        let (_, loss) = uniform_subtb(SubTbConfig::default())?;
        assert!(loss.with_config(SubTbConfig::default().lamda(0.0)).is_err());
        Ok(())
    }
}
