//! Hyper-grid environment.
use super::{Env, Preprocessor, PreprocessorKind};
use crate::containers::States;
use anyhow::Result;
use gfn_core::util::ConfigFile;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Configuration of [`HyperGrid`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct HyperGridConfig {
    /// Number of dimensions of the grid.
    pub ndim: usize,

    /// Number of cells along each dimension.
    pub height: usize,

    /// Reward everywhere.
    pub r0: f32,

    /// Reward bonus away from the center.
    pub r1: f32,

    /// Reward bonus in the rings near the corners.
    pub r2: f32,

    /// Preprocessor feeding neural estimators.
    pub preprocessor: PreprocessorKind,
}

impl Default for HyperGridConfig {
    fn default() -> Self {
        Self {
            ndim: 2,
            height: 4,
            r0: 0.1,
            r1: 0.5,
            r2: 2.0,
            preprocessor: PreprocessorKind::KHot,
        }
    }
}

impl HyperGridConfig {
    /// Sets the number of dimensions.
    pub fn ndim(mut self, v: usize) -> Self {
        self.ndim = v;
        self
    }

    /// Sets the number of cells along each dimension.
    pub fn height(mut self, v: usize) -> Self {
        self.height = v;
        self
    }

    /// Sets the reward parameters `(r0, r1, r2)`.
    pub fn rewards(mut self, r0: f32, r1: f32, r2: f32) -> Self {
        self.r0 = r0;
        self.r1 = r1;
        self.r2 = r2;
        self
    }

    /// Sets the preprocessor.
    pub fn preprocessor(mut self, v: PreprocessorKind) -> Self {
        self.preprocessor = v;
        self
    }
}

impl ConfigFile for HyperGridConfig {}

/// An `ndim`-dimensional grid of side `height`.
///
/// Starting at the origin, forward action `d < ndim` increments coordinate
/// `d`, and action `ndim` terminates. Rewards are high in the corners:
///
/// `R(x) = r0 + r1 * prod_d [0.25 < |x_d / (H - 1) - 0.5|]
///        + r2 * prod_d [0.3 < |x_d / (H - 1) - 0.5| < 0.4]`
#[derive(Debug, Clone)]
pub struct HyperGrid {
    config: HyperGridConfig,
}

impl HyperGrid {
    /// Builds the environment.
    pub fn new(config: HyperGridConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &HyperGridConfig {
        &self.config
    }

    fn radix(&self) -> Vec<usize> {
        vec![self.config.height; self.config.ndim]
    }

    /// Every cell of the grid, in row-major order.
    pub fn all_states(&self) -> Result<States> {
        let (ndim, h) = (self.config.ndim, self.config.height);
        let n = h.pow(ndim as u32);
        let tensor = Array2::from_shape_fn((n, ndim), |(i, d)| {
            ((i / h.pow((ndim - 1 - d) as u32)) % h) as i64
        });
        self.make_states(tensor)
    }
}

impl Env for HyperGrid {
    fn state_dim(&self) -> usize {
        self.config.ndim
    }

    fn n_actions(&self) -> usize {
        self.config.ndim + 1
    }

    fn source_state(&self) -> Array1<i64> {
        Array1::zeros(self.config.ndim)
    }

    fn forward_masks(&self, states: ArrayView2<i64>) -> Array2<bool> {
        let top = self.config.height as i64 - 1;
        let ndim = self.config.ndim;
        Array2::from_shape_fn((states.nrows(), ndim + 1), |(i, a)| {
            a == ndim || states[[i, a]] < top
        })
    }

    fn backward_masks(&self, states: ArrayView2<i64>) -> Array2<bool> {
        Array2::from_shape_fn((states.nrows(), self.config.ndim), |(i, a)| {
            states[[i, a]] > 0
        })
    }

    fn maskless_step(&self, state: ArrayView1<i64>, action: usize) -> Array1<i64> {
        let mut next = state.to_owned();
        next[action] += 1;
        next
    }

    fn maskless_backward_step(&self, state: ArrayView1<i64>, action: usize) -> Array1<i64> {
        let mut prev = state.to_owned();
        prev[action] -= 1;
        prev
    }

    fn log_reward(&self, states: &States) -> Array1<f32> {
        let HyperGridConfig { r0, r1, r2, .. } = self.config;
        let top = (self.config.height - 1).max(1) as f32;
        states
            .tensor()
            .outer_iter()
            .map(|row| {
                let ax = row.mapv(|x| (x as f32 / top - 0.5).abs());
                let outer = ax.iter().all(|&v| 0.25 < v);
                let ring = ax.iter().all(|&v| 0.3 < v && v < 0.4);
                let r = r0 + if outer { r1 } else { 0.0 } + if ring { r2 } else { 0.0 };
                r.ln()
            })
            .collect()
    }

    fn max_trajectory_length(&self) -> usize {
        self.config.ndim * (self.config.height - 1) + 1
    }

    fn preprocessor(&self) -> Preprocessor {
        match self.config.preprocessor {
            PreprocessorKind::Identity => Preprocessor::Identity {
                output_dim: self.config.ndim,
            },
            PreprocessorKind::KHot => Preprocessor::KHot {
                radix: self.radix(),
            },
            PreprocessorKind::OneHot => Preprocessor::OneHot {
                radix: self.radix(),
            },
        }
    }

    fn n_states(&self) -> Option<usize> {
        Some(self.config.height.pow(self.config.ndim as u32))
    }

    fn index_preprocessor(&self) -> Option<Preprocessor> {
        Some(Preprocessor::Enum {
            radix: self.radix(),
        })
    }

    fn random_states(&self, n: usize, rng: &mut dyn RngCore) -> Result<States> {
        let h = self.config.height as i64;
        let tensor = Array2::from_shape_fn((n, self.config.ndim), |_| rng.gen_range(0..h));
        self.make_states(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfn_core::{Container, GfnError};
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};
    use tempdir::TempDir;

    #[test]
    fn test_masks() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default().ndim(2).height(3));
        let states = env.make_states(array![[0, 0], [2, 1], [2, 2]])?;
        assert_eq!(
            states.forward_masks(),
            &array![[true, true, true], [false, true, true], [false, false, true]]
        );
        assert_eq!(
            states.backward_masks(),
            &array![[false, false], [true, true], [true, true]]
        );
        Ok(())
    }

    #[test]
    fn test_step() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default().ndim(2).height(3));
        let states = env.reset(3)?;
        let (next, done) = env.step(&states, &array![0, 2, -1])?;
        assert_eq!(next.tensor(), &array![[1, 0], [-1, -1], [0, 0]]);
        assert_eq!(done, array![false, true, false]);

        let (prev, done) = env.backward_step(&next.select(&[0])?, &array![0])?;
        assert_eq!(prev.tensor(), &array![[0, 0]]);
        assert_eq!(done, array![true]);

        let top = env.make_states(array![[2, 0]])?;
        let err = env.step(&top, &array![0]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GfnError>(),
            Some(&GfnError::IllegalAction { row: 0, action: 0 })
        );
        Ok(())
    }

    #[test]
    fn test_rewards() -> Result<()> {
        let close = |r: Array1<f32>, expected: &[f32]| {
            r.iter().zip(expected.iter()).all(|(r, e)| (r - e).abs() < 1e-5)
        };

        let env = HyperGrid::new(HyperGridConfig::default().height(8));
        let states = env.make_states(array![[1, 1], [1, 6], [0, 1], [3, 4]])?;
        assert!(close(env.reward(&states), &[2.6, 2.6, 0.6, 0.1]));

        let env = HyperGrid::new(HyperGridConfig::default());
        let states = env.make_states(array![[0, 0], [1, 1], [0, 3], [3, 3]])?;
        assert!(close(env.reward(&states), &[0.6, 0.1, 0.6, 0.6]));
        assert_eq!(env.max_trajectory_length(), 7);
        assert_eq!(env.n_states(), Some(16));
        assert_eq!(env.all_states()?.len(), 16);
        Ok(())
    }

    #[test]
    fn test_random_states() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let states = env.random_states(20, &mut rng)?;
        assert_eq!(states.len(), 20);
        assert!(states.tensor().iter().all(|&x| (0..4).contains(&x)));
        Ok(())
    }

    #[test]
    fn test_config_file() -> Result<()> {
        let config = HyperGridConfig::default()
            .ndim(3)
            .height(8)
            .preprocessor(PreprocessorKind::OneHot);
        let dir = TempDir::new("hypergrid")?;
        let path = dir.path().join("hypergrid.yaml");
        config.save(&path)?;
        assert_eq!(HyperGridConfig::load(&path)?, config);
        Ok(())
    }
}
