//! Conversion of raw states into estimator inputs.
use anyhow::Result;
use candle_core::{Device, Tensor};
use gfn_core::GfnError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Kind of preprocessor selected in an environment configuration.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum PreprocessorKind {
    /// Raw coordinates cast to floats.
    Identity,

    /// Concatenated one-hot encodings of each coordinate.
    KHot,

    /// One-hot encoding of the enumerated state.
    OneHot,
}

/// Maps a batch of raw states to the input tensor of a function approximator.
///
/// `KHot`, `OneHot` and `Enum` expect factored discrete states where
/// coordinate `d` takes values in `0..radix[d]`. States are enumerated in
/// row-major (mixed radix) order.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum Preprocessor {
    /// Raw coordinates cast to `f32`, shape `(n, output_dim)`.
    Identity {
        /// Dimension of a state.
        output_dim: usize,
    },

    /// Concatenated one-hot encodings, shape `(n, sum(radix))`.
    KHot {
        /// Cardinality of each coordinate.
        radix: Vec<usize>,
    },

    /// One-hot encoding of the state index, shape `(n, prod(radix))`.
    OneHot {
        /// Cardinality of each coordinate.
        radix: Vec<usize>,
    },

    /// State index as `u32`, shape `(n,)`. Used by tabular modules.
    Enum {
        /// Cardinality of each coordinate.
        radix: Vec<usize>,
    },
}

impl Preprocessor {
    /// Dimension of the preprocessed representation of one state.
    pub fn output_dim(&self) -> usize {
        match self {
            Self::Identity { output_dim } => *output_dim,
            Self::KHot { radix } => radix.iter().sum(),
            Self::OneHot { radix } => radix.iter().product(),
            Self::Enum { .. } => 1,
        }
    }

    fn radix(&self) -> Option<&[usize]> {
        match self {
            Self::Identity { .. } => None,
            Self::KHot { radix } | Self::OneHot { radix } | Self::Enum { radix } => Some(radix),
        }
    }

    /// Returns the row-major index of each state.
    ///
    /// # Errors
    ///
    /// Fails for the identity preprocessor and for coordinates out of range,
    /// which includes sink states.
    pub fn indices(&self, states: &Array2<i64>) -> Result<Vec<u32>> {
        let radix = self.radix().ok_or_else(|| {
            GfnError::InvalidConfig("the identity preprocessor does not enumerate states".into())
        })?;
        check_coordinates(states, radix)?;

        Ok(states
            .outer_iter()
            .map(|row| {
                row.iter()
                    .zip(radix.iter())
                    .fold(0usize, |ix, (&x, &r)| ix * r + x as usize) as u32
            })
            .collect())
    }

    /// Converts raw states into an estimator input.
    pub fn preprocess(&self, states: &Array2<i64>, device: &Device) -> Result<Tensor> {
        let n = states.nrows();
        let xs = match self {
            Self::Identity { output_dim } => {
                if states.ncols() != *output_dim {
                    return Err(GfnError::ShapeMismatch(format!(
                        "expected states of dimension {}, got {}",
                        output_dim,
                        states.ncols()
                    ))
                    .into());
                }
                let data = states.iter().map(|&x| x as f32).collect::<Vec<_>>();
                Tensor::from_vec(data, (n, *output_dim), device)?
            }
            Self::KHot { radix } => {
                check_coordinates(states, radix)?;
                let dim = self.output_dim();
                let mut data = vec![0f32; n * dim];
                for (i, row) in states.outer_iter().enumerate() {
                    let mut offset = i * dim;
                    for (&x, &r) in row.iter().zip(radix.iter()) {
                        data[offset + x as usize] = 1.0;
                        offset += r;
                    }
                }
                Tensor::from_vec(data, (n, dim), device)?
            }
            Self::OneHot { .. } => {
                let dim = self.output_dim();
                let mut data = vec![0f32; n * dim];
                for (i, ix) in self.indices(states)?.into_iter().enumerate() {
                    data[i * dim + ix as usize] = 1.0;
                }
                Tensor::from_vec(data, (n, dim), device)?
            }
            Self::Enum { .. } => Tensor::from_vec(self.indices(states)?, n, device)?,
        };

        Ok(xs)
    }
}

fn check_coordinates(states: &Array2<i64>, radix: &[usize]) -> Result<()> {
    if states.ncols() != radix.len() {
        return Err(GfnError::ShapeMismatch(format!(
            "expected states of dimension {}, got {}",
            radix.len(),
            states.ncols()
        ))
        .into());
    }
    for row in states.outer_iter() {
        for (&x, &r) in row.iter().zip(radix.iter()) {
            if x < 0 || x as usize >= r {
                return Err(GfnError::ShapeMismatch(format!(
                    "coordinate {} out of range 0..{}",
                    x, r
                ))
                .into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_indices_are_row_major() -> Result<()> {
        let p = Preprocessor::Enum { radix: vec![3, 4] };
        let states = array![[0, 0], [0, 3], [1, 0], [2, 3]];
        assert_eq!(p.indices(&states)?, vec![0, 3, 4, 11]);
        Ok(())
    }

    #[test]
    fn test_khot() -> Result<()> {
        let p = Preprocessor::KHot { radix: vec![2, 3] };
        let xs = p.preprocess(&array![[1, 2], [0, 0]], &Device::Cpu)?;
        assert_eq!(
            xs.to_vec2::<f32>()?,
            vec![vec![0., 1., 0., 0., 1.], vec![1., 0., 1., 0., 0.]]
        );
        Ok(())
    }

    #[test]
    fn test_one_hot() -> Result<()> {
        let p = Preprocessor::OneHot { radix: vec![2, 2] };
        let xs = p.preprocess(&array![[1, 0]], &Device::Cpu)?;
        assert_eq!(xs.to_vec2::<f32>()?, vec![vec![0., 0., 1., 0.]]);
        Ok(())
    }

    #[test]
    fn test_sink_state_is_rejected() {
        let p = Preprocessor::KHot { radix: vec![2, 2] };
        assert!(p.preprocess(&array![[-1, -1]], &Device::Cpu).is_err());
        let p = Preprocessor::Identity { output_dim: 3 };
        assert!(p.preprocess(&array![[0, 1]], &Device::Cpu).is_err());
    }
}
