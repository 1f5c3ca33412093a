use super::{mlp_forward, NeuralNetConfig};
use crate::model::SubModel;
use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use gfn_core::GfnError;

/// Returns the hidden layers described by [`NeuralNetConfig`].
fn create_linear_layers(vb: VarBuilder, in_dim: usize, config: &NeuralNetConfig) -> Result<Vec<Linear>> {
    let h = config.hidden_dim;
    let in_out_pairs = std::iter::once((in_dim, h))
        .chain(std::iter::repeat((h, h)).take(config.n_hidden_layers - 1));

    in_out_pairs
        .enumerate()
        .map(|(i, (in_dim, out_dim))| Ok(linear(in_dim, out_dim, vb.pp(format!("ln{}", i)))?))
        .collect()
}

/// Hidden layers of a neural estimator, each followed by the activation.
///
/// The output has `hidden_dim` features. A linear head on top of it turns the
/// torso into an estimator, and several heads may share one torso.
pub struct Mlp {
    config: NeuralNetConfig,
    in_dim: usize,
    device: Device,
    layers: Vec<Linear>,
}

impl Mlp {
    /// Dimension of the input.
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// Dimension of the output.
    pub fn out_dim(&self) -> usize {
        self.config.hidden_dim
    }
}

impl SubModel for Mlp {
    type Config = NeuralNetConfig;

    fn build(vb: VarBuilder, in_dim: usize, config: Self::Config) -> Result<Self> {
        if config.n_hidden_layers == 0 || config.hidden_dim == 0 {
            return Err(GfnError::InvalidConfig(
                "a torso needs at least one non-empty hidden layer".into(),
            )
            .into());
        }
        let device = vb.device().clone();
        let layers = create_linear_layers(vb, in_dim, &config)?;

        Ok(Self {
            config,
            in_dim,
            device,
            layers,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = xs.to_device(&self.device)?;
        Ok(mlp_forward(xs, &self.layers, self.config.activation)?)
    }
}
