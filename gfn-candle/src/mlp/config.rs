use candle_core::Tensor;
use gfn_core::util::ConfigFile;
use serde::{Deserialize, Serialize};

/// Activation function applied after each hidden layer.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum Activation {
    /// Rectified linear unit.
    ReLU,

    /// Hyperbolic tangent.
    Tanh,

    /// Gaussian error linear unit.
    Gelu,
}

impl Activation {
    pub(super) fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::ReLU => xs.relu(),
            Self::Tanh => xs.tanh(),
            Self::Gelu => xs.gelu(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp), the torso of a neural estimator.
pub struct NeuralNetConfig {
    /// Width of the hidden layers.
    pub hidden_dim: usize,

    /// Number of hidden layers, at least one.
    pub n_hidden_layers: usize,

    /// Activation after each hidden layer.
    pub activation: Activation,
}

impl Default for NeuralNetConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 256,
            n_hidden_layers: 2,
            activation: Activation::ReLU,
        }
    }
}

impl NeuralNetConfig {
    /// Sets the width of the hidden layers.
    pub fn hidden_dim(mut self, v: usize) -> Self {
        self.hidden_dim = v;
        self
    }

    /// Sets the number of hidden layers.
    pub fn n_hidden_layers(mut self, v: usize) -> Self {
        self.n_hidden_layers = v;
        self
    }

    /// Sets the activation function.
    pub fn activation(mut self, v: Activation) -> Self {
        self.activation = v;
        self
    }
}

impl ConfigFile for NeuralNetConfig {}
