//! Multilayer perceptron.
mod base;
mod config;
pub use base::Mlp;
use candle_core::Tensor;
use candle_nn::{Linear, Module};
pub use config::{Activation, NeuralNetConfig};

fn mlp_forward(xs: Tensor, layers: &[Linear], act: Activation) -> candle_core::Result<Tensor> {
    let mut xs = xs;
    for layer in layers.iter() {
        xs = act.forward(&layer.forward(&xs)?)?;
    }
    Ok(xs)
}
