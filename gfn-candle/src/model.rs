//! Function approximators behind the estimators.
use crate::{
    mlp::{Mlp, NeuralNetConfig},
    util::named_vars,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{init::Init, linear, Linear, Module, VarBuilder, VarMap};
use gfn_core::{util::ConfigFile, GfnError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Neural network model not owning its [`VarMap`].
///
/// [`VarMap`]: candle_nn::VarMap
pub trait SubModel: Sized {
    /// Configuration from which the model is constructed.
    type Config;

    /// Builds the model for inputs of dimension `in_dim`.
    fn build(vb: VarBuilder, in_dim: usize, config: Self::Config) -> Result<Self>;

    /// Forward computation.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;
}

/// A torso owning its parameters, shared between estimators through an
/// [`Arc`].
pub struct Torso {
    varmap: VarMap,
    mlp: Mlp,
}

impl Torso {
    /// Builds a torso for inputs of dimension `in_dim`.
    pub fn build(in_dim: usize, config: NeuralNetConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mlp = Mlp::build(vb.pp("torso"), in_dim, config)?;
        Ok(Self { varmap, mlp })
    }

    /// Dimension of the input.
    pub fn in_dim(&self) -> usize {
        self.mlp.in_dim()
    }

    /// Dimension of the output.
    pub fn out_dim(&self) -> usize {
        self.mlp.out_dim()
    }

    /// Forward computation.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.mlp.forward(xs)
    }

    /// Parameters of the torso, named `torso.*`.
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        named_vars(&self.varmap)
    }
}

/// Kind of function approximator of an estimator.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum ModuleConfig {
    /// A torso followed by a linear head.
    NeuralNet(NeuralNetConfig),

    /// One learnable row per state. Requires an enumerable environment.
    Tabular,

    /// Constant zero logits, i.e. a uniform policy.
    Uniform,

    /// Constant zero output.
    Zero,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::NeuralNet(NeuralNetConfig::default())
    }
}

impl ConfigFile for ModuleConfig {}

/// A function approximator.
///
/// Cloning shares the parameters.
#[derive(Clone)]
pub enum GfnModule {
    /// A torso followed by a linear head.
    NeuralNet {
        /// Possibly shared torso.
        torso: Arc<Torso>,
        /// Parameters of the head, named `head.*`.
        varmap: VarMap,
        /// Linear head.
        head: Linear,
    },

    /// One learnable row per state; the input holds state indices.
    Tabular {
        /// Parameters, a single variable named `table`.
        varmap: VarMap,
        /// Table of shape `(n_states, output_dim)`.
        table: Tensor,
    },

    /// Constant zero logits.
    Uniform {
        /// Dimension of the output.
        output_dim: usize,
    },

    /// Constant zero output.
    Zero {
        /// Dimension of the output.
        output_dim: usize,
    },
}

impl GfnModule {
    /// Builds a module for inputs of dimension `in_dim`.
    ///
    /// `n_states` is required by tabular modules.
    pub fn build(
        config: &ModuleConfig,
        in_dim: usize,
        output_dim: usize,
        n_states: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        match config {
            ModuleConfig::NeuralNet(config) => {
                let torso = Arc::new(Torso::build(in_dim, config.clone(), device)?);
                Self::with_torso(torso, output_dim, device)
            }
            ModuleConfig::Tabular => {
                let n_states = n_states.ok_or_else(|| {
                    GfnError::InvalidConfig("tabular modules need enumerable states".into())
                })?;
                let varmap = VarMap::new();
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
                let table = vb.get_with_hints((n_states, output_dim), "table", Init::Const(0.))?;
                Ok(Self::Tabular { varmap, table })
            }
            ModuleConfig::Uniform => Ok(Self::Uniform { output_dim }),
            ModuleConfig::Zero => Ok(Self::Zero { output_dim }),
        }
    }

    /// Builds a linear head on top of an existing torso.
    pub fn with_torso(torso: Arc<Torso>, output_dim: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let head = linear(torso.out_dim(), output_dim, vb.pp("head"))?;
        Ok(Self::NeuralNet {
            torso,
            varmap,
            head,
        })
    }

    /// The torso, if any.
    pub fn torso(&self) -> Option<Arc<Torso>> {
        match self {
            Self::NeuralNet { torso, .. } => Some(torso.clone()),
            _ => None,
        }
    }

    /// Evaluates the module on a batch of `n` preprocessed states.
    pub fn forward(&self, xs: &Tensor, n: usize, device: &Device) -> Result<Tensor> {
        let ys = match self {
            Self::NeuralNet { torso, head, .. } => head.forward(&torso.forward(xs)?)?,
            Self::Tabular { table, .. } => table.index_select(xs, 0)?,
            Self::Uniform { output_dim } | Self::Zero { output_dim } => {
                Tensor::zeros((n, *output_dim), DType::F32, device)?
            }
        };
        Ok(ys)
    }

    /// Learnable parameters with their names.
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        match self {
            Self::NeuralNet { torso, varmap, .. } => {
                let mut vars = torso.named_vars()?;
                vars.extend(named_vars(varmap)?);
                Ok(vars)
            }
            Self::Tabular { varmap, .. } => named_vars(varmap),
            Self::Uniform { .. } | Self::Zero { .. } => Ok(vec![]),
        }
    }
}
