use crate::{
    containers::States,
    env::{Env, Preprocessor},
    model::{GfnModule, ModuleConfig, Torso},
    util::{load_vars, save_vars},
};
use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use gfn_core::{Container, GfnError};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, sync::Arc};

/// What an estimator approximates.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum EstimatorRole {
    /// Logits of the forward policy, `n_actions` outputs.
    LogitPf,

    /// Logits of the backward policy, `n_actions - 1` outputs.
    LogitPb,

    /// Log state flow, one output.
    LogStateFlow,

    /// Log edge flows, `n_actions` outputs.
    LogEdgeFlow,
}

impl EstimatorRole {
    /// Name of the role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LogitPf => "logit_pf",
            Self::LogitPb => "logit_pb",
            Self::LogStateFlow => "log_state_flow",
            Self::LogEdgeFlow => "log_edge_flow",
        }
    }

    /// Number of outputs for an environment with `n_actions` forward actions.
    pub fn output_dim(&self, n_actions: usize) -> usize {
        match self {
            Self::LogitPf | Self::LogEdgeFlow => n_actions,
            Self::LogitPb => n_actions - 1,
            Self::LogStateFlow => 1,
        }
    }
}

impl fmt::Display for EstimatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A function of states backed by a [`GfnModule`].
///
/// Cloning shares the parameters.
#[derive(Clone)]
pub struct FunctionEstimator {
    role: EstimatorRole,
    module: GfnModule,
    preprocessor: Preprocessor,
    output_dim: usize,
    device: Device,
}

impl FunctionEstimator {
    /// Builds an estimator of the given role for `env`.
    ///
    /// Tabular modules are fed with the index preprocessor of the environment,
    /// other modules with its default preprocessor.
    pub fn new<E: Env>(
        env: &E,
        role: EstimatorRole,
        config: &ModuleConfig,
        device: &Device,
    ) -> Result<Self> {
        let preprocessor = match config {
            ModuleConfig::Tabular => env.index_preprocessor().ok_or_else(|| {
                GfnError::InvalidConfig("tabular modules need enumerable states".into())
            })?,
            _ => env.preprocessor(),
        };
        let output_dim = role.output_dim(env.n_actions());
        let module = GfnModule::build(
            config,
            preprocessor.output_dim(),
            output_dim,
            env.n_states(),
            device,
        )?;

        Ok(Self {
            role,
            module,
            preprocessor,
            output_dim,
            device: device.clone(),
        })
    }

    /// Builds an estimator whose head sits on an existing torso.
    pub fn with_torso<E: Env>(
        env: &E,
        role: EstimatorRole,
        torso: Arc<Torso>,
        device: &Device,
    ) -> Result<Self> {
        let preprocessor = env.preprocessor();
        if torso.in_dim() != preprocessor.output_dim() {
            return Err(GfnError::ShapeMismatch(format!(
                "torso expects inputs of dimension {}, the preprocessor outputs {}",
                torso.in_dim(),
                preprocessor.output_dim()
            ))
            .into());
        }
        let output_dim = role.output_dim(env.n_actions());
        let module = GfnModule::with_torso(torso, output_dim, device)?;

        Ok(Self {
            role,
            module,
            preprocessor,
            output_dim,
            device: device.clone(),
        })
    }

    /// Role of the estimator.
    pub fn role(&self) -> EstimatorRole {
        self.role
    }

    /// Number of outputs per state.
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// The device of the parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The torso of a neural estimator.
    pub fn torso(&self) -> Option<Arc<Torso>> {
        self.module.torso()
    }

    /// Evaluates the estimator, returning a tensor of shape `(n, output_dim)`.
    pub fn forward(&self, states: &States) -> Result<Tensor> {
        let n = states.len();
        let xs = self.preprocessor.preprocess(states.tensor(), &self.device)?;
        let ys = self.module.forward(&xs, n, &self.device)?;
        if ys.dims() != [n, self.output_dim] {
            return Err(GfnError::ShapeMismatch(format!(
                "{} estimator returned {:?}, expected {:?}",
                self.role,
                ys.dims(),
                (n, self.output_dim)
            ))
            .into());
        }
        Ok(ys)
    }

    /// Learnable parameters with their names.
    pub fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        self.module.named_vars()
    }

    /// Saves the parameters into a safetensors file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        save_vars(&self.named_parameters()?, path)
    }

    /// Loads the parameters from a safetensors file.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        load_vars(&self.named_parameters()?, path, &self.device)
    }

    /// Checks that the estimator has the expected role.
    pub(crate) fn expect_role(&self, expected: EstimatorRole) -> Result<()> {
        match self.role == expected {
            true => Ok(()),
            false => Err(GfnError::EstimatorRoleMismatch {
                expected: expected.to_string(),
                found: self.role.to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for FunctionEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = match &self.module {
            GfnModule::NeuralNet { .. } => "NeuralNet",
            GfnModule::Tabular { .. } => "Tabular",
            GfnModule::Uniform { .. } => "Uniform",
            GfnModule::Zero { .. } => "Zero",
        };
        f.debug_struct("FunctionEstimator")
            .field("role", &self.role)
            .field("module", &module)
            .field("output_dim", &self.output_dim)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{HyperGrid, HyperGridConfig},
        mlp::NeuralNetConfig,
    };
    use tempdir::TempDir;

    fn nn() -> ModuleConfig {
        ModuleConfig::NeuralNet(NeuralNetConfig::default().hidden_dim(16))
    }

    #[test]
    fn test_output_dims() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default().ndim(3));
        let states = env.reset(5)?;
        let device = Device::Cpu;
        for (role, dim) in [
            (EstimatorRole::LogitPf, 4),
            (EstimatorRole::LogitPb, 3),
            (EstimatorRole::LogStateFlow, 1),
            (EstimatorRole::LogEdgeFlow, 4),
        ] {
            for config in [nn(), ModuleConfig::Tabular, ModuleConfig::Uniform] {
                let est = FunctionEstimator::new(&env, role, &config, &device)?;
                assert_eq!(est.forward(&states)?.dims(), &[5, dim]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_shared_torso_and_roles() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let device = Device::Cpu;
        let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
        let pb = FunctionEstimator::with_torso(
            &env,
            EstimatorRole::LogitPb,
            pf.torso().unwrap(),
            &device,
        )?;
        assert_eq!(pb.forward(&env.reset(2)?)?.dims(), &[2, 2]);
        assert!(pb.expect_role(EstimatorRole::LogitPb).is_ok());

        let err = pb.expect_role(EstimatorRole::LogitPf).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GfnError>(),
            Some(&GfnError::EstimatorRoleMismatch {
                expected: "logit_pf".into(),
                found: "logit_pb".into()
            })
        );
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let device = Device::Cpu;
        let states = env.all_states()?;
        let est1 = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
        let mut est2 = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;

        let dir = TempDir::new("estimator")?;
        let path = dir.path().join("pf.safetensors");
        est1.save(&path)?;
        est2.load(&path)?;

        let diff = (est1.forward(&states)? - est2.forward(&states)?)?
            .abs()?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }
}
