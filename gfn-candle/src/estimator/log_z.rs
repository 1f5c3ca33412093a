//! Log-partition estimator of trajectory balance.
use crate::util::named_vars;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{init::Init, VarBuilder, VarMap};
use log::info;
use std::path::Path;

/// A single learnable scalar `log Z` shared across the batch.
///
/// Cloning shares the parameter.
#[derive(Clone)]
pub struct LogZEstimator {
    varmap: VarMap,
    log_z: Tensor,
}

impl LogZEstimator {
    /// Constructs the estimator with `log Z = init`.
    pub fn new(init: f64, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let log_z = vb.get_with_hints(1, "log_z", Init::Const(init))?;
        Ok(Self { varmap, log_z })
    }

    /// The parameter as a tensor of shape `(1,)`.
    pub fn tensor(&self) -> &Tensor {
        &self.log_z
    }

    /// Current value of `log Z`.
    pub fn value(&self) -> Result<f32> {
        Ok(self.log_z.to_vec1::<f32>()?[0])
    }

    /// The learnable parameter, named `log_z`.
    pub fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        named_vars(&self.varmap)
    }

    /// Save the parameter into a file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save log Z to {:?}", path.as_ref());
        Ok(())
    }

    /// Load the parameter from a file.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load log Z from {:?}", path.as_ref());
        Ok(())
    }
}
