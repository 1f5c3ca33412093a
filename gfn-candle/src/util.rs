//! Utilities.
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor, Var, D};
use candle_nn::{ops::log_softmax, VarMap};
use log::info;
use ndarray::{Array1, Array2};
use std::{collections::HashMap, path::Path};

/// Log-softmax over the last dimension, restricted to the entries where
/// `mask` (`u8`, same shape as `logits`) is non-zero.
///
/// Masked entries get `-inf`. Every row must have at least one legal entry.
pub fn masked_log_softmax(logits: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let neg_inf = Tensor::full(f32::NEG_INFINITY, logits.dims(), logits.device())?;
    let xs = mask.where_cond(logits, &neg_inf)?;
    Ok(log_softmax(&xs, D::Minus1)?)
}

/// `log(sum(exp(xs)))` along `dim`, which is removed.
///
/// Entries may be `-inf` as long as each slice holds a finite one.
pub fn logsumexp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?.detach();
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?;
    Ok(sum.log()?.broadcast_add(&max)?.squeeze(dim)?)
}

/// Converts a host-side mask into a `u8` tensor of the same shape.
pub fn mask_to_tensor(mask: &Array2<bool>, device: &Device) -> Result<Tensor> {
    let data = mask.iter().map(|&m| m as u8).collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, mask.dim(), device)?)
}

/// Converts a host-side vector into an `f32` tensor.
pub fn array_to_tensor(xs: &Array1<f32>, device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_vec(xs.to_vec(), xs.len(), device)?)
}

/// Converts indices into a `u32` tensor usable by `index_select` and
/// `index_add`.
pub fn ids_to_tensor(ids: &[usize], device: &Device) -> Result<Tensor> {
    let data = ids.iter().map(|&i| i as u32).collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, ids.len(), device)?)
}

/// Picks `xs[i, cols[i]]` for each row of a rank-2 tensor.
pub fn gather_columns(xs: &Tensor, cols: &[usize]) -> Result<Tensor> {
    let ids = ids_to_tensor(cols, xs.device())?.unsqueeze(1)?;
    Ok(xs.gather(&ids, 1)?.squeeze(1)?)
}

/// Returns the variables of a [`VarMap`] with their names.
pub fn named_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("the variable map is poisoned"))?;
    let mut vars = data
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Vec<_>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

/// Saves named variables into a safetensors file.
pub fn save_vars<T: AsRef<Path>>(vars: &[(String, Var)], path: T) -> Result<()> {
    let tensors = vars
        .iter()
        .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
        .collect::<HashMap<_, _>>();
    candle_core::safetensors::save(&tensors, path.as_ref())?;
    info!("Save {} tensors to {:?}", tensors.len(), path.as_ref());
    Ok(())
}

/// Loads named variables from a safetensors file.
///
/// Every variable must be present in the file.
pub fn load_vars<T: AsRef<Path>>(vars: &[(String, Var)], path: T, device: &Device) -> Result<()> {
    let tensors = candle_core::safetensors::load(path.as_ref(), device)?;
    for (k, v) in vars.iter() {
        let t = tensors
            .get(k)
            .ok_or_else(|| anyhow!("{} not found in {:?}", k, path.as_ref()))?;
        v.set(t)?;
    }
    info!("Load {} tensors from {:?}", vars.len(), path.as_ref());
    Ok(())
}
