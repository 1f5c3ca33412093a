//! Utilities.
use crate::GfnError;
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration that can be stored in and read back from a YAML file.
///
/// Every configuration struct of the library implements this trait with the
/// default methods.
pub trait ConfigFile: Serialize + DeserializeOwned {
    /// Loads the configuration from a YAML file.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Checks that every index in `ixs` is smaller than `len`.
pub fn check_indices(ixs: &[usize], len: usize) -> Result<()> {
    match ixs.iter().find(|&&ix| ix >= len) {
        Some(ix) => Err(GfnError::ShapeMismatch(format!(
            "index {} out of range for a batch of {}",
            ix, len
        ))
        .into()),
        None => Ok(()),
    }
}
