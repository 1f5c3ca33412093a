//! This module is used for tests.
use crate::{util::check_indices, Container, GfnError, ObjectKind};
use anyhow::Result;

/// Dummy batch of training objects identified by integers.
#[derive(Clone, Debug, PartialEq)]
pub struct DummyObjects {
    pub kind: ObjectKind,
    pub ids: Vec<usize>,
}

impl DummyObjects {
    pub fn new(kind: ObjectKind, ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            kind,
            ids: ids.into_iter().collect(),
        }
    }
}

impl Container for DummyObjects {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn select(&self, ixs: &[usize]) -> Result<Self> {
        check_indices(ixs, self.len())?;
        Ok(Self {
            kind: self.kind,
            ids: ixs.iter().map(|&ix| self.ids[ix]).collect(),
        })
    }

    /// Fails without appending anything if an id is already stored.
    fn extend(&mut self, other: &Self) -> Result<()> {
        if let Some(id) = other.ids.iter().find(|id| self.ids.contains(id)) {
            return Err(GfnError::ShapeMismatch(format!("duplicate id {}", id)).into());
        }
        self.ids.extend_from_slice(&other.ids);
        Ok(())
    }
}
