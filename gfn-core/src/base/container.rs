//! Batched training objects.
use crate::GfnError;
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Kind of training objects held by a [`Container`].
///
/// A replay buffer is configured with one kind and never mixes them.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Complete rollouts.
    Trajectories,

    /// Single steps without trajectory context.
    Transitions,

    /// Bare states.
    States,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trajectories => "trajectories",
            Self::Transitions => "transitions",
            Self::States => "states",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ObjectKind {
    type Err = GfnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trajectories" => Ok(Self::Trajectories),
            "transitions" => Ok(Self::Transitions),
            "states" => Ok(Self::States),
            _ => Err(GfnError::InvalidConfig(format!("unknown object kind {}", s))),
        }
    }
}

/// A batch of training objects with a leading batch dimension.
///
/// Implementors are immutable value batches apart from [`Container::extend`].
/// Index-based selection always produces a new batch.
pub trait Container: Sized {
    /// Returns the kind of the objects in this batch.
    fn kind(&self) -> ObjectKind;

    /// Returns the number of objects in the batch.
    fn len(&self) -> usize;

    /// Returns `true` if the batch holds no object.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a new batch made of the objects at `ixs`, in that order.
    ///
    /// Indices may repeat. An index out of range is a shape error.
    fn select(&self, ixs: &[usize]) -> Result<Self>;

    /// Appends the objects of `other` at the end of this batch.
    ///
    /// On error the batch is left unchanged.
    fn extend(&mut self, other: &Self) -> Result<()>;

    /// Draws `n` distinct objects uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns [`GfnError::SampleSizeExceeded`] if `n > self.len()`.
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Self> {
        if n > self.len() {
            return Err(GfnError::SampleSizeExceeded {
                requested: n,
                available: self.len(),
            }
            .into());
        }
        let ixs = rand::seq::index::sample(rng, self.len(), n).into_vec();
        self.select(&ixs)
    }

    /// Returns the last `n` objects, or all of them if there are fewer.
    fn last(&self, n: usize) -> Result<Self> {
        let len = self.len();
        let start = len.saturating_sub(n);
        let ixs = (start..len).collect::<Vec<_>>();
        self.select(&ixs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyObjects;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_object_kind_from_str() {
        assert_eq!(
            "trajectories".parse::<ObjectKind>(),
            Ok(ObjectKind::Trajectories)
        );
        assert_eq!(
            "transitions".parse::<ObjectKind>(),
            Ok(ObjectKind::Transitions)
        );
        assert!("episodes".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn test_sample_without_replacement() -> Result<()> {
        let objs = DummyObjects::new(ObjectKind::Trajectories, 0..10);
        let mut rng = StdRng::seed_from_u64(42);
        let sampled = objs.sample(4, &mut rng)?;
        let mut ids = sampled.ids.clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert!(ids.iter().all(|id| *id < 10));

        let err = objs.sample(11, &mut rng).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GfnError>(),
            Some(&GfnError::SampleSizeExceeded {
                requested: 11,
                available: 10
            })
        );
        Ok(())
    }

    #[test]
    fn test_last() -> Result<()> {
        let objs = DummyObjects::new(ObjectKind::Transitions, 0..5);
        assert_eq!(objs.last(2)?.ids, vec![3, 4]);
        assert_eq!(objs.last(8)?.ids, vec![0, 1, 2, 3, 4]);
        Ok(())
    }
}
