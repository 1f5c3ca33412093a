//! FIFO replay buffer.
use super::ReplayBufferConfig;
use crate::{Container, ExperienceBufferBase, GfnError, ObjectKind, ReplayBufferBase};
use anyhow::Result;
use log::trace;
use rand::{rngs::StdRng, SeedableRng};
use std::fmt;

/// A fixed-capacity store of training objects of a single kind.
///
/// Objects are kept in insertion order. When an insertion pushes the total
/// past the capacity, the oldest objects are dropped so that the newest
/// `capacity` objects remain. The buffer assumes a single writer.
pub struct ReplayBuffer<C: Container> {
    /// Maximum number of stored objects.
    capacity: usize,

    /// Kind of objects accepted by [`ReplayBuffer::add`].
    objects: ObjectKind,

    /// Stored objects, `None` until the first non-empty insertion.
    store: Option<C>,

    /// Random number generator for sampling.
    rng: StdRng,
}

impl<C: Container> ReplayBuffer<C> {
    /// Inserts a batch of objects, evicting the oldest ones beyond capacity.
    ///
    /// # Errors
    ///
    /// Returns [`GfnError::ObjectKindMismatch`] if `objs` is not of the kind
    /// the buffer was configured with.
    pub fn add(&mut self, objs: C) -> Result<()> {
        self.push(objs)
    }

    /// Draws `n` distinct stored objects uniformly at random.
    pub fn sample(&mut self, n: usize) -> Result<C> {
        self.batch(n)
    }

    /// Returns the stored objects, oldest first.
    pub fn training_objects(&self) -> Option<&C> {
        self.store.as_ref()
    }

    /// Returns the capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the kind of objects the buffer accepts.
    pub fn objects(&self) -> ObjectKind {
        self.objects
    }
}

impl<C: Container> ExperienceBufferBase for ReplayBuffer<C> {
    type Item = C;

    fn push(&mut self, objs: C) -> Result<()> {
        if objs.kind() != self.objects {
            return Err(GfnError::ObjectKindMismatch {
                expected: self.objects,
                found: objs.kind(),
            }
            .into());
        }
        if objs.is_empty() {
            return Ok(());
        }

        // A failed extend leaves the stored batch as it was.
        match self.store.as_mut() {
            Some(store) => store.extend(&objs)?,
            None => self.store = Some(objs),
        }

        if let Some(store) = self.store.as_mut() {
            if store.len() > self.capacity {
                trace!(
                    "Evict {} {} from the replay buffer",
                    store.len() - self.capacity,
                    self.objects
                );
                *store = store.last(self.capacity)?;
            }
        }

        Ok(())
    }

    fn len(&self) -> usize {
        self.store.as_ref().map_or(0, |store| store.len())
    }
}

impl<C: Container> ReplayBufferBase for ReplayBuffer<C> {
    type Config = ReplayBufferConfig;
    type Batch = C;

    fn build(config: &Self::Config) -> Self {
        Self {
            capacity: config.capacity,
            objects: config.objects,
            store: None,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        match &self.store {
            Some(store) => store.sample(size, &mut self.rng),
            None => Err(GfnError::SampleSizeExceeded {
                requested: size,
                available: 0,
            }
            .into()),
        }
    }
}

impl<C: Container> fmt::Display for ReplayBuffer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReplayBuffer(capacity={}, containing {} {})",
            self.capacity,
            self.len(),
            self.objects
        )
    }
}
