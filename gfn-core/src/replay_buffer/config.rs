//! Configuration of the replay buffer.
use crate::{util::ConfigFile, ObjectKind};
use serde::{Deserialize, Serialize};

/// Configuration of [`ReplayBuffer`](super::ReplayBuffer).
///
/// # Examples
///
/// ```rust
/// use gfn_core::{replay_buffer::ReplayBufferConfig, ObjectKind};
///
/// let config = ReplayBufferConfig::default()
///     .capacity(1000)
///     .objects(ObjectKind::Transitions)
///     .seed(7);
/// assert_eq!(config.capacity, 1000);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of objects kept in the buffer.
    pub capacity: usize,

    /// Kind of objects the buffer accepts.
    pub objects: ObjectKind,

    /// Random seed used when drawing batches.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            objects: ObjectKind::Trajectories,
            seed: 42,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the capacity of the replay buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the kind of objects stored in the buffer.
    pub fn objects(mut self, objects: ObjectKind) -> Self {
        self.objects = objects;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl ConfigFile for ReplayBufferConfig {}
