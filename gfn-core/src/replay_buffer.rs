//! FIFO replay buffer of training objects.
//!
//! The buffer stores exactly what is inserted, without filtering or
//! de-duplication. Once the number of stored objects exceeds the capacity,
//! the oldest objects are evicted first.
//!
//! # Examples
//!
//! ```ignore
//! use gfn_core::{replay_buffer::{ReplayBuffer, ReplayBufferConfig}, ObjectKind};
//!
//! let config = ReplayBufferConfig::default()
//!     .capacity(1000)
//!     .objects(ObjectKind::Trajectories);
//! let mut buffer = ReplayBuffer::<Trajectories>::build(&config);
//! buffer.add(trajectories)?;
//! let batch = buffer.batch(16)?;
//! ```
mod base;
mod config;
pub use base::ReplayBuffer;
pub use config::ReplayBufferConfig;
