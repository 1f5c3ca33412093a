#![warn(missing_docs)]
//! Backend-agnostic core of the GFlowNet training library.
//!
//! This crate holds the pieces of the training-signal subsystem that do not
//! depend on a tensor backend:
//!
//! * [`Container`]: the interface of batched training objects
//!   (trajectories, transitions, states),
//! * [`replay_buffer::ReplayBuffer`]: a FIFO buffer of training objects for
//!   off-policy reuse,
//! * [`Scheme`] and [`Weighing`]: names of the balance schemes and of the
//!   sub-trajectory weighings,
//! * [`GfnError`]: the error taxonomy shared by all crates of the workspace.
pub mod error;
pub mod replay_buffer;
pub mod util;

mod base;
pub use base::{Container, ExperienceBufferBase, ObjectKind, ReplayBufferBase};

mod scheme;
pub use scheme::{Scheme, Weighing};

pub use error::GfnError;

#[cfg(test)]
pub(crate) mod dummy;
