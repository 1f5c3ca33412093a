//! Core interfaces.
mod container;
mod replay_buffer;
pub use container::{Container, ObjectKind};
pub use replay_buffer::{ExperienceBufferBase, ReplayBufferBase};
