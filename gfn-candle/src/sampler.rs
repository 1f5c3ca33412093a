//! Samplers of actions, trajectories, transitions and states.
mod actions;
mod config;
mod states;
mod trajectories;
mod transitions;
pub use actions::ActionsSampler;
pub use config::{ActionsSamplerConfig, TrajectoriesSamplerConfig};
pub use states::StatesSampler;
pub use trajectories::TrajectoriesSampler;
pub use transitions::TransitionsSampler;
