//! Balance losses.
//!
//! Every loss works in log-space, ignores padding, clamps log-rewards from
//! below at `log_reward_clip_min` and returns a differentiable scalar tensor.
//! Calling `backward()` on it yields the gradients of the parameters returned
//! by [`Parametrization::parameters`](crate::parametrization::Parametrization::parameters).
mod base;
mod config;
mod db;
mod fm;
mod subtb;
mod tb;
pub use base::Loss;
pub use config::{DbConfig, FmConfig, SubTbConfig, TbConfig};
pub use db::DetailedBalance;
pub use fm::FlowMatching;
pub use subtb::SubTrajectoryBalance;
pub use tb::TrajectoryBalance;
