//! Batched training objects.
//!
//! All containers keep their discrete bookkeeping on the host in [`ndarray`]
//! arrays and implement [`gfn_core::Container`] so that they can be stored in
//! a [`ReplayBuffer`](gfn_core::replay_buffer::ReplayBuffer).
mod states;
mod trajectories;
mod transitions;
pub use states::States;
pub use trajectories::Trajectories;
pub use transitions::Transitions;
