//! Decision processes.
//!
//! The core only consumes the [`Env`] trait. [`HyperGrid`] is a reference
//! decision process used in tests and small experiments.
mod base;
mod hypergrid;
mod preprocessor;
pub use base::Env;
pub use hypergrid::{HyperGrid, HyperGridConfig};
pub use preprocessor::{Preprocessor, PreprocessorKind};
