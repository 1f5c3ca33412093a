//! Errors in the library.
use crate::ObjectKind;
use thiserror::Error;

/// Errors in the library.
///
/// Variants fall into two groups. Configuration errors (an unknown name, a
/// missing estimator, a replay buffer fed with the wrong kind of objects) and
/// shape errors (inconsistent batch extents, out-of-range indices). Neither
/// is transient; both are surfaced to the caller as soon as they are found.
#[derive(Error, Debug, PartialEq)]
pub enum GfnError {
    /// The name of a balance scheme is not known.
    #[error("Unknown parametrization scheme: {0}")]
    UnknownScheme(String),

    /// The name of a sub-trajectory weighing is not known.
    #[error("Unknown sub-trajectory weighing: {0}")]
    UnknownWeighing(String),

    /// A scheme was requested without one of the estimators it needs.
    #[error("Scheme {scheme} requires the {role} estimator")]
    MissingEstimator {
        /// Name of the scheme.
        scheme: String,
        /// Role of the missing estimator.
        role: String,
    },

    /// An estimator was given in a slot that expects another role.
    #[error("Expected an estimator of role {expected}, got {found}")]
    EstimatorRoleMismatch {
        /// Expected role.
        expected: String,
        /// Role of the given estimator.
        found: String,
    },

    /// A replay buffer received objects of another kind than it was built for.
    #[error("Replay buffer stores {expected}, got {found}")]
    ObjectKindMismatch {
        /// Kind the buffer was configured with.
        expected: ObjectKind,
        /// Kind of the inserted batch.
        found: ObjectKind,
    },

    /// A configuration value is out of its domain.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Batch extents of the arrays of a container do not agree.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A termination index exceeds the length of its batch.
    #[error("when_is_done = {index} exceeds max_length = {max_length}")]
    DoneIndexOutOfRange {
        /// The offending termination index.
        index: usize,
        /// Maximum trajectory length of the batch.
        max_length: usize,
    },

    /// More objects were requested than are available.
    #[error("Requested {requested} objects, only {available} available")]
    SampleSizeExceeded {
        /// Requested number of objects.
        requested: usize,
        /// Number of objects in the container.
        available: usize,
    },

    /// An action is not legal in the state it was applied to.
    #[error("Action {action} is not legal in row {row}")]
    IllegalAction {
        /// Row of the batch.
        row: usize,
        /// The action.
        action: i64,
    },

    /// Losses are defined on forward trajectories only.
    #[error("Losses cannot be computed on backward trajectories")]
    BackwardTrajectories,
}
