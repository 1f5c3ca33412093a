//! Names of balance schemes and sub-trajectory weighings.
use crate::GfnError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Balance scheme, which decides the estimators a parametrization needs.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum Scheme {
    /// Flow matching: edge flows only.
    #[serde(rename = "FM")]
    FlowMatching,

    /// Detailed balance: forward policy, backward policy and state flow.
    #[serde(rename = "DB")]
    DetailedBalance,

    /// Trajectory balance: forward policy, backward policy and log-partition.
    #[serde(rename = "TB")]
    TrajectoryBalance,

    /// Sub-trajectory balance: same estimators as detailed balance.
    #[serde(rename = "SubTB")]
    SubTrajectoryBalance,
}

impl Scheme {
    /// Short name of the scheme.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FlowMatching => "FM",
            Self::DetailedBalance => "DB",
            Self::TrajectoryBalance => "TB",
            Self::SubTrajectoryBalance => "SubTB",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Scheme {
    type Err = GfnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FM" => Ok(Self::FlowMatching),
            "DB" => Ok(Self::DetailedBalance),
            "TB" => Ok(Self::TrajectoryBalance),
            "SubTB" => Ok(Self::SubTrajectoryBalance),
            _ => Err(GfnError::UnknownScheme(s.to_string())),
        }
    }
}

/// How sub-trajectory residuals are combined into the sub-trajectory balance loss.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum Weighing {
    /// Mean over all one-step sub-trajectories; equals detailed balance.
    #[serde(rename = "DB")]
    DetailedBalance,

    /// One-step sub-trajectories, each trajectory contributing equally.
    #[serde(rename = "ModifiedDB")]
    ModifiedDetailedBalance,

    /// Full trajectories only; equals trajectory balance.
    #[serde(rename = "TB")]
    TrajectoryBalance,

    /// Uniform over all sub-trajectories of the batch.
    #[serde(rename = "equal")]
    Equal,

    /// Uniform within each trajectory, then uniform over trajectories.
    #[serde(rename = "equal_within")]
    EqualWithin,

    /// Per-length means weighted by a geometric decay in the length.
    #[serde(rename = "geometric")]
    Geometric,

    /// Geometric decay in the length, normalized within each trajectory.
    #[serde(rename = "geometric_within")]
    GeometricWithin,
}

impl Weighing {
    /// Name of the weighing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DetailedBalance => "DB",
            Self::ModifiedDetailedBalance => "ModifiedDB",
            Self::TrajectoryBalance => "TB",
            Self::Equal => "equal",
            Self::EqualWithin => "equal_within",
            Self::Geometric => "geometric",
            Self::GeometricWithin => "geometric_within",
        }
    }

    /// All weighings.
    pub fn all() -> [Weighing; 7] {
        [
            Self::DetailedBalance,
            Self::ModifiedDetailedBalance,
            Self::TrajectoryBalance,
            Self::Equal,
            Self::EqualWithin,
            Self::Geometric,
            Self::GeometricWithin,
        ]
    }
}

impl Default for Weighing {
    fn default() -> Self {
        Self::Geometric
    }
}

impl fmt::Display for Weighing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Weighing {
    type Err = GfnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|w| w.name() == s)
            .ok_or_else(|| GfnError::UnknownWeighing(s.to_string()))
    }
}
