//! Configurations of losses.
use gfn_core::{util::ConfigFile, Weighing};
use serde::{Deserialize, Serialize};

const LOG_REWARD_CLIP_MIN: f64 = -12.0;

/// Configuration of [`TrajectoryBalance`](super::TrajectoryBalance).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TbConfig {
    /// Lower bound of log-rewards.
    pub log_reward_clip_min: f64,

    /// Use the forward log-probabilities recorded at sampling time instead of
    /// recomputing them.
    pub on_policy: bool,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            log_reward_clip_min: LOG_REWARD_CLIP_MIN,
            on_policy: false,
        }
    }
}

impl TbConfig {
    /// Sets the lower bound of log-rewards.
    pub fn log_reward_clip_min(mut self, v: f64) -> Self {
        self.log_reward_clip_min = v;
        self
    }

    /// Sets whether recorded log-probabilities are used.
    pub fn on_policy(mut self, v: bool) -> Self {
        self.on_policy = v;
        self
    }
}

impl ConfigFile for TbConfig {}

/// Configuration of [`DetailedBalance`](super::DetailedBalance).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DbConfig {
    /// Lower bound of log-rewards.
    pub log_reward_clip_min: f64,

    /// Use the forward log-probabilities recorded at sampling time.
    pub on_policy: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            log_reward_clip_min: LOG_REWARD_CLIP_MIN,
            on_policy: false,
        }
    }
}

impl DbConfig {
    /// Sets the lower bound of log-rewards.
    pub fn log_reward_clip_min(mut self, v: f64) -> Self {
        self.log_reward_clip_min = v;
        self
    }

    /// Sets whether recorded log-probabilities are used.
    pub fn on_policy(mut self, v: bool) -> Self {
        self.on_policy = v;
        self
    }
}

impl ConfigFile for DbConfig {}

/// Configuration of [`SubTrajectoryBalance`](super::SubTrajectoryBalance).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SubTbConfig {
    /// How sub-trajectory residuals are combined.
    pub weighing: Weighing,

    /// Decay of the geometric weighings, in `(0, 1]`.
    pub lamda: f64,

    /// Lower bound of log-rewards.
    pub log_reward_clip_min: f64,

    /// Use the forward log-probabilities recorded at sampling time.
    pub on_policy: bool,
}

impl Default for SubTbConfig {
    fn default() -> Self {
        Self {
            weighing: Weighing::default(),
            lamda: 0.9,
            log_reward_clip_min: LOG_REWARD_CLIP_MIN,
            on_policy: false,
        }
    }
}

impl SubTbConfig {
    /// Sets the weighing.
    pub fn weighing(mut self, v: Weighing) -> Self {
        self.weighing = v;
        self
    }

    /// Sets the geometric decay.
    pub fn lamda(mut self, v: f64) -> Self {
        self.lamda = v;
        self
    }

    /// Sets the lower bound of log-rewards.
    pub fn log_reward_clip_min(mut self, v: f64) -> Self {
        self.log_reward_clip_min = v;
        self
    }

    /// Sets whether recorded log-probabilities are used.
    pub fn on_policy(mut self, v: bool) -> Self {
        self.on_policy = v;
        self
    }
}

impl ConfigFile for SubTbConfig {}

/// Configuration of [`FlowMatching`](super::FlowMatching).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct FmConfig {
    /// Weight of the reward-matching term.
    pub alpha: f64,

    /// Lower bound of log-rewards.
    pub log_reward_clip_min: f64,
}

impl Default for FmConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            log_reward_clip_min: LOG_REWARD_CLIP_MIN,
        }
    }
}

impl FmConfig {
    /// Sets the weight of the reward-matching term.
    pub fn alpha(mut self, v: f64) -> Self {
        self.alpha = v;
        self
    }

    /// Sets the lower bound of log-rewards.
    pub fn log_reward_clip_min(mut self, v: f64) -> Self {
        self.log_reward_clip_min = v;
        self
    }
}

impl ConfigFile for FmConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempdir::TempDir;

    #[test]
    fn test_serde_subtb_config() -> Result<()> {
        let config = SubTbConfig::default()
            .weighing(Weighing::EqualWithin)
            .lamda(0.5)
            .on_policy(true);

        let dir = TempDir::new("subtb_config")?;
        let path = dir.path().join("subtb.yaml");
        config.save(&path)?;
        let config_ = SubTbConfig::load(&path)?;
        assert_eq!(config, config_);

        let yaml = serde_yaml::to_string(&config)?;
        assert!(yaml.contains("equal_within"));
        Ok(())
    }
}
