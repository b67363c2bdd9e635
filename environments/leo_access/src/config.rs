//! Environment configuration.
//!
//! Builder-style configuration for one handover simulator. Every simulator
//! owned by an actor shares the same `EnvConfig`; only seeds differ.

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Static shape and weighting of the handover MDP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Number of tracked UEs (`J`).
    pub n_ues: usize,
    /// Number of action choices per UE including "no request" (`K`).
    pub n_targets: usize,
    /// Random-access preambles available per slot (`P`).
    pub n_preambles: usize,
    /// Collision weight in the reward (`nu`).
    pub nu: f32,
    /// Slots in one observation window.
    pub episode_length: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            n_ues: 4,
            n_targets: 3,
            n_preambles: 8,
            nu: 1.0,
            episode_length: 50,
        }
    }
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_ues(mut self, n_ues: usize) -> Self {
        self.n_ues = n_ues;
        self
    }

    pub fn with_n_targets(mut self, n_targets: usize) -> Self {
        self.n_targets = n_targets;
        self
    }

    pub fn with_n_preambles(mut self, n_preambles: usize) -> Self {
        self.n_preambles = n_preambles;
        self
    }

    pub fn with_nu(mut self, nu: f32) -> Self {
        self.nu = nu;
        self
    }

    pub fn with_episode_length(mut self, episode_length: u64) -> Self {
        self.episode_length = episode_length;
        self
    }

    /// Length of the flat feature vector produced by [`crate::State::features`].
    pub fn obs_size(&self) -> usize {
        crate::state::obs_size(self.n_ues, self.n_targets)
    }

    /// Number of joint-action logits a policy must produce (`J * K`).
    pub fn action_logits(&self) -> usize {
        self.n_ues * self.n_targets
    }

    pub fn validate(&self) -> Result<(), EnvError> {
        if self.n_ues == 0 {
            return Err(EnvError::InvalidConfig("n_ues must be >= 1".into()));
        }
        if self.n_targets < 2 {
            return Err(EnvError::InvalidConfig(
                "n_targets must be >= 2 (no-request plus one target)".into(),
            ));
        }
        if self.n_preambles == 0 {
            return Err(EnvError::InvalidConfig("n_preambles must be >= 1".into()));
        }
        if !self.nu.is_finite() || self.nu < 0.0 {
            return Err(EnvError::InvalidConfig(format!(
                "nu must be finite and >= 0, got {}",
                self.nu
            )));
        }
        if self.episode_length == 0 {
            return Err(EnvError::InvalidConfig("episode_length must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EnvConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EnvConfig::new()
            .with_n_ues(3)
            .with_n_targets(2)
            .with_n_preambles(4)
            .with_nu(0.5)
            .with_episode_length(10);

        assert_eq!(config.n_ues, 3);
        assert_eq!(config.obs_size(), 1 + 3 + 3 * 2);
        assert_eq!(config.action_logits(), 6);
    }

    #[test]
    fn test_validation_rejects_bad_shapes() {
        assert!(EnvConfig::new().with_n_ues(0).validate().is_err());
        assert!(EnvConfig::new().with_n_targets(1).validate().is_err());
        assert!(EnvConfig::new().with_n_preambles(0).validate().is_err());
        assert!(EnvConfig::new().with_nu(-0.1).validate().is_err());
        assert!(EnvConfig::new().with_nu(f32::NAN).validate().is_err());
        assert!(EnvConfig::new().with_episode_length(0).validate().is_err());
    }
}
