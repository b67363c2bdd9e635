//! Versioned parameter snapshots.
//!
//! A snapshot is the unit that moves between the learner, the policy store,
//! actors, the decision service and disk. Weights travel as burn
//! `BinBytesRecorder` records so any backend can load them, and the version
//! lets actors measure how stale their copy is.

use serde::{Deserialize, Serialize};

/// Immutable, versioned copy of the policy and value parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Publish counter; 0 is the initial parameters.
    pub version: u64,
    /// Learner updates applied when the snapshot was taken.
    pub train_step: u64,
    /// Serialised policy network record.
    pub policy: Vec<u8>,
    /// Serialised value network record.
    pub value: Vec<u8>,
}

impl ParameterSnapshot {
    pub fn new(version: u64, train_step: u64, policy: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            version,
            train_step,
            policy,
            value,
        }
    }

    /// Whether a newer version has been published.
    pub fn is_stale(&self, current_version: u64) -> bool {
        self.version < current_version
    }

    /// How many versions behind `current_version` this snapshot is.
    pub fn lag(&self, current_version: u64) -> u64 {
        current_version.saturating_sub(self.version)
    }

    /// Copy with a new version and step, weights untouched.
    pub fn restamped(&self, version: u64, train_step: u64) -> Self {
        Self {
            version,
            train_step,
            policy: self.policy.clone(),
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_and_lag() {
        let snapshot = ParameterSnapshot::new(5, 40, vec![1], vec![2]);

        assert!(!snapshot.is_stale(5));
        assert!(snapshot.is_stale(6));
        assert_eq!(snapshot.lag(8), 3);
        assert_eq!(snapshot.lag(3), 0);
    }

    #[test]
    fn test_restamped_keeps_weights() {
        let snapshot = ParameterSnapshot::new(1, 10, vec![1, 2, 3], vec![4]);
        let next = snapshot.restamped(2, 11);
        assert_eq!(next.version, 2);
        assert_eq!(next.policy, snapshot.policy);
        assert_eq!(next.value, snapshot.value);
    }

    #[test]
    fn test_serde_roundtrip() {
        let snapshot = ParameterSnapshot::new(3, 120, vec![0, 255, 17], vec![9, 9]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ParameterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
