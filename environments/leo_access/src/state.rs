//! State encoder.
//!
//! `s[n] = {n, a^HO[n], a[n-1]}`: the slot index, the access-status bit of
//! every UE and the previous joint action. Everything here is observable at
//! the satellite without terminal-side measurements.

use serde::{Deserialize, Serialize};

use crate::action::JointAction;
use crate::error::EnvError;

/// Locally observable handover state at one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Slot index within the current observation window.
    pub slot: u64,
    /// `a_j^HO[n]`: true once UE `j` has completed its handover.
    pub access: Vec<bool>,
    /// `a[n-1]`; all "no request" at episode start.
    pub prev_action: JointAction,
}

/// Build a [`State`] after checking shapes.
///
/// Fails with [`EnvError::InvalidStateShape`] when `access_bits` does not hold
/// `n_ues` entries or `prev_action` is not a `n_ues x n_targets` one-hot matrix.
pub fn encode(
    slot: u64,
    access_bits: &[bool],
    prev_action: &JointAction,
    n_ues: usize,
    n_targets: usize,
) -> Result<State, EnvError> {
    if access_bits.len() != n_ues {
        return Err(EnvError::InvalidStateShape {
            field: "access_bits".into(),
            expected: n_ues,
            found: access_bits.len(),
        });
    }
    if prev_action.n_ues() != n_ues {
        return Err(EnvError::InvalidStateShape {
            field: "prev_action rows".into(),
            expected: n_ues,
            found: prev_action.n_ues(),
        });
    }
    if prev_action.n_targets() != n_targets {
        return Err(EnvError::InvalidStateShape {
            field: "prev_action columns".into(),
            expected: n_targets,
            found: prev_action.n_targets(),
        });
    }
    if let Err(EnvError::InvalidAction { ue, .. }) = prev_action.validate() {
        let found = prev_action
            .row(ue)
            .iter()
            .map(|&c| c as usize)
            .sum::<usize>();
        return Err(EnvError::InvalidStateShape {
            field: format!("prev_action row {} one-hot sum", ue),
            expected: 1,
            found,
        });
    }

    Ok(State {
        slot,
        access: access_bits.to_vec(),
        prev_action: prev_action.clone(),
    })
}

/// Length of [`State::features`] for `J` UEs and `K` choices.
pub fn obs_size(n_ues: usize, n_targets: usize) -> usize {
    1 + n_ues + n_ues * n_targets
}

impl State {
    /// Initial state of an observation window.
    pub fn initial(n_ues: usize, n_targets: usize) -> Self {
        Self {
            slot: 0,
            access: vec![false; n_ues],
            prev_action: JointAction::no_request(n_ues, n_targets),
        }
    }

    pub fn n_ues(&self) -> usize {
        self.access.len()
    }

    pub fn connected_count(&self) -> usize {
        self.access.iter().filter(|&&a| a).count()
    }

    pub fn all_connected(&self) -> bool {
        self.access.iter().all(|&a| a)
    }

    /// Flat policy input: `[n / episode_length, a^HO..., a[n-1] row-major...]`.
    pub fn features(&self, episode_length: u64) -> Vec<f32> {
        let mut out = Vec::with_capacity(obs_size(self.n_ues(), self.prev_action.n_targets()));
        self.write_features(episode_length, &mut out);
        out
    }

    /// Append the features to `out`.
    pub fn write_features(&self, episode_length: u64, out: &mut Vec<f32>) {
        out.push(self.slot as f32 / episode_length.max(1) as f32);
        out.extend(self.access.iter().map(|&a| if a { 1.0 } else { 0.0 }));
        out.extend(self.prev_action.features());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_valid() {
        let prev = JointAction::from_choices(&[1, 0], 2).unwrap();
        let state = encode(3, &[true, false], &prev, 2, 2).unwrap();
        assert_eq!(state.slot, 3);
        assert_eq!(state.connected_count(), 1);
        assert!(!state.all_connected());
    }

    #[test]
    fn test_encode_wrong_access_length() {
        let prev = JointAction::no_request(2, 2);
        let err = encode(0, &[false], &prev, 2, 2).unwrap_err();
        assert_eq!(
            err,
            EnvError::InvalidStateShape {
                field: "access_bits".into(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_encode_rejects_non_one_hot_prev() {
        let prev = JointAction::from_raw(2, 2, vec![1, 0, 1, 1]);
        let err = encode(0, &[false, false], &prev, 2, 2).unwrap_err();
        match err {
            EnvError::InvalidStateShape {
                expected, found, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_wrong_columns() {
        let prev = JointAction::no_request(2, 3);
        assert!(encode(0, &[false, false], &prev, 2, 2).is_err());
    }

    #[test]
    fn test_features_layout() {
        let prev = JointAction::from_choices(&[1, 0], 2).unwrap();
        let state = encode(5, &[true, false], &prev, 2, 2).unwrap();
        let features = state.features(10);

        assert_eq!(features.len(), obs_size(2, 2));
        assert_eq!(features, vec![0.5, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_initial_state() {
        let state = State::initial(3, 2);
        assert_eq!(state.slot, 0);
        assert_eq!(state.connected_count(), 0);
        assert_eq!(state.prev_action, JointAction::no_request(3, 2));
    }

    #[test]
    fn test_serde_roundtrip() {
        let prev = JointAction::from_choices(&[2, 0, 1], 3).unwrap();
        let state = encode(7, &[false, true, false], &prev, 3, 3).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
