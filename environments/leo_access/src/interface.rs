//! Per-slot exchange with out-of-scope collaborators.
//!
//! The orbital-visibility service supplies `time_index` and the capacity map,
//! the signaling layer supplies the access snapshot and consumes one
//! [`HandoverDecision`] per UE. UE ids are `0..J`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::{JointAction, NO_REQUEST};
use crate::capacity::TargetCapacities;
use crate::error::EnvError;
use crate::state::{encode, State};

/// Inputs for one live decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotInput {
    pub time_index: u64,
    /// `{k -> R_k[n]}` for the targets reachable this slot.
    pub available_targets: BTreeMap<usize, u32>,
    /// `{ue_id -> a^HO}`.
    pub ue_access_snapshot: BTreeMap<usize, bool>,
}

impl SlotInput {
    /// Encode into a [`State`]; every UE `0..n_ues` must be present.
    pub fn to_state(
        &self,
        prev_action: &JointAction,
        n_ues: usize,
        n_targets: usize,
    ) -> Result<State, EnvError> {
        let access: Vec<bool> = (0..n_ues)
            .map_while(|ue| self.ue_access_snapshot.get(&ue).copied())
            .collect();
        if access.len() != n_ues || self.ue_access_snapshot.len() != n_ues {
            return Err(EnvError::InvalidStateShape {
                field: "ue_access_snapshot".into(),
                expected: n_ues,
                found: access.len().min(self.ue_access_snapshot.len()),
            });
        }
        encode(self.time_index, &access, prev_action, n_ues, n_targets)
    }

    pub fn capacities(&self, n_targets: usize) -> TargetCapacities {
        TargetCapacities::from_pairs(
            n_targets,
            self.available_targets.iter().map(|(&k, &r)| (k, r)),
        )
    }
}

/// Decision for one UE; `target == None` means "no request".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverDecision {
    pub ue_id: usize,
    pub target: Option<usize>,
}

impl HandoverDecision {
    pub fn from_action(action: &JointAction) -> Vec<HandoverDecision> {
        action
            .choices()
            .into_iter()
            .enumerate()
            .map(|(ue_id, choice)| HandoverDecision {
                ue_id,
                target: (choice != NO_REQUEST).then_some(choice),
            })
            .collect()
    }

    /// Safe default for every UE.
    pub fn all_no_request(n_ues: usize) -> Vec<HandoverDecision> {
        (0..n_ues)
            .map(|ue_id| HandoverDecision {
                ue_id,
                target: None,
            })
            .collect()
    }
}
