//! Per-UE protocol phase within one slot.
//!
//! ```text
//! Idle -> Requested -> Admitted -> RandomAccess -> Connected
//!                  \                           \-> Collided
//!                   \-> Rejected
//! ```
//!
//! A UE that is already attached starts and ends the slot in `Connected`.
//! `Rejected` and `Collided` leave `a_j^HO = 0`, so the UE may request again
//! next slot.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UePhase {
    Idle,
    Requested,
    Admitted,
    Rejected,
    RandomAccess,
    Connected,
    Collided,
}

impl UePhase {
    pub fn can_transition_to(self, next: UePhase) -> bool {
        use UePhase::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, Admitted)
                | (Requested, Rejected)
                | (Admitted, RandomAccess)
                | (RandomAccess, Connected)
                | (RandomAccess, Collided)
        )
    }

    /// Phases in which a UE may end the slot.
    pub fn is_slot_terminal(self) -> bool {
        matches!(
            self,
            UePhase::Idle | UePhase::Rejected | UePhase::Connected | UePhase::Collided
        )
    }

    /// Move to `next`, panicking in debug builds on an illegal edge.
    pub fn advance(&mut self, next: UePhase) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal phase transition {:?} -> {:?}",
            self,
            next
        );
        *self = next;
    }
}
