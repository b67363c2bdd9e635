//! LEO Access Environment - slot-level handover contention simulation
//!
//! This crate models one observation window of a LEO satellite access network
//! as a Markov decision process. Each slot, every tracked UE either stays put
//! or requests a handover to one of `K-1` orbital targets. Requests contend
//! for resource blocks (RB) at their target, admitted UEs then contend for
//! random-access preambles, and the slot reward trades access delay against
//! collision rate.
//!
//! # Architecture
//!
//! - [`state`]: locally observable state `s[n] = {n, a^HO[n], a[n-1]}` and its
//!   flat feature encoding
//! - [`action`]: the `J x K` one-hot joint action
//! - [`collision`]: pure delay / collision / reward functions
//! - [`protocol`]: per-UE phase state machine for one slot
//! - [`simulator`]: [`simulate_slot`] and the episodic [`HandoverEnv`]
//! - [`vec_env`]: several independent simulators stepped together by an actor
//! - [`capacity`]: stand-ins for the orbital-visibility service that supplies
//!   per-slot RB capacity
//! - [`interface`]: per-slot inputs and decisions exchanged with the signaling
//!   layer
//!
//! # Randomness
//!
//! The preamble draw and the admission order under RB shortage are the only
//! stochastic elements. Both come from a per-slot generator derived from
//! `(seed, episode, slot)`, so any slot can be replayed exactly.

pub mod action;
pub mod capacity;
pub mod collision;
pub mod config;
pub mod error;
pub mod interface;
pub mod protocol;
pub mod simulator;
pub mod state;
pub mod vec_env;

#[cfg(test)]
mod tests;

pub use action::{JointAction, RequestRecord, NO_REQUEST};
pub use capacity::{
    CapacityConfig, CapacitySource, FixedCapacity, ScheduledCapacity, TargetCapacities,
    UniformCapacity,
};
pub use collision::{
    access_delay, preamble_collision_rate, preamble_collisions, rb_collision_rate, rb_demand,
    reward, total_collision, SlotCost,
};
pub use config::EnvConfig;
pub use error::EnvError;
pub use interface::{HandoverDecision, SlotInput};
pub use protocol::UePhase;
pub use simulator::{
    simulate_slot, HandoverEnv, SeededSlotRandomness, SlotDiagnostics, SlotRandomness,
    SlotResult, StepOutcome, Termination,
};
pub use state::{encode, obs_size, State};
pub use vec_env::{ResetMask, VecHandoverEnv};
