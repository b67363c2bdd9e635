//! Slot simulator and episodic environment.
//!
//! [`simulate_slot`] runs one slot of the access protocol:
//!
//! 1. validate the joint action (fatal on malformed rows)
//! 2. group the requests of not-yet-connected UEs by target
//! 3. admit up to `R_k` requesters per target, picked at random; the rest
//!    are rejected and counted in `CR_k`. A target without a capacity answer
//!    NACKs every request (`R_k = 0`)
//! 4. each admitted UE draws one of `P` preambles; shared draws collide
//! 5. admitted, non-colliding UEs become connected in `s[n+1]`
//!
//! Delay is measured on the pre-slot access bits. [`HandoverEnv`] wraps this
//! with a capacity source, per-slot seeding and episode termination.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use crate::action::JointAction;
use crate::capacity::{CapacitySource, TargetCapacities};
use crate::collision::{self, SlotCost};
use crate::config::EnvConfig;
use crate::error::EnvError;
use crate::protocol::UePhase;
use crate::state::State;

/// Source of the two random decisions taken inside a slot.
pub trait SlotRandomness {
    /// Choose `capacity` of `requesters` (sorted UE indices) to admit.
    /// Returns the admitted UEs in ascending order.
    fn admit(&mut self, requesters: &[usize], capacity: usize) -> Vec<usize>;

    /// Preamble index in `0..n_preambles` drawn by an admitted UE.
    fn preamble(&mut self, ue: usize, n_preambles: usize) -> usize;
}

/// Explicitly seeded generator for one slot.
#[derive(Debug, Clone)]
pub struct SeededSlotRandomness {
    rng: Xoshiro256StarStar,
}

impl SeededSlotRandomness {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }

    /// Generator for `(seed, episode, slot)`; identical triples replay identically.
    pub fn for_slot(seed: u64, episode: u64, slot: u64) -> Self {
        Self::new(mix_seed(mix_seed(seed, episode), slot))
    }
}

impl SlotRandomness for SeededSlotRandomness {
    fn admit(&mut self, requesters: &[usize], capacity: usize) -> Vec<usize> {
        if requesters.len() <= capacity {
            return requesters.to_vec();
        }
        let mut pool = requesters.to_vec();
        let (chosen, _) = pool.partial_shuffle(&mut self.rng, capacity);
        let mut admitted = chosen.to_vec();
        admitted.sort_unstable();
        admitted
    }

    fn preamble(&mut self, _ue: usize, n_preambles: usize) -> usize {
        self.rng.gen_range(0..n_preambles.max(1))
    }
}

/// SplitMix64 finaliser over `seed + value`.
pub(crate) fn mix_seed(seed: u64, value: u64) -> u64 {
    let mut z = seed
        .wrapping_add(value.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// What happened inside one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDiagnostics {
    /// Final phase of every UE.
    pub phases: Vec<UePhase>,
    /// Preamble drawn by each admitted UE.
    pub preambles: Vec<Option<usize>>,
    /// RB demand per target; entry `k-1` belongs to target `k`.
    pub demand: Vec<usize>,
    pub admitted: Vec<usize>,
    pub rejected: Vec<usize>,
    pub collided: Vec<usize>,
    pub newly_connected: Vec<usize>,
    /// Targets that gave no capacity answer this slot.
    pub timed_out_targets: Vec<usize>,
    pub cost: SlotCost,
}

/// Output of [`simulate_slot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SlotResult {
    pub reward: f32,
    pub next_state: State,
    pub diagnostics: SlotDiagnostics,
}

/// Advance `state` by one slot under `action`.
pub fn simulate_slot(
    config: &EnvConfig,
    state: &State,
    action: &JointAction,
    capacities: &TargetCapacities,
    randomness: &mut impl SlotRandomness,
) -> Result<SlotResult, EnvError> {
    let n_ues = config.n_ues;
    let n_targets = config.n_targets;

    if state.n_ues() != n_ues {
        return Err(EnvError::InvalidStateShape {
            field: "access_bits".into(),
            expected: n_ues,
            found: state.n_ues(),
        });
    }
    action.validate_shape(n_ues, n_targets)?;

    let delay = collision::access_delay(&state.access);

    let mut phases: Vec<UePhase> = state
        .access
        .iter()
        .map(|&connected| if connected { UePhase::Connected } else { UePhase::Idle })
        .collect();

    let mut by_target: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for request in action.requests() {
        if state.access[request.ue] {
            continue;
        }
        phases[request.ue].advance(UePhase::Requested);
        by_target.entry(request.target).or_default().push(request.ue);
    }

    let mut demand = vec![0usize; n_targets - 1];
    let mut rb_collision = vec![0.0f32; n_targets - 1];
    let mut admitted = Vec::new();
    let mut rejected = Vec::new();
    let mut timed_out_targets = Vec::new();

    for (&target, requesters) in &by_target {
        demand[target - 1] = requesters.len();
        debug_assert_eq!(
            requesters.len(),
            collision::rb_demand(action, &state.access, target)
        );

        let capacity = match capacities.get(target) {
            Some(r) => r,
            None => {
                log::debug!(
                    "admission timeout at target {}: {} request(s) NACKed",
                    target,
                    requesters.len()
                );
                timed_out_targets.push(target);
                0
            }
        };
        rb_collision[target - 1] =
            collision::rb_collision_rate(requesters.len(), capacity, n_ues);

        let granted = randomness.admit(requesters, capacity as usize);
        for &ue in requesters {
            if granted.binary_search(&ue).is_ok() {
                phases[ue].advance(UePhase::Admitted);
                admitted.push(ue);
            } else {
                phases[ue].advance(UePhase::Rejected);
                rejected.push(ue);
            }
        }
    }
    admitted.sort_unstable();
    rejected.sort_unstable();

    let mut preambles = vec![None; n_ues];
    let draws: Vec<usize> = admitted
        .iter()
        .map(|&ue| {
            phases[ue].advance(UePhase::RandomAccess);
            let p = randomness.preamble(ue, config.n_preambles);
            preambles[ue] = Some(p);
            p
        })
        .collect();
    let collided_flags = collision::preamble_collisions(&draws);
    let preamble_collision = collision::preamble_collision_rate(&collided_flags);

    let mut next_access = state.access.clone();
    let mut collided = Vec::new();
    let mut newly_connected = Vec::new();
    for (&ue, &hit) in admitted.iter().zip(&collided_flags) {
        if hit {
            phases[ue].advance(UePhase::Collided);
            collided.push(ue);
        } else {
            phases[ue].advance(UePhase::Connected);
            next_access[ue] = true;
            newly_connected.push(ue);
        }
    }

    let cost = SlotCost::new(delay, rb_collision, preamble_collision, config.nu);
    let next_state = State {
        slot: state.slot + 1,
        access: next_access,
        prev_action: action.clone(),
    };

    Ok(SlotResult {
        reward: cost.reward,
        next_state,
        diagnostics: SlotDiagnostics {
            phases,
            preambles,
            demand,
            admitted,
            rejected,
            collided,
            newly_connected,
            timed_out_targets,
            cost,
        },
    })
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    AllConnected,
    WindowElapsed,
}

/// Result of [`HandoverEnv::step`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub reward: f32,
    pub next_state: State,
    pub diagnostics: SlotDiagnostics,
    pub done: bool,
    pub termination: Option<Termination>,
    /// Undiscounted return of the episode, set on the terminal step.
    pub episode_return: Option<f32>,
}

/// One simulated observation window.
pub struct HandoverEnv {
    config: EnvConfig,
    capacity: Box<dyn CapacitySource>,
    seed: u64,
    episode: u64,
    steps_in_episode: u64,
    episode_return: f32,
    state: State,
}

impl HandoverEnv {
    pub fn new(
        config: EnvConfig,
        capacity: Box<dyn CapacitySource>,
        seed: u64,
    ) -> Result<Self, EnvError> {
        config.validate()?;
        let state = State::initial(config.n_ues, config.n_targets);
        let mut env = Self {
            config,
            capacity,
            seed,
            episode: 0,
            steps_in_episode: 0,
            episode_return: 0.0,
            state,
        };
        env.reset();
        Ok(env)
    }

    /// Start a new episode: all UEs detached, `a[-1]` cleared, slot 0.
    ///
    /// Resetting an episode that has not been stepped leaves the episode
    /// counter alone, so repeated resets are indistinguishable from one.
    pub fn reset(&mut self) -> &State {
        if self.steps_in_episode > 0 {
            self.episode += 1;
        }
        self.steps_in_episode = 0;
        self.episode_return = 0.0;
        self.state = State::initial(self.config.n_ues, self.config.n_targets);
        self.capacity.reset(mix_seed(self.seed ^ 0xCA9A_C17E, self.episode));
        &self.state
    }

    /// Run one slot with capacities from the configured source.
    pub fn step(&mut self, action: &JointAction) -> Result<StepOutcome, EnvError> {
        action.validate_shape(self.config.n_ues, self.config.n_targets)?;
        let capacities = self
            .capacity
            .capacities(self.state.slot, self.config.n_targets);
        self.step_with_capacities(action, &capacities)
    }

    /// Run one slot with externally supplied capacities.
    pub fn step_with_capacities(
        &mut self,
        action: &JointAction,
        capacities: &TargetCapacities,
    ) -> Result<StepOutcome, EnvError> {
        let mut randomness =
            SeededSlotRandomness::for_slot(self.seed, self.episode, self.state.slot);
        let result = simulate_slot(
            &self.config,
            &self.state,
            action,
            capacities,
            &mut randomness,
        )?;

        self.steps_in_episode += 1;
        self.episode_return += result.reward;
        self.state = result.next_state.clone();

        let termination = if self.state.all_connected() {
            Some(Termination::AllConnected)
        } else if self.state.slot >= self.config.episode_length {
            Some(Termination::WindowElapsed)
        } else {
            None
        };

        Ok(StepOutcome {
            reward: result.reward,
            next_state: result.next_state,
            diagnostics: result.diagnostics,
            done: termination.is_some(),
            termination,
            episode_return: termination.map(|_| self.episode_return),
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }
}

impl std::fmt::Debug for HandoverEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoverEnv")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("episode", &self.episode)
            .field("state", &self.state)
            .finish()
    }
}
