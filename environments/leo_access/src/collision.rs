//! Delay, collision and reward for one slot.
//!
//! All functions are pure. The preamble draw they consume is produced by the
//! simulator's seeded per-slot generator.
//!
//! ```text
//! D[n]    = (1/J) * sum_j (1 - a_j^HO[n])
//! CR_k[n] = 0                        if R_k - demand_k > 0
//!         = (demand_k - R_k) / J     otherwise
//! CP[n]   = collided admitted UEs / admitted UEs
//! C[n]    = sum_k CR_k[n] + CP[n]
//! r[n]    = -(D[n] + nu * C[n])
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::JointAction;

/// Fraction of UEs not yet connected.
pub fn access_delay(access: &[bool]) -> f32 {
    if access.is_empty() {
        return 0.0;
    }
    let waiting = access.iter().filter(|&&a| !a).count();
    waiting as f32 / access.len() as f32
}

/// Number of not-yet-connected UEs requesting `target` (`sum_j h^R_{k,j}`).
pub fn rb_demand(action: &JointAction, access: &[bool], target: usize) -> usize {
    action
        .requests()
        .filter(|r| r.target == target && !access.get(r.ue).copied().unwrap_or(false))
        .count()
}

/// RB collision rate of one target given its demand and capacity.
pub fn rb_collision_rate(demand: usize, capacity: u32, n_ues: usize) -> f32 {
    let capacity = capacity as i64;
    let demand = demand as i64;
    if capacity - demand > 0 || n_ues == 0 {
        0.0
    } else {
        (demand - capacity) as f32 / n_ues as f32
    }
}

/// Mark each draw that shares its preamble with at least one other draw.
///
/// `draws[i]` is the preamble index chosen by the i-th admitted UE.
pub fn preamble_collisions(draws: &[usize]) -> Vec<bool> {
    let mut counts: HashMap<usize, usize> = HashMap::with_capacity(draws.len());
    for &p in draws {
        *counts.entry(p).or_insert(0) += 1;
    }
    draws.iter().map(|p| counts[p] > 1).collect()
}

/// Fraction of admitted UEs whose preamble collided; 0 when nobody was admitted.
pub fn preamble_collision_rate(collided: &[bool]) -> f32 {
    if collided.is_empty() {
        return 0.0;
    }
    collided.iter().filter(|&&c| c).count() as f32 / collided.len() as f32
}

/// `C[n] = sum_k CR_k[n] + CP[n]`.
pub fn total_collision(rb_rates: &[f32], preamble_rate: f32) -> f32 {
    rb_rates.iter().sum::<f32>() + preamble_rate
}

/// `r[n] = -(D[n] + nu * C[n])`.
pub fn reward(delay: f32, collision: f32, nu: f32) -> f32 {
    -(delay + nu * collision)
}

/// Cost breakdown of one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCost {
    pub delay: f32,
    /// `CR_k` for targets `1..K`; entry `k-1` belongs to target `k`.
    pub rb_collision: Vec<f32>,
    pub preamble_collision: f32,
    pub total_collision: f32,
    pub reward: f32,
}

impl SlotCost {
    pub fn new(delay: f32, rb_collision: Vec<f32>, preamble_collision: f32, nu: f32) -> Self {
        let total = total_collision(&rb_collision, preamble_collision);
        Self {
            delay,
            rb_collision,
            preamble_collision,
            total_collision: total,
            reward: reward(delay, total, nu),
        }
    }
}
