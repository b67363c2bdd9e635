//! Per-slot RB capacity sources.
//!
//! In deployment, capacities come from the orbital-visibility service. For
//! training they come from one of the sources below. A target that does not
//! answer within the slot is reported as `None`; the simulator treats every
//! request to it as NACKed.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Capacity `R_k[n]` of targets `1..K` for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCapacities {
    per_target: Vec<Option<u32>>,
}

impl TargetCapacities {
    /// `per_target[k-1]` is the capacity of target `k`.
    pub fn new(per_target: Vec<Option<u32>>) -> Self {
        Self { per_target }
    }

    /// Every target answers with the same capacity.
    pub fn uniform(n_targets: usize, capacity: u32) -> Self {
        Self {
            per_target: vec![Some(capacity); n_targets.saturating_sub(1)],
        }
    }

    /// Build from a `{k -> R_k}` map; unlisted targets did not answer.
    pub fn from_pairs(n_targets: usize, pairs: impl IntoIterator<Item = (usize, u32)>) -> Self {
        let mut per_target = vec![None; n_targets.saturating_sub(1)];
        for (k, r) in pairs {
            if k >= 1 && k < n_targets {
                per_target[k - 1] = Some(r);
            }
        }
        Self { per_target }
    }

    /// Capacity of target `k` (1-based), `None` on admission timeout.
    pub fn get(&self, target: usize) -> Option<u32> {
        target
            .checked_sub(1)
            .and_then(|i| self.per_target.get(i).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.per_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_target.is_empty()
    }
}

/// Supplies `R_k[n]` for each slot.
pub trait CapacitySource: Send {
    fn capacities(&mut self, slot: u64, n_targets: usize) -> TargetCapacities;

    /// Called on environment reset with a fresh episode seed.
    fn reset(&mut self, _episode_seed: u64) {}
}

/// Constant capacity per target.
#[derive(Debug, Clone)]
pub struct FixedCapacity {
    per_target: Vec<u32>,
}

impl FixedCapacity {
    pub fn new(per_target: Vec<u32>) -> Self {
        Self { per_target }
    }
}

impl CapacitySource for FixedCapacity {
    fn capacities(&mut self, _slot: u64, n_targets: usize) -> TargetCapacities {
        TargetCapacities::from_pairs(
            n_targets,
            self.per_target
                .iter()
                .enumerate()
                .map(|(i, &r)| (i + 1, r)),
        )
    }
}

/// Capacity drawn uniformly from `min..=max` per target and slot, with an
/// optional outage probability that models a target missing its deadline.
#[derive(Debug, Clone)]
pub struct UniformCapacity {
    min: u32,
    max: u32,
    outage_probability: f32,
    rng: Xoshiro256StarStar,
}

impl UniformCapacity {
    pub fn new(min: u32, max: u32, outage_probability: f32, seed: u64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            outage_probability: outage_probability.clamp(0.0, 1.0),
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }
}

impl CapacitySource for UniformCapacity {
    fn capacities(&mut self, _slot: u64, n_targets: usize) -> TargetCapacities {
        let per_target = (1..n_targets)
            .map(|_| {
                if self.outage_probability > 0.0 && self.rng.gen::<f32>() < self.outage_probability
                {
                    None
                } else {
                    Some(self.rng.gen_range(self.min..=self.max))
                }
            })
            .collect();
        TargetCapacities::new(per_target)
    }

    fn reset(&mut self, episode_seed: u64) {
        self.rng = Xoshiro256StarStar::seed_from_u64(episode_seed);
    }
}

/// Explicit per-slot table, repeated once exhausted.
#[derive(Debug, Clone)]
pub struct ScheduledCapacity {
    table: Vec<TargetCapacities>,
}

impl ScheduledCapacity {
    pub fn new(table: Vec<TargetCapacities>) -> Self {
        Self { table }
    }
}

impl CapacitySource for ScheduledCapacity {
    fn capacities(&mut self, slot: u64, n_targets: usize) -> TargetCapacities {
        if self.table.is_empty() {
            return TargetCapacities::from_pairs(n_targets, std::iter::empty());
        }
        self.table[(slot % self.table.len() as u64) as usize].clone()
    }
}

/// Serializable description of a capacity source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapacityConfig {
    Fixed {
        per_target: Vec<u32>,
    },
    Uniform {
        min: u32,
        max: u32,
        #[serde(default)]
        outage_probability: f32,
    },
    Scheduled {
        table: Vec<Vec<Option<u32>>>,
    },
}

impl Default for CapacityConfig {
    fn default() -> Self {
        CapacityConfig::Uniform {
            min: 0,
            max: 3,
            outage_probability: 0.05,
        }
    }
}

impl CapacityConfig {
    pub fn validate(&self, n_targets: usize) -> Result<(), EnvError> {
        let expected = n_targets.saturating_sub(1);
        match self {
            CapacityConfig::Fixed { per_target } if per_target.len() != expected => {
                Err(EnvError::InvalidConfig(format!(
                    "fixed capacity lists {} targets, expected {}",
                    per_target.len(),
                    expected
                )))
            }
            CapacityConfig::Uniform { min, max, .. } if min > max => Err(EnvError::InvalidConfig(
                format!("uniform capacity min {} > max {}", min, max),
            )),
            CapacityConfig::Uniform {
                outage_probability, ..
            } if !(0.0..=1.0).contains(outage_probability) => Err(EnvError::InvalidConfig(
                format!("outage_probability {} outside [0, 1]", outage_probability),
            )),
            CapacityConfig::Scheduled { table } => {
                match table.iter().position(|row| row.len() != expected) {
                    Some(slot) => Err(EnvError::InvalidConfig(format!(
                        "capacity schedule row {} has {} targets, expected {}",
                        slot,
                        table[slot].len(),
                        expected
                    ))),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    pub fn build(&self, n_targets: usize, seed: u64) -> Result<Box<dyn CapacitySource>, EnvError> {
        self.validate(n_targets)?;
        Ok(match self {
            CapacityConfig::Fixed { per_target } => Box::new(FixedCapacity::new(per_target.clone())),
            CapacityConfig::Uniform {
                min,
                max,
                outage_probability,
            } => Box::new(UniformCapacity::new(*min, *max, *outage_probability, seed)),
            CapacityConfig::Scheduled { table } => Box::new(ScheduledCapacity::new(
                table.iter().cloned().map(TargetCapacities::new).collect(),
            )),
        })
    }
}
