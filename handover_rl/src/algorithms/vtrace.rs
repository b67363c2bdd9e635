//! V-trace off-policy correction.
//!
//! Actors act on a behavior snapshot `mu` that may be several versions behind
//! the learner's target `pi`. V-trace reweights each step with truncated
//! importance ratios so the value and policy targets stay consistent.
//!
//! ## Key Equations
//!
//! ```text
//! ratio_t = pi(a_t|s_t) / max(mu(a_t|s_t), floor)
//! rho_t   = min(rho_bar, ratio_t)
//! c_t     = min(c_bar, ratio_t)
//! delta_t = rho_t * (r_t + gamma * V(s_{t+1}) - V(s_t))
//! v_t     = V(s_t) + delta_t + gamma * c_t * (v_{t+1} - V(s_{t+1}))
//! A_t     = r_t + gamma * v_{t+1} - V(s_t)
//! ```
//!
//! `v_T = V(s_T)` at the rollout boundary, and terminal steps bootstrap from
//! zero. `rho_t` scales the policy gradient in the loss, not `A_t`.
//!
//! ## References
//!
//! - Espeholt et al., "IMPALA: Scalable Distributed Deep-RL with
//!   Importance Weighted Actor-Learner Architectures" (2018)

/// Largest log-ratio passed to `exp`; keeps the ratio finite in f32.
const MAX_LOG_RATIO: f32 = 20.0;

/// Discount, truncation bounds and the behavior-probability floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VTraceParams {
    pub gamma: f32,
    pub rho_bar: f32,
    pub c_bar: f32,
    pub probability_floor: f32,
}

impl Default for VTraceParams {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            rho_bar: 1.0,
            c_bar: 1.0,
            probability_floor: 1e-6,
        }
    }
}

/// Per-trajectory input.
#[derive(Debug, Clone)]
pub struct VTraceInput {
    /// `log mu(a|s)` recorded by the actor
    pub behavior_log_probs: Vec<f32>,
    /// `log pi(a|s)` under the learner's parameters
    pub target_log_probs: Vec<f32>,
    pub rewards: Vec<f32>,
    /// `V(s_t)` under the learner's parameters
    pub values: Vec<f32>,
    pub dones: Vec<bool>,
    /// `V(s_T)` for the state after the last step
    pub bootstrap_value: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VTraceResult {
    /// Value targets `v_t`
    pub vs: Vec<f32>,
    /// Policy-gradient advantages `r_t + gamma * v_{t+1} - V(s_t)`
    pub advantages: Vec<f32>,
    /// Truncated importance weights
    pub rhos: Vec<f32>,
    /// Truncated trace coefficients
    pub cs: Vec<f32>,
    /// Steps whose raw ratio exceeded `rho_bar`
    pub rho_clipped: usize,
    /// Steps whose behavior probability was raised to the floor
    pub floor_clipped: usize,
}

impl VTraceResult {
    pub fn len(&self) -> usize {
        self.vs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vs.is_empty()
    }

    /// All targets, advantages and weights are finite.
    pub fn is_finite(&self) -> bool {
        self.vs
            .iter()
            .chain(&self.advantages)
            .chain(&self.rhos)
            .all(|x| x.is_finite())
    }
}

/// Compute V-trace targets and advantages for one trajectory.
///
/// Panics if the per-step slices differ in length.
pub fn compute_vtrace(
    behavior_log_probs: &[f32],
    target_log_probs: &[f32],
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    bootstrap_value: f32,
    params: &VTraceParams,
) -> VTraceResult {
    let n = rewards.len();
    if n == 0 {
        return VTraceResult::default();
    }

    assert_eq!(behavior_log_probs.len(), n);
    assert_eq!(target_log_probs.len(), n);
    assert_eq!(values.len(), n);
    assert_eq!(dones.len(), n);

    let log_floor = params.probability_floor.ln();
    let gamma = params.gamma;

    let mut rhos = vec![0.0f32; n];
    let mut cs = vec![0.0f32; n];
    let mut rho_clipped = 0;
    let mut floor_clipped = 0;

    for t in 0..n {
        // NaN and -inf both fail this comparison and land on the floor
        let behavior = if behavior_log_probs[t] >= log_floor {
            behavior_log_probs[t]
        } else {
            floor_clipped += 1;
            log_floor
        };
        // a non-finite target stays non-finite so the loss check can see it
        let log_ratio = (target_log_probs[t] - behavior).min(MAX_LOG_RATIO);
        let ratio = log_ratio.exp();
        if ratio > params.rho_bar {
            rho_clipped += 1;
        }
        rhos[t] = ratio.min(params.rho_bar);
        cs[t] = ratio.min(params.c_bar);
    }

    let mut vs = vec![0.0f32; n];
    let mut advantages = vec![0.0f32; n];
    let mut next_vs = bootstrap_value;
    let mut next_value = bootstrap_value;

    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };

        let delta = rhos[t] * (rewards[t] + gamma * next_value * not_done - values[t]);
        vs[t] = values[t] + delta + gamma * not_done * cs[t] * (next_vs - next_value);
        advantages[t] = rewards[t] + gamma * next_vs * not_done - values[t];

        next_vs = vs[t];
        next_value = values[t];
    }

    VTraceResult {
        vs,
        advantages,
        rhos,
        cs,
        rho_clipped,
        floor_clipped,
    }
}

/// Compute V-trace for a batch of trajectories.
pub fn compute_vtrace_batch(trajectories: &[VTraceInput], params: &VTraceParams) -> Vec<VTraceResult> {
    trajectories
        .iter()
        .map(|traj| {
            compute_vtrace(
                &traj.behavior_log_probs,
                &traj.target_log_probs,
                &traj.rewards,
                &traj.values,
                &traj.dones,
                traj.bootstrap_value,
                params,
            )
        })
        .collect()
}
