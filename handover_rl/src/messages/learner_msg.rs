//! Learner statistics.

use crate::algorithms::loss::LossComponents;

/// Statistics reported by the learner.
#[derive(Debug, Clone, Default)]
pub struct LearnerStats {
    /// Optimizer updates applied.
    pub train_steps: u64,

    /// Batches dropped because the loss was not finite.
    pub discarded_batches: u64,

    pub trajectories_consumed: u64,

    /// Experience steps consumed by updates.
    pub steps_consumed: u64,

    /// Trajectories dropped because their actor disconnected.
    pub dropped_trajectories: u64,

    /// Actors that reported a disconnect.
    pub disconnected_actors: Vec<usize>,

    /// Last published snapshot version.
    pub published_version: u64,

    /// Loss parts of the most recent update.
    pub last_loss: LossComponents,

    /// Mean truncated importance weight of the most recent update.
    pub mean_rho: f32,

    /// Fraction of steps whose raw ratio exceeded `rho_bar` in the most recent update.
    pub rho_clipped_fraction: f32,

    /// Behavior probabilities raised to the floor, lifetime total.
    pub floor_clipped: u64,

    /// Average total loss over all updates.
    pub avg_loss: f32,
}

impl LearnerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful update.
    pub fn record_step(
        &mut self,
        loss: LossComponents,
        n_steps: usize,
        n_trajectories: usize,
        mean_rho: f32,
        rho_clipped: usize,
        floor_clipped: usize,
    ) {
        self.train_steps += 1;
        self.steps_consumed += n_steps as u64;
        self.trajectories_consumed += n_trajectories as u64;
        self.last_loss = loss;
        self.mean_rho = mean_rho;
        self.rho_clipped_fraction = if n_steps == 0 {
            0.0
        } else {
            rho_clipped as f32 / n_steps as f32
        };
        self.floor_clipped += floor_clipped as u64;

        let delta = loss.total_loss - self.avg_loss;
        self.avg_loss += delta / self.train_steps as f32;
    }

    pub fn record_discarded(&mut self) {
        self.discarded_batches += 1;
    }

    pub fn record_disconnect(&mut self, actor_id: usize, dropped: usize) {
        if !self.disconnected_actors.contains(&actor_id) {
            self.disconnected_actors.push(actor_id);
        }
        self.dropped_trajectories += dropped as u64;
    }

    pub fn set_published_version(&mut self, version: u64) {
        self.published_version = version;
    }
}
