//! Shared training metrics for coordination between actors and learner.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithms::loss::LossComponents;

use super::logger::TrainingSnapshot;

/// Episode returns kept for the moving average.
pub const RECENT_RETURNS: usize = 100;

#[derive(Debug, Default)]
struct RecentWindow {
    returns: VecDeque<f32>,
    delay_sum: f64,
    collision_sum: f64,
    slots: u64,
    last_loss: LossComponents,
}

/// Thread-safe training metrics.
#[derive(Debug, Default)]
pub struct TrainingMetrics {
    env_steps: AtomicU64,
    train_steps: AtomicU64,
    episodes: AtomicU64,
    discarded_batches: AtomicU64,
    forced_refreshes: AtomicU64,
    policy_version: AtomicU64,
    recent: Mutex<RecentWindow>,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_env_steps(&self, steps: u64) {
        self.env_steps.fetch_add(steps, Ordering::Relaxed);
    }

    /// Accumulate per-slot delay and collision sums over `slots` slots.
    pub fn record_slots(&self, slots: u64, delay_sum: f64, collision_sum: f64) {
        let mut recent = self.recent.lock();
        recent.slots += slots;
        recent.delay_sum += delay_sum;
        recent.collision_sum += collision_sum;
    }

    /// Record an episode return. Non-finite returns only bump the counter.
    pub fn record_episode(&self, episode_return: f32) {
        self.episodes.fetch_add(1, Ordering::Relaxed);
        if !episode_return.is_finite() {
            return;
        }
        let mut recent = self.recent.lock();
        if recent.returns.len() == RECENT_RETURNS {
            recent.returns.pop_front();
        }
        recent.returns.push_back(episode_return);
    }

    pub fn record_update(&self, loss: LossComponents) {
        self.train_steps.fetch_add(1, Ordering::Relaxed);
        self.recent.lock().last_loss = loss;
    }

    pub fn record_discarded_batch(&self) {
        self.discarded_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_refresh(&self) {
        self.forced_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_policy_version(&self, version: u64) {
        self.policy_version.store(version, Ordering::Relaxed);
    }

    pub fn env_steps(&self) -> u64 {
        self.env_steps.load(Ordering::Relaxed)
    }

    pub fn train_steps(&self) -> u64 {
        self.train_steps.load(Ordering::Relaxed)
    }

    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    pub fn discarded_batches(&self) -> u64 {
        self.discarded_batches.load(Ordering::Relaxed)
    }

    pub fn forced_refreshes(&self) -> u64 {
        self.forced_refreshes.load(Ordering::Relaxed)
    }

    /// Mean of the last [`RECENT_RETURNS`] finite episode returns.
    pub fn avg_return(&self) -> f32 {
        let recent = self.recent.lock();
        if recent.returns.is_empty() {
            return 0.0;
        }
        recent.returns.iter().sum::<f32>() / recent.returns.len() as f32
    }

    /// Mean per-slot `(D, C)` since start.
    pub fn mean_delay_collision(&self) -> (f32, f32) {
        let recent = self.recent.lock();
        if recent.slots == 0 {
            return (0.0, 0.0);
        }
        let n = recent.slots as f64;
        ((recent.delay_sum / n) as f32, (recent.collision_sum / n) as f32)
    }

    /// Point-in-time view for loggers.
    pub fn snapshot(&self) -> TrainingSnapshot {
        let (mean_delay, mean_collision) = self.mean_delay_collision();
        let loss = self.recent.lock().last_loss;
        TrainingSnapshot {
            step: self.train_steps(),
            env_steps: self.env_steps(),
            episodes: self.episodes(),
            avg_return: self.avg_return(),
            mean_delay,
            mean_collision,
            policy_loss: loss.policy_loss,
            value_loss: loss.value_loss,
            entropy: loss.entropy,
            policy_version: self.policy_version.load(Ordering::Relaxed),
            discarded_batches: self.discarded_batches(),
            forced_refreshes: self.forced_refreshes(),
        }
    }
}

pub type SharedTrainingMetrics = Arc<TrainingMetrics>;

pub fn training_metrics() -> SharedTrainingMetrics {
    Arc::new(TrainingMetrics::new())
}
