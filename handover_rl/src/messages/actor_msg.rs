//! Messages from actor threads to the learner.
//!
//! # Data Integrity
//!
//! Statistics filter non-finite returns before they reach running averages;
//! one corrupt episode must not poison the aggregate.

use crate::core::trajectory::Trajectory;

/// What an actor puts on the trajectory channel.
#[derive(Debug, Clone)]
pub enum ActorMsg {
    /// A finished rollout segment.
    Trajectory(Trajectory),

    /// The actor is going away abnormally; anything it queued earlier is
    /// suspect and the learner drops it.
    Disconnected { actor_id: usize, reason: String },
}

impl ActorMsg {
    pub fn actor_id(&self) -> usize {
        match self {
            ActorMsg::Trajectory(traj) => traj.actor_id,
            ActorMsg::Disconnected { actor_id, .. } => *actor_id,
        }
    }
}

/// Statistics reported by an actor when it stops.
#[derive(Debug, Clone, Default)]
pub struct ActorStats {
    pub actor_id: usize,

    /// Slots simulated across all of the actor's environments.
    pub steps: u64,

    /// Episodes completed (including those with non-finite returns).
    pub episodes: usize,

    /// Episodes used in the average.
    pub valid_episodes: usize,

    /// Episodes whose return was NaN or infinite.
    pub filtered_episodes: usize,

    /// Mean episode return over valid episodes.
    pub avg_episode_reward: f32,

    /// Most recent episode return (may be non-finite).
    pub recent_episode_reward: f32,

    pub trajectories_sent: usize,

    /// Snapshot version in use at the last refresh.
    pub policy_version: u64,

    /// Scheduled snapshot refreshes.
    pub refreshes: usize,

    /// Refreshes forced because the lag exceeded the limit.
    pub forced_refreshes: usize,

    /// Largest lag observed between the local and published version.
    pub max_observed_lag: u64,
}

impl ActorStats {
    pub fn new(actor_id: usize) -> Self {
        Self {
            actor_id,
            ..Default::default()
        }
    }

    /// Record an episode return with Welford's incremental mean.
    pub fn record_episode(&mut self, reward: f32) {
        self.episodes += 1;
        self.recent_episode_reward = reward;

        if !reward.is_finite() {
            self.filtered_episodes += 1;
            return;
        }

        // avg_new = avg_old + (x - avg_old) / n
        self.valid_episodes += 1;
        let delta = reward - self.avg_episode_reward;
        self.avg_episode_reward += delta / self.valid_episodes as f32;
    }

    pub fn add_steps(&mut self, n: u64) {
        self.steps = self.steps.saturating_add(n);
    }

    pub fn record_refresh(&mut self, version: u64, forced: bool) {
        self.policy_version = version;
        self.refreshes += 1;
        if forced {
            self.forced_refreshes += 1;
        }
    }

    pub fn observe_lag(&mut self, lag: u64) {
        self.max_observed_lag = self.max_observed_lag.max(lag);
    }

    pub fn filtered_fraction(&self) -> f32 {
        if self.episodes == 0 {
            0.0
        } else {
            self.filtered_episodes as f32 / self.episodes as f32
        }
    }
}
