//! Experience and trajectory types shipped from actors to the learner.
//!
//! A trajectory is owned by one actor until it is sent, then by the learner
//! until V-trace has consumed it.

use leo_access_env::{JointAction, State};

/// One slot `(s[n], a[n], r[n], s[n+1])` plus what V-trace needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    pub state: State,
    pub action: JointAction,
    pub reward: f32,
    pub next_state: State,
    /// Episode ended on this slot.
    pub done: bool,
    /// `log mu(a|s)` under the behavior snapshot that chose the action.
    pub behavior_log_prob: f32,
    /// Version of that behavior snapshot.
    pub behavior_version: u64,
}

impl Experience {
    /// Per-UE choices of the joint action.
    pub fn choices(&self) -> Vec<usize> {
        self.action.choices()
    }
}

/// Ordered slots from one simulator, at most one rollout horizon long.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub actor_id: usize,
    /// Simulator index within the actor.
    pub env_index: usize,
    pub steps: Vec<Experience>,
    /// Undiscounted return when the trajectory closes an episode.
    pub episode_return: Option<f32>,
}

impl Trajectory {
    pub fn new(actor_id: usize, env_index: usize) -> Self {
        Self {
            actor_id,
            env_index,
            steps: Vec::new(),
            episode_return: None,
        }
    }

    pub fn with_capacity(actor_id: usize, env_index: usize, capacity: usize) -> Self {
        Self {
            actor_id,
            env_index,
            steps: Vec::with_capacity(capacity),
            episode_return: None,
        }
    }

    pub fn push(&mut self, step: Experience) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.steps.iter()
    }

    /// State to bootstrap `V(s_T)` from.
    pub fn bootstrap_state(&self) -> Option<&State> {
        self.steps.last().map(|s| &s.next_state)
    }

    /// Last step ended the episode.
    pub fn is_terminal(&self) -> bool {
        self.steps.last().map(|s| s.done).unwrap_or(false)
    }

    /// Oldest behavior version used in this trajectory.
    pub fn oldest_version(&self) -> Option<u64> {
        self.steps.iter().map(|s| s.behavior_version).min()
    }

    pub fn rewards(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.reward).collect()
    }

    pub fn dones(&self) -> Vec<bool> {
        self.steps.iter().map(|s| s.done).collect()
    }

    pub fn behavior_log_probs(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.behavior_log_prob).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(slot: u64, reward: f32, done: bool, version: u64) -> Experience {
        let state = State::initial(2, 2);
        let mut next_state = state.clone();
        next_state.slot = slot + 1;
        Experience {
            state: State { slot, ..state },
            action: JointAction::no_request(2, 2),
            reward,
            next_state,
            done,
            behavior_log_prob: -0.5,
            behavior_version: version,
        }
    }

    #[test]
    fn test_empty_trajectory() {
        let traj = Trajectory::new(0, 1);
        assert!(traj.is_empty());
        assert!(traj.bootstrap_state().is_none());
        assert!(!traj.is_terminal());
        assert_eq!(traj.oldest_version(), None);
    }

    #[test]
    fn test_accessors() {
        let mut traj = Trajectory::with_capacity(2, 0, 4);
        traj.push(step(0, -1.0, false, 3));
        traj.push(step(1, -0.5, true, 4));

        assert_eq!(traj.len(), 2);
        assert_eq!(traj.rewards(), vec![-1.0, -0.5]);
        assert_eq!(traj.dones(), vec![false, true]);
        assert_eq!(traj.behavior_log_probs(), vec![-0.5, -0.5]);
        assert!(traj.is_terminal());
        assert_eq!(traj.bootstrap_state().map(|s| s.slot), Some(2));
        assert_eq!(traj.oldest_version(), Some(3));
    }
}
