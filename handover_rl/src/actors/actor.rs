//! Rollout actor.
//!
//! Each actor owns a [`VecHandoverEnv`] and runs the policy from its local
//! copy of the behavior snapshot. The copy is refreshed from the
//! [`PolicyStore`](crate::core::policy_store::PolicyStore) every
//! `refresh_interval` slots, and immediately when the published version runs
//! more than `max_staleness` ahead. Trajectories are shipped on a bounded
//! channel; a full channel blocks the actor briefly, never drops data.
//!
//! Inference runs on a non-autodiff backend so rollouts build no graphs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crossbeam_channel::{SendTimeoutError, Sender};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use leo_access_env::{CapacityConfig, EnvConfig, JointAction, ResetMask, VecHandoverEnv};

use crate::algorithms::policy::{HandoverNet, HandoverNetConfig};
use crate::config::DhoConfig;
use crate::core::policy_store::SharedPolicyStore;
use crate::core::trajectory::{Experience, Trajectory};
use crate::error::HandoverError;
use crate::messages::{ActorMsg, ActorStats};
use crate::metrics::SharedTrainingMetrics;

/// Actor configuration.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub actor_id: usize,
    /// Parallel simulators
    pub n_envs: usize,
    /// Slots per shipped trajectory
    pub rollout_horizon: usize,
    /// Slots between scheduled behavior refreshes
    pub refresh_interval: usize,
    /// Versions the local copy may lag before a forced refresh
    pub max_staleness: u64,
    /// Retry period while the trajectory queue is full
    pub send_timeout: Duration,
    pub seed: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            actor_id: 0,
            n_envs: 8,
            rollout_horizon: 20,
            refresh_interval: 20,
            max_staleness: 8,
            send_timeout: Duration::from_millis(50),
            seed: 0,
        }
    }
}

impl ActorConfig {
    pub fn for_actor(actor_id: usize) -> Self {
        Self {
            actor_id,
            ..Default::default()
        }
    }

    /// Derive an actor's settings from the run configuration.
    pub fn from_config(config: &DhoConfig, actor_id: usize) -> Self {
        Self {
            actor_id,
            n_envs: config.envs_per_actor,
            rollout_horizon: config.rollout_horizon,
            refresh_interval: config.staleness_refresh_interval,
            max_staleness: config.max_staleness,
            send_timeout: Duration::from_millis(50),
            seed: config
                .seed
                .wrapping_add((actor_id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        }
    }

    pub fn with_n_envs(mut self, n_envs: usize) -> Self {
        self.n_envs = n_envs;
        self
    }

    pub fn with_rollout_horizon(mut self, horizon: usize) -> Self {
        self.rollout_horizon = horizon;
        self
    }

    pub fn with_refresh_interval(mut self, slots: usize) -> Self {
        self.refresh_interval = slots;
        self
    }

    pub fn with_max_staleness(mut self, versions: u64) -> Self {
        self.max_staleness = versions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Sends `Disconnected` if the actor thread unwinds.
struct DisconnectGuard {
    actor_id: usize,
    sender: Sender<ActorMsg>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = self.sender.send_timeout(
                ActorMsg::Disconnected {
                    actor_id: self.actor_id,
                    reason: "actor thread panicked".into(),
                },
                Duration::from_millis(100),
            );
        }
    }
}

pub struct Actor<B: Backend> {
    config: ActorConfig,
    env: VecHandoverEnv,
    model: HandoverNet<B>,
    local_version: u64,
    store: SharedPolicyStore,
    sender: Sender<ActorMsg>,
    metrics: SharedTrainingMetrics,
    rng: Xoshiro256StarStar,
    trajectories: Vec<Trajectory>,
    obs_buffer: Vec<f32>,
    slots: u64,
    stats: ActorStats,
    device: B::Device,
}

impl<B: Backend> Actor<B> {
    /// Build the simulators and load the current behavior snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ActorConfig,
        env_config: EnvConfig,
        capacity: &CapacityConfig,
        net_config: HandoverNetConfig,
        store: SharedPolicyStore,
        sender: Sender<ActorMsg>,
        metrics: SharedTrainingMetrics,
        device: B::Device,
    ) -> Result<Self, HandoverError> {
        let env = VecHandoverEnv::new(env_config, capacity, config.n_envs, config.seed)?;
        let obs_buffer = vec![0.0; env.n_envs() * env.obs_size()];

        let behavior = store.get_behavior();
        let model = net_config.init::<B>(&device).load_snapshot(&behavior, &device)?;

        let trajectories = (0..env.n_envs())
            .map(|i| Trajectory::with_capacity(config.actor_id, i, config.rollout_horizon))
            .collect();

        let mut stats = ActorStats::new(config.actor_id);
        stats.policy_version = behavior.version;

        Ok(Self {
            rng: Xoshiro256StarStar::seed_from_u64(config.seed),
            local_version: behavior.version,
            config,
            env,
            model,
            store,
            sender,
            metrics,
            trajectories,
            obs_buffer,
            slots: 0,
            stats,
            device,
        })
    }

    pub fn actor_id(&self) -> usize {
        self.config.actor_id
    }

    /// Version of the snapshot the actor is acting with.
    pub fn local_version(&self) -> u64 {
        self.local_version
    }

    pub fn stats(&self) -> &ActorStats {
        &self.stats
    }

    /// Reload the behavior snapshot if a newer one is published.
    pub fn refresh(&mut self, forced: bool) -> Result<bool, HandoverError> {
        let behavior = self.store.get_behavior();
        if behavior.version == self.local_version {
            return Ok(false);
        }
        self.model = self.model.clone().load_snapshot(&behavior, &self.device)?;
        log::debug!(
            "actor {} refreshed v{} -> v{}{}",
            self.config.actor_id,
            self.local_version,
            behavior.version,
            if forced { " (forced)" } else { "" }
        );
        self.local_version = behavior.version;
        self.stats.record_refresh(behavior.version, forced);
        Ok(true)
    }

    /// Force a refresh when the local copy lags too far behind.
    fn enforce_staleness(&mut self) -> Result<(), HandoverError> {
        let current = self.store.version();
        let lag = current.saturating_sub(self.local_version);
        self.stats.observe_lag(lag);
        if lag > self.config.max_staleness {
            let event = HandoverError::StalenessExceeded {
                actor_id: self.config.actor_id,
                local: self.local_version,
                current,
                max_lag: self.config.max_staleness,
            };
            log::warn!("{}; refreshing", event);
            if self.refresh(true)? {
                self.metrics.record_forced_refresh();
            }
        }
        Ok(())
    }

    /// Advance every simulator one slot; returns trajectories that closed.
    ///
    /// A trajectory closes at the rollout horizon or at episode end.
    pub fn collect_slot(&mut self) -> Result<Vec<Trajectory>, HandoverError> {
        if self.config.refresh_interval > 0
            && self.slots % self.config.refresh_interval as u64 == 0
        {
            self.refresh(false)?;
        }
        self.enforce_staleness()?;

        let n_envs = self.env.n_envs();
        let obs_size = self.env.obs_size();
        let n_targets = self.env.config().n_targets;

        self.env.write_observations(&mut self.obs_buffer);
        let obs = Tensor::<B, 1>::from_floats(self.obs_buffer.as_slice(), &self.device)
            .reshape([n_envs, obs_size]);
        let samples = self.model.policy.forward(obs).sample(&mut self.rng)?;

        let actions = samples
            .iter()
            .map(|s| JointAction::from_choices(&s.choices, n_targets))
            .collect::<Result<Vec<_>, _>>()?;
        let states: Vec<_> = self.env.states().cloned().collect();
        let outcomes = self.env.step(&actions)?;

        let mut closed = Vec::new();
        let mut delay_sum = 0.0f64;
        let mut collision_sum = 0.0f64;

        for (i, ((outcome, action), (state, sample))) in outcomes
            .iter()
            .zip(actions)
            .zip(states.into_iter().zip(&samples))
            .enumerate()
        {
            delay_sum += outcome.diagnostics.cost.delay as f64;
            collision_sum += outcome.diagnostics.cost.total_collision as f64;

            self.trajectories[i].push(Experience {
                state,
                action,
                reward: outcome.reward,
                next_state: outcome.next_state.clone(),
                done: outcome.done,
                behavior_log_prob: sample.log_prob,
                behavior_version: self.local_version,
            });

            if let Some(ret) = outcome.episode_return {
                self.trajectories[i].episode_return = Some(ret);
                self.stats.record_episode(ret);
                self.metrics.record_episode(ret);
            }

            if outcome.done || self.trajectories[i].len() >= self.config.rollout_horizon {
                closed.push(std::mem::replace(
                    &mut self.trajectories[i],
                    Trajectory::with_capacity(self.config.actor_id, i, self.config.rollout_horizon),
                ));
            }
        }

        let mask = ResetMask::from_outcomes(&outcomes);
        if mask.any() {
            self.env.reset_envs(&mask);
        }

        self.slots += 1;
        self.stats.add_steps(n_envs as u64);
        self.metrics.add_env_steps(n_envs as u64);
        self.metrics.record_slots(n_envs as u64, delay_sum, collision_sum);

        Ok(closed)
    }

    /// Put a trajectory on the queue, retrying while it is full.
    ///
    /// Returns `false` once the learner is gone or a stop was requested.
    fn ship(&mut self, mut trajectory: Trajectory, stop: &AtomicBool) -> bool {
        loop {
            match self
                .sender
                .send_timeout(ActorMsg::Trajectory(trajectory), self.config.send_timeout)
            {
                Ok(()) => {
                    self.stats.trajectories_sent += 1;
                    return true;
                }
                Err(SendTimeoutError::Timeout(ActorMsg::Trajectory(t))) => {
                    if stop.load(Ordering::Relaxed) {
                        return false;
                    }
                    trajectory = t;
                }
                Err(SendTimeoutError::Timeout(_)) => return false,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Collect and ship until `stop` is raised or the learner goes away.
    ///
    /// A failing slot ends the actor and tells the learner it disconnected.
    pub fn run(mut self, stop: &AtomicBool) -> ActorStats {
        let _guard = DisconnectGuard {
            actor_id: self.config.actor_id,
            sender: self.sender.clone(),
        };

        'outer: while !stop.load(Ordering::Relaxed) {
            let closed = match self.collect_slot() {
                Ok(closed) => closed,
                Err(e) => {
                    let event = HandoverError::ActorDisconnect {
                        actor_id: self.config.actor_id,
                        reason: e.to_string(),
                    };
                    log::error!("{}", event);
                    let _ = self.sender.send_timeout(
                        ActorMsg::Disconnected {
                            actor_id: self.config.actor_id,
                            reason: e.to_string(),
                        },
                        self.config.send_timeout,
                    );
                    break;
                }
            };

            for trajectory in closed {
                if !self.ship(trajectory, stop) {
                    break 'outer;
                }
            }
        }

        log::debug!(
            "actor {} stopped after {} slots, {} trajectories",
            self.config.actor_id,
            self.slots,
            self.stats.trajectories_sent
        );
        self.stats
    }
}
