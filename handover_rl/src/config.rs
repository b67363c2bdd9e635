//! Training and inference configuration.
//!
//! One [`DhoConfig`] drives the whole system: the MDP shape handed to every
//! simulator, the V-trace constants, the actor/learner topology and the live
//! decision budget. It deserialises from JSON with every field optional.
//!
//! # Example
//!
//! ```ignore
//! let config = DhoConfig::new()
//!     .with_n_ues(8)
//!     .with_n_targets(4)
//!     .with_nu(0.5)
//!     .with_actor_count(4)
//!     .with_rollout_horizon(20);
//! config.validate()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use leo_access_env::{CapacityConfig, EnvConfig};

use crate::algorithms::vtrace::VTraceParams;
use crate::error::HandoverError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DhoConfig {
    // === MDP ===
    /// `J`: tracked UEs
    pub n_ues: usize,
    /// `K`: choices per UE including "no request"
    pub n_targets: usize,
    /// `P`: random-access preambles
    pub n_preambles: usize,
    /// `nu`: collision weight in the reward
    pub nu: f32,
    /// Slots per observation window
    pub episode_length: u64,
    /// Per-slot RB capacity used during training
    pub capacity: CapacityConfig,

    // === V-trace / loss ===
    pub gamma: f32,
    pub rho_bar: f32,
    pub c_bar: f32,
    /// `beta`: entropy bonus coefficient
    #[serde(alias = "beta")]
    pub entropy_coef: f32,
    pub vf_coef: f32,
    /// Lower bound on `mu(a|s)` before the importance ratio is formed
    pub probability_floor: f32,

    // === Optimiser ===
    pub learning_rate: f64,
    pub max_grad_norm: Option<f32>,
    pub hidden_size: usize,

    // === Topology ===
    pub actor_count: usize,
    pub envs_per_actor: usize,
    /// Slots per shipped trajectory
    pub rollout_horizon: usize,
    /// Trajectories per learner update
    pub batch_size: usize,
    /// Bounded trajectory queue length
    pub queue_capacity: usize,
    /// Longest the learner waits to fill a batch
    pub batch_timeout_ms: u64,
    /// Slots between behavior refreshes on an actor
    pub staleness_refresh_interval: usize,
    /// Versions an actor may lag before a forced refresh
    pub max_staleness: u64,
    /// Updates between publishes of the target snapshot
    pub publish_interval: u64,
    /// Stop after this many learner updates
    pub max_train_steps: u64,

    // === Persistence ===
    pub checkpoint_dir: Option<PathBuf>,
    pub checkpoint_interval: u64,
    pub keep_last_checkpoints: usize,

    // === Inference ===
    pub decision_latency_budget_ms: u64,

    pub seed: u64,
}

impl Default for DhoConfig {
    fn default() -> Self {
        Self {
            n_ues: 4,
            n_targets: 3,
            n_preambles: 8,
            nu: 1.0,
            episode_length: 50,
            capacity: CapacityConfig::default(),

            gamma: 0.99,
            rho_bar: 1.0,
            c_bar: 1.0,
            entropy_coef: 0.01,
            vf_coef: 0.5,
            probability_floor: 1e-6,

            learning_rate: 3e-4,
            max_grad_norm: Some(40.0),
            hidden_size: 64,

            actor_count: 2,
            envs_per_actor: 8,
            rollout_horizon: 20,
            batch_size: 16,
            queue_capacity: 64,
            batch_timeout_ms: 200,
            staleness_refresh_interval: 20,
            max_staleness: 8,
            publish_interval: 1,
            max_train_steps: 1_000,

            checkpoint_dir: None,
            checkpoint_interval: 100,
            keep_last_checkpoints: 5,

            decision_latency_budget_ms: 20,

            seed: 0,
        }
    }
}

impl DhoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HandoverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HandoverError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| HandoverError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn env_config(&self) -> EnvConfig {
        EnvConfig::new()
            .with_n_ues(self.n_ues)
            .with_n_targets(self.n_targets)
            .with_n_preambles(self.n_preambles)
            .with_nu(self.nu)
            .with_episode_length(self.episode_length)
    }

    pub fn vtrace_params(&self) -> VTraceParams {
        VTraceParams {
            gamma: self.gamma,
            rho_bar: self.rho_bar,
            c_bar: self.c_bar,
            probability_floor: self.probability_floor,
        }
    }

    pub fn obs_size(&self) -> usize {
        self.env_config().obs_size()
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn decision_latency_budget(&self) -> Duration {
        Duration::from_millis(self.decision_latency_budget_ms)
    }

    pub fn total_envs(&self) -> usize {
        self.actor_count * self.envs_per_actor
    }

    // === Builder methods ===

    pub fn with_n_ues(mut self, n_ues: usize) -> Self {
        self.n_ues = n_ues;
        self
    }

    pub fn with_n_targets(mut self, n_targets: usize) -> Self {
        self.n_targets = n_targets;
        self
    }

    pub fn with_n_preambles(mut self, n_preambles: usize) -> Self {
        self.n_preambles = n_preambles;
        self
    }

    pub fn with_nu(mut self, nu: f32) -> Self {
        self.nu = nu;
        self
    }

    pub fn with_episode_length(mut self, slots: u64) -> Self {
        self.episode_length = slots;
        self
    }

    pub fn with_capacity(mut self, capacity: CapacityConfig) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    /// Set both V-trace truncation bounds.
    pub fn with_truncation(mut self, rho_bar: f32, c_bar: f32) -> Self {
        self.rho_bar = rho_bar;
        self.c_bar = c_bar;
        self
    }

    pub fn with_entropy_coef(mut self, beta: f32) -> Self {
        self.entropy_coef = beta;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_actor_count(mut self, actors: usize) -> Self {
        self.actor_count = actors;
        self
    }

    pub fn with_envs_per_actor(mut self, envs: usize) -> Self {
        self.envs_per_actor = envs;
        self
    }

    pub fn with_rollout_horizon(mut self, horizon: usize) -> Self {
        self.rollout_horizon = horizon;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout_ms(mut self, ms: u64) -> Self {
        self.batch_timeout_ms = ms;
        self
    }

    pub fn with_staleness_refresh_interval(mut self, slots: usize) -> Self {
        self.staleness_refresh_interval = slots;
        self
    }

    pub fn with_max_staleness(mut self, versions: u64) -> Self {
        self.max_staleness = versions;
        self
    }

    pub fn with_publish_interval(mut self, updates: u64) -> Self {
        self.publish_interval = updates;
        self
    }

    pub fn with_max_train_steps(mut self, steps: u64) -> Self {
        self.max_train_steps = steps;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_checkpoint_interval(mut self, updates: u64) -> Self {
        self.checkpoint_interval = updates;
        self
    }

    pub fn with_decision_latency_budget_ms(mut self, ms: u64) -> Self {
        self.decision_latency_budget_ms = ms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), HandoverError> {
        self.env_config().validate()?;
        self.capacity.validate(self.n_targets)?;

        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(HandoverError::Config(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if !(self.c_bar >= 0.0 && self.rho_bar >= self.c_bar) {
            return Err(HandoverError::Config(format!(
                "truncation bounds must satisfy rho_bar >= c_bar >= 0, got rho_bar={} c_bar={}",
                self.rho_bar, self.c_bar
            )));
        }
        if !(self.entropy_coef >= 0.0) {
            return Err(HandoverError::Config("entropy_coef must be >= 0".into()));
        }
        if !(self.vf_coef >= 0.0) {
            return Err(HandoverError::Config("vf_coef must be >= 0".into()));
        }
        if !(self.probability_floor > 0.0 && self.probability_floor < 1.0) {
            return Err(HandoverError::Config(
                "probability_floor must be in (0, 1)".into(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(HandoverError::Config("learning_rate must be > 0".into()));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm > 0.0) {
                return Err(HandoverError::Config("max_grad_norm must be > 0".into()));
            }
        }

        let positive = [
            ("hidden_size", self.hidden_size),
            ("actor_count", self.actor_count),
            ("envs_per_actor", self.envs_per_actor),
            ("rollout_horizon", self.rollout_horizon),
            ("batch_size", self.batch_size),
            ("queue_capacity", self.queue_capacity),
            ("staleness_refresh_interval", self.staleness_refresh_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(HandoverError::Config(format!("{} must be >= 1", name)));
            }
        }
        if self.publish_interval == 0 {
            return Err(HandoverError::Config("publish_interval must be >= 1".into()));
        }
        if self.checkpoint_dir.is_some() && self.checkpoint_interval == 0 {
            return Err(HandoverError::Config(
                "checkpoint_interval must be >= 1 when checkpointing".into(),
            ));
        }
        Ok(())
    }
}
