//! Vectorised handover environment.
//!
//! An actor steps `n_envs` independent simulators in lockstep. Each one has
//! its own seed and capacity source; finished episodes are reset explicitly
//! through a [`ResetMask`] so the caller can record the terminal step first.

use crate::action::JointAction;
use crate::capacity::CapacityConfig;
use crate::config::EnvConfig;
use crate::error::EnvError;
use crate::simulator::{mix_seed, HandoverEnv, StepOutcome};
use crate::state::State;

/// Which environments to reset.
#[derive(Debug, Clone, Default)]
pub struct ResetMask {
    mask: Vec<bool>,
}

impl ResetMask {
    pub fn from_dones(dones: &[bool]) -> Self {
        Self {
            mask: dones.to_vec(),
        }
    }

    pub fn from_outcomes(outcomes: &[StepOutcome]) -> Self {
        Self {
            mask: outcomes.iter().map(|o| o.done).collect(),
        }
    }

    pub fn any(&self) -> bool {
        self.mask.iter().any(|&x| x)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.mask
    }

    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&x| x).count()
    }
}

/// `n_envs` handover simulators sharing one [`EnvConfig`].
#[derive(Debug)]
pub struct VecHandoverEnv {
    config: EnvConfig,
    envs: Vec<HandoverEnv>,
}

impl VecHandoverEnv {
    pub fn new(
        config: EnvConfig,
        capacity: &CapacityConfig,
        n_envs: usize,
        base_seed: u64,
    ) -> Result<Self, EnvError> {
        config.validate()?;
        if n_envs == 0 {
            return Err(EnvError::InvalidConfig("n_envs must be >= 1".into()));
        }
        let envs = (0..n_envs as u64)
            .map(|i| {
                let seed = mix_seed(base_seed, i);
                let source = capacity.build(config.n_targets, seed)?;
                HandoverEnv::new(config.clone(), source, seed)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, envs })
    }

    pub fn n_envs(&self) -> usize {
        self.envs.len()
    }

    pub fn obs_size(&self) -> usize {
        self.config.obs_size()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.envs.iter().map(|e| e.state())
    }

    /// Write flat features of every environment into `buffer`
    /// (`n_envs * obs_size`, row per environment).
    pub fn write_observations(&self, buffer: &mut [f32]) {
        let obs_size = self.obs_size();
        let mut scratch = Vec::with_capacity(obs_size);
        for (env, out) in self.envs.iter().zip(buffer.chunks_mut(obs_size)) {
            scratch.clear();
            env.state()
                .write_features(self.config.episode_length, &mut scratch);
            out.copy_from_slice(&scratch);
        }
    }

    pub fn observations(&self) -> Vec<f32> {
        let mut buffer = vec![0.0; self.n_envs() * self.obs_size()];
        self.write_observations(&mut buffer);
        buffer
    }

    /// Step every environment with its own joint action.
    ///
    /// A malformed action aborts the whole call before any environment moves.
    pub fn step(&mut self, actions: &[JointAction]) -> Result<Vec<StepOutcome>, EnvError> {
        if actions.len() != self.envs.len() {
            return Err(EnvError::InvalidStateShape {
                field: "actions per env".into(),
                expected: self.envs.len(),
                found: actions.len(),
            });
        }
        for action in actions {
            action.validate_shape(self.config.n_ues, self.config.n_targets)?;
        }
        self.envs
            .iter_mut()
            .zip(actions)
            .map(|(env, action)| env.step(action))
            .collect()
    }

    pub fn reset_envs(&mut self, mask: &ResetMask) {
        for (env, &reset) in self.envs.iter_mut().zip(mask.as_slice()) {
            if reset {
                env.reset();
            }
        }
    }

    pub fn reset_all(&mut self) {
        for env in &mut self.envs {
            env.reset();
        }
    }
}
