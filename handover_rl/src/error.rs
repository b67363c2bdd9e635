//! Error taxonomy for training and inference.
//!
//! Operational failures (disconnects, divergence, staleness, latency) are
//! contained where they happen: they are logged and counted, never allowed to
//! stop an actor or the learner. They still get variants here so call sites
//! can report them uniformly.

use thiserror::Error;

use leo_access_env::EnvError;

use crate::checkpoint::CheckpointError;

#[derive(Debug, Error)]
pub enum HandoverError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("actor {actor_id} disconnected: {reason}")]
    ActorDisconnect { actor_id: usize, reason: String },

    #[error("training diverged at step {train_step}: {reason}")]
    TrainingDivergence { train_step: u64, reason: String },

    #[error("actor {actor_id} runs policy v{local} while v{current} is published (max lag {max_lag})")]
    StalenessExceeded {
        actor_id: usize,
        local: u64,
        current: u64,
        max_lag: u64,
    },

    #[error("decision {request_id} exceeded its {budget_ms} ms budget")]
    DecisionLatencyExceeded { request_id: u64, budget_ms: u64 },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("tensor error: {0}")]
    Tensor(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("worker thread: {0}")]
    Worker(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl HandoverError {
    pub(crate) fn tensor(err: impl std::fmt::Debug) -> Self {
        HandoverError::Tensor(format!("{:?}", err))
    }
}
