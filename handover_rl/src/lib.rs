//! # Handover RL: distributed training for LEO handover decisions
//!
//! IMPALA-style actor-learner training of a joint handover policy, plus the
//! live decision service that runs the trained policy one slot at a time.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Distributed Handover RL                         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Thread 1          Thread 2          Thread N                       │
//! │  ┌────────┐        ┌────────┐        ┌────────┐                    │
//! │  │Actor 0 │        │Actor 1 │        │Actor N │                    │
//! │  │VecEnv  │        │VecEnv  │        │VecEnv  │                    │
//! │  │mu v(k) │        │mu v(k) │        │mu v(k) │                    │
//! │  └───┬────┘        └───┬────┘        └───┬────┘                    │
//! │      │                 │                 │                          │
//! │      └─────────────────┼─────────────────┘                          │
//! │                        ▼                                            │
//! │              ┌─────────────────┐      ┌──────────────┐             │
//! │              │ Bounded queue   │      │ PolicyStore  │             │
//! │              │ (Trajectories)  │      │ (ArcSwap)    │             │
//! │              └────────┬────────┘      └──────▲───────┘             │
//! │                       ▼                      │                      │
//! │              ┌─────────────────┐             │                      │
//! │              │ Learner Thread  │─────────────┘                      │
//! │              │ V-trace + Adam  │                                    │
//! │              └─────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Actors sample from a possibly stale behavior snapshot `mu`. The learner
//! corrects for the lag with truncated importance weights (V-trace) and
//! publishes its parameters back through the store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use burn::backend::{Autodiff, NdArray};
//! use handover_rl::{ConsoleLogger, DhoConfig, DistributedTrainer};
//!
//! let config = DhoConfig::new()
//!     .with_n_ues(8)
//!     .with_n_targets(4)
//!     .with_actor_count(4)
//!     .with_max_train_steps(500);
//!
//! let trainer = DistributedTrainer::<Autodiff<NdArray<f32>>>::new(config)?;
//! let report = trainer.run(&mut ConsoleLogger::new(10))?;
//! ```

pub mod config;
pub mod error;
pub mod core;
pub mod messages;
pub mod actors;
pub mod algorithms;
pub mod learner;
pub mod runners;
pub mod inference;
pub mod metrics;
pub mod checkpoint;

pub use config::DhoConfig;
pub use error::HandoverError;

pub use crate::core::policy_store::{policy_store, PolicyStore, SharedPolicyStore};
pub use crate::core::snapshot::ParameterSnapshot;
pub use crate::core::trajectory::{Experience, Trajectory};

pub use messages::{ActorMsg, ActorStats, FinishReason, LearnerStats};

pub use actors::{Actor, ActorConfig, ActorHandle, ActorPool};

pub use algorithms::loss::{impala_loss, LossComponents, LossWeights};
pub use algorithms::policy::{HandoverNet, HandoverNetConfig, JointPolicyOutput};
pub use algorithms::vtrace::{compute_vtrace, compute_vtrace_batch, VTraceInput, VTraceParams, VTraceResult};

pub use learner::{create_optimizer, Learner, LearnerConfig, LearnerOutcome, UpdateReport};

pub use runners::{DistributedTrainer, StopHandle, TrainingReport};

pub use inference::{
    DecisionMetrics, DecisionMode, DecisionPolicy, DecisionRecord, DecisionService,
    DecisionServiceConfig, NetworkPolicy,
};

pub use metrics::training_metrics::{training_metrics, SharedTrainingMetrics, TrainingMetrics};
pub use metrics::logger::{CSVLogger, ConsoleLogger, MetricsLogger, MultiLogger, TrainingSnapshot};

pub use checkpoint::{CheckpointError, CheckpointInfo, CheckpointRecord, Checkpointer, CheckpointerConfig};

pub use leo_access_env as env;
