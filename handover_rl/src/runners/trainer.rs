//! Distributed IMPALA trainer for the handover policy.
//!
//! Coordinates `actor_count` actor threads and one learner thread. The caller's
//! thread becomes the monitor: it samples [`TrainingMetrics`] on a fixed
//! period, forwards snapshots to a [`MetricsLogger`] and tears everything down
//! once the learner returns.
//!
//! ```text
//!                ┌───────────────────────────┐
//!                │ Monitor (caller thread)   │
//!                │  • metrics → logger       │
//!                │  • stop / join            │
//!                └─────────────┬─────────────┘
//!        ┌─────────────────────┼─────────────────────┐
//!        ↓                     ↓                     ↓
//!  ┌────────────┐        ┌────────────┐        ┌────────────┐
//!  │ dho-actor-0│  ...   │ dho-actor-N│        │ dho-learner│
//!  │ inner B    │        │ inner B    │        │ autodiff B │
//!  └─────┬──────┘        └─────┬──────┘        └─────┬──────┘
//!        └──── bounded ActorMsg queue ──────────────►│
//!                                                    ↓
//!                                              PolicyStore
//! ```
//!
//! Shutdown order: the learner finishes (stop flag, update limit, or every
//! actor gone), then the stop flag is raised for the actors and they are
//! joined. Dropping the learner's receiver also unblocks any actor waiting on
//! a full queue.
//!
//! [`TrainingMetrics`]: crate::metrics::TrainingMetrics

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use burn::tensor::backend::AutodiffBackend;

use crate::actors::ActorPool;
use crate::algorithms::policy::{HandoverNet, HandoverNetConfig};
use crate::checkpoint::{CheckpointError, Checkpointer, CheckpointerConfig};
use crate::config::DhoConfig;
use crate::core::policy_store::policy_store;
use crate::core::snapshot::ParameterSnapshot;
use crate::error::HandoverError;
use crate::learner::{create_optimizer, Learner, LearnerConfig, LearnerOutcome};
use crate::messages::{ActorStats, FinishReason, LearnerStats};
use crate::metrics::{training_metrics, MetricsLogger, SharedTrainingMetrics, TrainingSnapshot};

const MONITOR_PERIOD: Duration = Duration::from_millis(20);

/// Cooperative stop for a running trainer.
///
/// The learner observes it between updates, actors between slots.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Result of a finished training run.
pub struct TrainingReport<B: AutodiffBackend> {
    /// Learner model after the last applied update.
    pub model: HandoverNet<B>,
    pub learner: LearnerStats,
    /// Stats of actors that exited normally.
    pub actors: Vec<ActorStats>,
    pub reason: FinishReason,
    /// Version of the last published behavior snapshot.
    pub final_version: u64,
    /// Learner step of the final target snapshot, including resumed steps.
    pub final_train_step: u64,
    pub metrics: TrainingSnapshot,
    pub elapsed: Duration,
}

/// Multi-actor IMPALA trainer.
///
/// Actors run on `B::InnerBackend` so rollouts never build autodiff graphs.
pub struct DistributedTrainer<B: AutodiffBackend> {
    config: DhoConfig,
    stop: Arc<AtomicBool>,
    metrics: SharedTrainingMetrics,
    log_interval: Duration,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> DistributedTrainer<B> {
    /// Validates `config` up front; nothing is spawned until [`run`](Self::run).
    pub fn new(config: DhoConfig) -> Result<Self, HandoverError> {
        config.validate()?;
        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            metrics: training_metrics(),
            log_interval: Duration::from_secs(1),
            _backend: PhantomData,
        })
    }

    /// Period between logger calls while training.
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn config(&self) -> &DhoConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    pub fn metrics(&self) -> SharedTrainingMetrics {
        Arc::clone(&self.metrics)
    }

    fn checkpointer(&self) -> Result<Option<Checkpointer>, HandoverError> {
        let Some(dir) = self.config.checkpoint_dir.as_ref() else {
            return Ok(None);
        };
        let config = CheckpointerConfig::new(dir.clone())
            .with_save_interval(self.config.checkpoint_interval)
            .with_keep_last_n(self.config.keep_last_checkpoints);
        Ok(Some(Checkpointer::new(config)?))
    }

    /// Fresh parameters, or the newest checkpoint when one exists.
    fn initial_model(
        &self,
        checkpointer: Option<&Checkpointer>,
        device: &B::Device,
    ) -> Result<(HandoverNet<B>, ParameterSnapshot), HandoverError> {
        let model = HandoverNetConfig::from_config(&self.config).init::<B>(device);

        if let Some(checkpointer) = checkpointer {
            match checkpointer.load_latest() {
                Ok(record) => {
                    let model = model.load_snapshot(&record.snapshot, device)?;
                    log::info!(
                        "resuming from checkpoint v{} step {}",
                        record.snapshot.version,
                        record.snapshot.train_step
                    );
                    return Ok((model, record.snapshot));
                }
                Err(CheckpointError::NoCheckpoints) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot = model.to_snapshot(0, 0)?;
        Ok((model, snapshot))
    }

    /// Train until the update limit, a stop request, or every actor is gone.
    ///
    /// Only start-up failures are returned as errors. Problems during training
    /// are logged and counted, and show up in the report.
    pub fn run(&self, logger: &mut dyn MetricsLogger) -> Result<TrainingReport<B>, HandoverError> {
        let config = &self.config;
        let device = B::Device::default();
        let start = Instant::now();

        let checkpointer = self.checkpointer()?;
        let (model, snapshot) = self.initial_model(checkpointer.as_ref(), &device)?;
        let store = policy_store(snapshot);
        self.metrics.set_policy_version(store.version());

        log::info!(
            "training: {} actors x {} envs, J={} K={}, horizon {}, batch {}",
            config.actor_count,
            config.envs_per_actor,
            config.n_ues,
            config.n_targets,
            config.rollout_horizon,
            config.batch_size
        );

        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let pool = ActorPool::spawn::<B::InnerBackend>(
            config,
            &store,
            &sender,
            &self.metrics,
            &self.stop,
        )
        .inspect_err(|_| self.stop.store(true, Ordering::Relaxed))?;
        // Actors hold the only senders now; the queue closes when they all exit.
        drop(sender);

        let learner_config = LearnerConfig::from_config(config);
        let max_grad_norm = config.max_grad_norm;
        let learner_store = Arc::clone(&store);
        let learner_metrics = Arc::clone(&self.metrics);
        let learner_stop = Arc::clone(&self.stop);

        let learner = std::thread::Builder::new()
            .name("dho-learner".to_string())
            .spawn(move || {
                let device = B::Device::default();
                let learner = Learner::new(
                    learner_config,
                    model,
                    create_optimizer::<B>(max_grad_norm),
                    receiver,
                    learner_store,
                    learner_metrics,
                    checkpointer,
                    device,
                );
                learner.run(&learner_stop)
            });
        let learner = match learner {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.store(true, Ordering::Relaxed);
                pool.join_all();
                return Err(HandoverError::Worker(format!("spawn learner: {}", e)));
            }
        };

        let mut last_log = Instant::now();
        while !learner.is_finished() {
            std::thread::sleep(MONITOR_PERIOD);
            if last_log.elapsed() >= self.log_interval {
                logger.log(&self.metrics.snapshot());
                last_log = Instant::now();
            }
        }

        let outcome: Result<LearnerOutcome<B>, _> = learner.join();
        self.stop.store(true, Ordering::Relaxed);
        let actors = pool.join_all();

        let metrics = self.metrics.snapshot();
        logger.log(&metrics);
        logger.flush();

        let outcome = outcome.map_err(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            log::error!("learner panicked: {}", msg);
            HandoverError::Worker(format!("learner panicked: {}", msg))
        })?;

        let elapsed = start.elapsed();
        let final_train_step = store.get_target().train_step;
        log::info!(
            "training finished ({:?}) in {:.1}s: {} updates, {} env steps, {} episodes",
            outcome.reason,
            elapsed.as_secs_f32(),
            outcome.stats.train_steps,
            metrics.env_steps,
            metrics.episodes
        );

        Ok(TrainingReport {
            model: outcome.model,
            learner: outcome.stats,
            actors,
            reason: outcome.reason,
            final_version: store.version(),
            final_train_step,
            metrics,
            elapsed,
        })
    }
}
