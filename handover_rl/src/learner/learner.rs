//! Central learner.
//!
//! Drains trajectories from the actor queue, runs one batched forward pass
//! over every step plus one bootstrap row per trajectory, applies V-trace per
//! trajectory and takes a single optimizer step. The updated parameters
//! become the target snapshot and are published as the new behavior baseline.
//!
//! Updates are strictly sequential. The stop flag is checked only between
//! updates, never mid-update.
//!
//! # Failure containment
//!
//! - A non-finite loss or gradient discards the batch before the optimizer
//!   step; the last good snapshot stays.
//! - A disconnected actor's pending trajectories are dropped from the batch.
//! - A failed checkpoint write is logged; training continues.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::grad_clipping::GradientClippingConfig;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::algorithms::loss::{impala_loss, LossComponents, LossWeights};
use crate::algorithms::policy::HandoverNet;
use crate::algorithms::vtrace::{compute_vtrace, VTraceParams};
use crate::checkpoint::Checkpointer;
use crate::config::DhoConfig;
use crate::core::policy_store::SharedPolicyStore;
use crate::core::snapshot::ParameterSnapshot;
use crate::core::trajectory::Trajectory;
use crate::error::HandoverError;
use crate::messages::{ActorMsg, FinishReason, LearnerStats};
use crate::metrics::SharedTrainingMetrics;

#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Trajectories per update
    pub batch_size: usize,
    /// Longest wait for a full batch
    pub batch_timeout: Duration,
    /// Updates between publishes
    pub publish_interval: u64,
    /// Stop after this many updates (0 = unlimited)
    pub max_train_steps: u64,
    pub learning_rate: f64,
    pub vtrace: VTraceParams,
    pub loss: LossWeights,
    /// Slots per episode, for feature scaling
    pub episode_length: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self::from_config(&DhoConfig::default())
    }
}

impl LearnerConfig {
    pub fn from_config(config: &DhoConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout(),
            publish_interval: config.publish_interval.max(1),
            max_train_steps: config.max_train_steps,
            learning_rate: config.learning_rate,
            vtrace: config.vtrace_params(),
            loss: LossWeights {
                vf_coef: config.vf_coef,
                entropy_coef: config.entropy_coef,
            },
            episode_length: config.episode_length,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_max_train_steps(mut self, steps: u64) -> Self {
        self.max_train_steps = steps;
        self
    }

    pub fn with_publish_interval(mut self, updates: u64) -> Self {
        self.publish_interval = updates.max(1);
        self
    }
}

/// Adam with the configured gradient-norm clipping.
pub fn create_optimizer<B: AutodiffBackend>(
    max_grad_norm: Option<f32>,
) -> impl Optimizer<HandoverNet<B>, B> {
    let mut adam_config = AdamConfig::new().with_epsilon(1e-5);
    if let Some(max_norm) = max_grad_norm {
        adam_config = adam_config.with_grad_clipping(Some(GradientClippingConfig::Norm(max_norm)));
    }
    adam_config.init()
}

/// What [`Learner::run`] hands back.
pub struct LearnerOutcome<B: AutodiffBackend> {
    pub model: HandoverNet<B>,
    pub stats: LearnerStats,
    pub reason: FinishReason,
}

/// Summary of one applied update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateReport {
    pub train_step: u64,
    pub loss: LossComponents,
    pub n_trajectories: usize,
    pub n_steps: usize,
    pub mean_rho: f32,
    /// Version published by this update, if it published.
    pub published: Option<u64>,
}

fn to_host<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>, HandoverError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(HandoverError::tensor)
}

pub struct Learner<B: AutodiffBackend, O: Optimizer<HandoverNet<B>, B>> {
    config: LearnerConfig,
    model: HandoverNet<B>,
    optimizer: O,
    receiver: Receiver<ActorMsg>,
    store: SharedPolicyStore,
    metrics: SharedTrainingMetrics,
    checkpointer: Option<Checkpointer>,
    disconnected: HashSet<usize>,
    channel_closed: bool,
    train_step: u64,
    stats: LearnerStats,
    device: B::Device,
    obs_buffer: Vec<f32>,
}

impl<B: AutodiffBackend, O: Optimizer<HandoverNet<B>, B>> Learner<B, O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LearnerConfig,
        model: HandoverNet<B>,
        optimizer: O,
        receiver: Receiver<ActorMsg>,
        store: SharedPolicyStore,
        metrics: SharedTrainingMetrics,
        checkpointer: Option<Checkpointer>,
        device: B::Device,
    ) -> Self {
        let train_step = store.get_target().train_step;
        let mut stats = LearnerStats::new();
        stats.set_published_version(store.version());
        Self {
            config,
            model,
            optimizer,
            receiver,
            store,
            metrics,
            checkpointer,
            disconnected: HashSet::new(),
            channel_closed: false,
            train_step,
            stats,
            device,
            obs_buffer: Vec::new(),
        }
    }

    pub fn train_step(&self) -> u64 {
        self.train_step
    }

    pub fn stats(&self) -> &LearnerStats {
        &self.stats
    }

    pub fn model(&self) -> &HandoverNet<B> {
        &self.model
    }

    /// Every sender is gone and the queue is empty.
    pub fn is_channel_closed(&self) -> bool {
        self.channel_closed
    }

    /// Collect up to `batch_size` trajectories, waiting at most `batch_timeout`.
    ///
    /// A `Disconnected` message removes that actor's trajectories from the
    /// batch being built and from everything it may still have queued.
    pub fn drain_batch(&mut self) -> Vec<Trajectory> {
        let deadline = Instant::now() + self.config.batch_timeout;
        let mut batch: Vec<Trajectory> = Vec::with_capacity(self.config.batch_size);

        while batch.len() < self.config.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(ActorMsg::Trajectory(traj)) => {
                    if self.disconnected.contains(&traj.actor_id) {
                        self.stats.record_disconnect(traj.actor_id, 1);
                        continue;
                    }
                    if !traj.is_empty() {
                        batch.push(traj);
                    }
                }
                Ok(ActorMsg::Disconnected { actor_id, reason }) => {
                    let before = batch.len();
                    batch.retain(|t| t.actor_id != actor_id);
                    let dropped = before - batch.len();
                    self.disconnected.insert(actor_id);
                    self.stats.record_disconnect(actor_id, dropped);
                    log::warn!(
                        "{}; dropped {} pending trajectories",
                        HandoverError::ActorDisconnect { actor_id, reason },
                        dropped
                    );
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.channel_closed = true;
                    break;
                }
            }
        }

        batch
    }

    /// One optimizer step on `batch`.
    ///
    /// Returns `TrainingDivergence` without touching the parameters when the
    /// loss or any gradient is not finite.
    pub fn train_on_batch(&mut self, batch: &[Trajectory]) -> Result<UpdateReport, HandoverError> {
        let trajectories: Vec<&Trajectory> = batch.iter().filter(|t| !t.is_empty()).collect();
        if trajectories.is_empty() {
            return Err(HandoverError::Config("empty batch".into()));
        }

        let n_traj = trajectories.len();
        let n_steps: usize = trajectories.iter().map(|t| t.len()).sum();
        let n_rows = n_steps + n_traj;
        let episode_length = self.config.episode_length;

        // rows: every step of every trajectory, then one bootstrap state per trajectory
        self.obs_buffer.clear();
        let mut choices: Vec<i64> = Vec::new();
        for traj in &trajectories {
            for step in traj.iter() {
                step.state.write_features(episode_length, &mut self.obs_buffer);
                choices.extend(step.action.choices().into_iter().map(|c| c as i64));
            }
        }
        for traj in &trajectories {
            if let Some(state) = traj.bootstrap_state() {
                state.write_features(episode_length, &mut self.obs_buffer);
            }
        }
        let obs_size = self.obs_buffer.len() / n_rows;

        let obs = Tensor::<B, 1>::from_floats(self.obs_buffer.as_slice(), &self.device)
            .reshape([n_rows, obs_size]);
        let (policy, values) = self.model.forward(obs);

        let step_rows = Tensor::<B, 1, Int>::arange(0..n_steps as i64, &self.device);
        let boot_rows = Tensor::<B, 1, Int>::arange(n_steps as i64..n_rows as i64, &self.device);

        let step_policy = policy.select_rows(step_rows.clone());
        let step_values = values.clone().select(0, step_rows);
        let target_log_probs = step_policy.log_prob(&choices, &self.device);

        let host_values = to_host(step_values.clone())?;
        let host_boot = to_host(values.select(0, boot_rows))?;
        let host_target = to_host(target_log_probs.clone())?;

        let mut vs = Vec::with_capacity(n_steps);
        let mut advantages = Vec::with_capacity(n_steps);
        let mut rhos = Vec::with_capacity(n_steps);
        let mut rho_clipped = 0;
        let mut floor_clipped = 0;

        let mut offset = 0;
        for (i, traj) in trajectories.iter().enumerate() {
            let len = traj.len();
            let bootstrap = if traj.is_terminal() { 0.0 } else { host_boot[i] };
            let result = compute_vtrace(
                &traj.behavior_log_probs(),
                &host_target[offset..offset + len],
                &traj.rewards(),
                &host_values[offset..offset + len],
                &traj.dones(),
                bootstrap,
                &self.config.vtrace,
            );
            rho_clipped += result.rho_clipped;
            floor_clipped += result.floor_clipped;
            vs.extend(result.vs);
            advantages.extend(result.advantages);
            rhos.extend(result.rhos);
            offset += len;
        }
        let mean_rho = rhos.iter().sum::<f32>() / n_steps as f32;

        let rhos_t = Tensor::<B, 1>::from_floats(rhos.as_slice(), &self.device);
        let adv_t = Tensor::<B, 1>::from_floats(advantages.as_slice(), &self.device);
        let vs_t = Tensor::<B, 1>::from_floats(vs.as_slice(), &self.device);

        let (total, loss) = impala_loss(
            target_log_probs,
            step_policy.entropy(),
            step_values,
            rhos_t,
            adv_t,
            vs_t,
            self.config.loss,
        );
        loss.check_finite(self.train_step + 1)?;

        let grads = total.backward();
        if let Some(layer) = self.model.non_finite_gradient(&grads)? {
            return Err(HandoverError::TrainingDivergence {
                train_step: self.train_step + 1,
                reason: format!("non-finite gradient in {}", layer),
            });
        }
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(self.config.learning_rate, self.model.clone(), grads);
        self.train_step += 1;

        self.stats
            .record_step(loss, n_steps, n_traj, mean_rho, rho_clipped, floor_clipped);
        self.metrics.record_update(loss);
        if floor_clipped > 0 {
            log::debug!(
                "step {}: {} behavior probabilities floor-clipped",
                self.train_step,
                floor_clipped
            );
        }

        let published = self.publish()?;

        Ok(UpdateReport {
            train_step: self.train_step,
            loss,
            n_trajectories: n_traj,
            n_steps,
            mean_rho,
            published,
        })
    }

    fn snapshot(&self) -> Result<ParameterSnapshot, HandoverError> {
        self.model
            .valid()
            .to_snapshot(self.store.version(), self.train_step)
    }

    /// Replace the target; publish it every `publish_interval` updates.
    ///
    /// Checkpoints are taken from the store afterwards, so they carry the
    /// version the weights were published under.
    fn publish(&mut self) -> Result<Option<u64>, HandoverError> {
        let snapshot = self.snapshot()?;

        let published = if self.train_step % self.config.publish_interval == 0 {
            let version = self.store.publish(snapshot);
            self.stats.set_published_version(version);
            self.metrics.set_policy_version(version);
            Some(version)
        } else {
            self.store.set_target(snapshot);
            None
        };

        if let Some(checkpointer) = self.checkpointer.as_mut() {
            if checkpointer.should_save(self.train_step) {
                let stored = self.store.get_target();
                if let Err(e) = checkpointer.save(&stored, Some(self.metrics.avg_return())) {
                    log::warn!("checkpoint at step {} failed: {}", self.train_step, e);
                }
            }
        }

        Ok(published)
    }

    fn finish_checkpoint(&mut self) {
        if self.train_step == 0 {
            return;
        }
        let target = self.store.get_target();
        let metric = Some(self.metrics.avg_return());
        if let Some(checkpointer) = self.checkpointer.as_mut() {
            if let Err(e) = checkpointer.save(&target, metric) {
                log::warn!("final checkpoint failed: {}", e);
            }
        }
    }

    /// Train until stopped, the update limit is reached or every actor is gone.
    pub fn run(mut self, stop: &AtomicBool) -> LearnerOutcome<B> {
        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                break FinishReason::Stopped;
            }
            if self.config.max_train_steps > 0 && self.train_step >= self.config.max_train_steps {
                break FinishReason::Completed;
            }

            let batch = self.drain_batch();
            if batch.is_empty() {
                if self.channel_closed {
                    break FinishReason::ActorsExhausted;
                }
                continue;
            }

            match self.train_on_batch(&batch) {
                Ok(_) => {}
                Err(e @ HandoverError::TrainingDivergence { .. }) => {
                    log::warn!("{}; discarded batch of {} trajectories", e, batch.len());
                    self.stats.record_discarded();
                    self.metrics.record_discarded_batch();
                }
                Err(e) => {
                    log::error!("update failed, batch discarded: {}", e);
                    self.stats.record_discarded();
                    self.metrics.record_discarded_batch();
                }
            }
        };

        self.finish_checkpoint();
        log::info!(
            "learner finished ({:?}) after {} updates, {} discarded",
            reason,
            self.train_step,
            self.stats.discarded_batches
        );

        LearnerOutcome {
            model: self.model,
            stats: self.stats,
            reason,
        }
    }
}
