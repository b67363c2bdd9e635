//! End-to-end trainer runs on a small topology.

use std::time::Duration;

use burn::backend::{Autodiff, NdArray};

use super::trainer::DistributedTrainer;
use crate::config::DhoConfig;
use crate::messages::FinishReason;
use crate::metrics::{MetricsLogger, TrainingSnapshot};

type TB = Autodiff<NdArray<f32>>;

#[derive(Default)]
struct RecordingLogger {
    snapshots: Vec<TrainingSnapshot>,
    flushed: bool,
}

impl MetricsLogger for RecordingLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        self.snapshots.push(snapshot.clone());
    }

    fn flush(&mut self) {
        self.flushed = true;
    }
}

fn small_config() -> DhoConfig {
    DhoConfig::new()
        .with_n_ues(2)
        .with_n_targets(3)
        .with_episode_length(10)
        .with_hidden_size(16)
        .with_actor_count(2)
        .with_envs_per_actor(2)
        .with_rollout_horizon(5)
        .with_batch_size(2)
        .with_batch_timeout_ms(100)
        .with_seed(7)
}

#[test]
fn test_trains_to_update_limit() {
    let trainer = DistributedTrainer::<TB>::new(small_config().with_max_train_steps(3))
        .unwrap()
        .with_log_interval(Duration::from_millis(10));
    let mut logger = RecordingLogger::default();

    let report = trainer.run(&mut logger).unwrap();

    assert_eq!(report.reason, FinishReason::Completed);
    assert_eq!(report.learner.train_steps, 3);
    assert_eq!(report.final_train_step, 3);
    assert_eq!(report.final_version, 3);
    assert_eq!(report.actors.len(), 2);
    assert!(report.metrics.env_steps > 0);
    assert!(report.learner.last_loss.is_finite());

    let last = logger.snapshots.last().unwrap();
    assert_eq!(last.step, 3);
    assert_eq!(last.policy_version, 3);
    assert!(logger.flushed);
}

#[test]
fn test_stop_handle_halts_training() {
    let trainer = DistributedTrainer::<TB>::new(small_config().with_max_train_steps(0)).unwrap();
    let stop = trainer.stop_handle();
    assert!(!stop.is_stopped());

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        stop.stop();
    });
    let report = trainer.run(&mut RecordingLogger::default()).unwrap();
    stopper.join().unwrap();

    assert_eq!(report.reason, FinishReason::Stopped);
    assert!(trainer.stop_handle().is_stopped());
    assert_eq!(report.actors.len(), 2);
    assert!(report.actors.iter().all(|a| a.steps > 0));
}

#[test]
fn test_resumes_from_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config()
        .with_checkpoint_dir(dir.path())
        .with_checkpoint_interval(1);

    let first = DistributedTrainer::<TB>::new(config.clone().with_max_train_steps(2))
        .unwrap()
        .run(&mut RecordingLogger::default())
        .unwrap();
    assert_eq!(first.final_train_step, 2);
    assert_eq!(first.final_version, 2);

    let second = DistributedTrainer::<TB>::new(config.with_max_train_steps(4))
        .unwrap()
        .run(&mut RecordingLogger::default())
        .unwrap();
    assert_eq!(second.reason, FinishReason::Completed);
    assert_eq!(second.learner.train_steps, 2);
    assert_eq!(second.final_train_step, 4);
    assert_eq!(second.final_version, 4);
}

#[test]
fn test_invalid_config_rejected_before_spawn() {
    assert!(DistributedTrainer::<TB>::new(DhoConfig::new().with_actor_count(0)).is_err());
    assert!(DistributedTrainer::<TB>::new(DhoConfig::new().with_truncation(0.5, 1.0)).is_err());
}
