//! Learner behaviour: batching, divergence handling, disconnects, publishing.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use crossbeam_channel::Sender;

use leo_access_env::{JointAction, State};

use super::learner::{create_optimizer, Learner, LearnerConfig};
use crate::algorithms::policy::{HandoverNet, HandoverNetConfig};
use crate::checkpoint::{Checkpointer, CheckpointerConfig};
use crate::core::policy_store::{policy_store, SharedPolicyStore};
use crate::core::trajectory::{Experience, Trajectory};
use crate::error::HandoverError;
use crate::messages::{ActorMsg, FinishReason};
use crate::metrics::training_metrics;

type TB = Autodiff<NdArray<f32>>;

const J: usize = 2;
const K: usize = 3;

fn config() -> LearnerConfig {
    LearnerConfig::default()
        .with_batch_size(4)
        .with_batch_timeout(Duration::from_millis(50))
}

fn trajectory(actor_id: usize, len: usize, reward: f32, terminal: bool) -> Trajectory {
    let mut traj = Trajectory::new(actor_id, 0);
    let action = JointAction::from_choices(&[1, 0], K).unwrap();
    let mut state = State::initial(J, K);
    for t in 0..len {
        let mut next_state = state.clone();
        next_state.slot = state.slot + 1;
        next_state.prev_action = action.clone();
        traj.push(Experience {
            state: state.clone(),
            action: action.clone(),
            reward,
            next_state: next_state.clone(),
            done: terminal && t + 1 == len,
            behavior_log_prob: -2.0,
            behavior_version: 0,
        });
        state = next_state;
    }
    traj
}

fn learner(
    config: LearnerConfig,
    checkpointer: Option<Checkpointer>,
) -> (
    Learner<TB, impl Optimizer<HandoverNet<TB>, TB>>,
    Sender<ActorMsg>,
    SharedPolicyStore,
) {
    let device = Default::default();
    let model = HandoverNetConfig::new(J, K, 16).init::<TB>(&device);
    let store = policy_store(model.valid().to_snapshot(0, 0).unwrap());
    let (tx, rx) = crossbeam_channel::bounded(32);
    let learner = Learner::new(
        config,
        model,
        create_optimizer::<TB>(Some(40.0)),
        rx,
        Arc::clone(&store),
        training_metrics(),
        checkpointer,
        device,
    );
    (learner, tx, store)
}

#[test]
fn test_update_publishes_new_version() {
    let (mut learner, _tx, store) = learner(config(), None);

    let batch = vec![trajectory(0, 5, -1.0, false), trajectory(1, 3, -0.5, true)];
    let report = learner.train_on_batch(&batch).unwrap();

    assert_eq!(report.train_step, 1);
    assert_eq!(report.n_trajectories, 2);
    assert_eq!(report.n_steps, 8);
    assert_eq!(report.published, Some(1));
    assert!(report.loss.is_finite());
    assert!(report.mean_rho > 0.0 && report.mean_rho <= 1.0);

    assert_eq!(store.version(), 1);
    assert_eq!(store.get_behavior().train_step, 1);
    assert_eq!(learner.stats().train_steps, 1);
}

#[test]
fn test_publish_interval_sets_target_only() {
    let (mut learner, _tx, store) = learner(config().with_publish_interval(2), None);

    let report = learner.train_on_batch(&[trajectory(0, 4, -1.0, false)]).unwrap();
    assert_eq!(report.published, None);
    assert_eq!(store.version(), 0);
    assert_eq!(store.get_target().train_step, 1);
    assert_eq!(store.get_behavior().train_step, 0);

    let report = learner.train_on_batch(&[trajectory(0, 4, -1.0, false)]).unwrap();
    assert_eq!(report.published, Some(1));
    assert_eq!(store.get_behavior().train_step, 2);
}

#[test]
fn test_non_finite_loss_discards_batch() {
    let (mut learner, _tx, store) = learner(config(), None);
    let before = store.get_target();

    let batch = vec![trajectory(0, 4, f32::NAN, false)];
    match learner.train_on_batch(&batch) {
        Err(HandoverError::TrainingDivergence { train_step, .. }) => assert_eq!(train_step, 1),
        other => panic!("expected divergence, got {:?}", other.map(|r| r.train_step)),
    }

    assert_eq!(learner.train_step(), 0);
    assert_eq!(store.version(), 0);
    assert_eq!(*store.get_target(), *before);

    // the next good batch still trains
    let report = learner.train_on_batch(&[trajectory(0, 4, -1.0, false)]).unwrap();
    assert_eq!(report.train_step, 1);
}

#[test]
fn test_drain_returns_partial_batch_after_timeout() {
    let (mut learner, tx, _store) = learner(config(), None);
    tx.send(ActorMsg::Trajectory(trajectory(0, 2, -1.0, false))).unwrap();
    tx.send(ActorMsg::Trajectory(trajectory(1, 2, -1.0, false))).unwrap();

    let batch = learner.drain_batch();
    assert_eq!(batch.len(), 2);
    assert!(!learner.is_channel_closed());
}

#[test]
fn test_drain_stops_at_batch_size() {
    let (mut learner, tx, _store) = learner(config(), None);
    for i in 0..6 {
        tx.send(ActorMsg::Trajectory(trajectory(i, 2, -1.0, false))).unwrap();
    }
    assert_eq!(learner.drain_batch().len(), 4);
    assert_eq!(learner.drain_batch().len(), 2);
}

#[test]
fn test_disconnect_drops_pending_trajectories() {
    let (mut learner, tx, _store) = learner(config(), None);
    tx.send(ActorMsg::Trajectory(trajectory(0, 2, -1.0, false))).unwrap();
    tx.send(ActorMsg::Trajectory(trajectory(1, 2, -1.0, false))).unwrap();
    tx.send(ActorMsg::Disconnected {
        actor_id: 1,
        reason: "gone".into(),
    })
    .unwrap();
    tx.send(ActorMsg::Trajectory(trajectory(1, 2, -1.0, false))).unwrap();

    let batch = learner.drain_batch();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].actor_id, 0);
    assert_eq!(learner.stats().disconnected_actors, vec![1]);
    assert_eq!(learner.stats().dropped_trajectories, 2);
}

#[test]
fn test_closed_channel_ends_run() {
    let (learner, tx, _store) = learner(config(), None);
    tx.send(ActorMsg::Trajectory(trajectory(0, 3, -1.0, false))).unwrap();
    drop(tx);

    let stop = AtomicBool::new(false);
    let outcome = learner.run(&stop);
    assert_eq!(outcome.reason, FinishReason::ActorsExhausted);
    assert_eq!(outcome.stats.train_steps, 1);
}

#[test]
fn test_run_stops_at_max_steps() {
    let (learner, tx, store) = learner(config().with_max_train_steps(3), None);
    let feeder = std::thread::spawn(move || {
        for i in 0..40 {
            if tx
                .send_timeout(
                    ActorMsg::Trajectory(trajectory(i % 2, 3, -1.0, false)),
                    Duration::from_secs(1),
                )
                .is_err()
            {
                break;
            }
        }
    });

    let stop = AtomicBool::new(false);
    let outcome = learner.run(&stop);
    assert_eq!(outcome.reason, FinishReason::Completed);
    assert_eq!(outcome.stats.train_steps, 3);
    assert_eq!(store.version(), 3);
    feeder.join().unwrap();
}

#[test]
fn test_stop_flag_checked_before_update() {
    let (learner, tx, store) = learner(config(), None);
    tx.send(ActorMsg::Trajectory(trajectory(0, 3, -1.0, false))).unwrap();

    let stop = AtomicBool::new(true);
    let outcome = learner.run(&stop);
    assert_eq!(outcome.reason, FinishReason::Stopped);
    assert_eq!(outcome.stats.train_steps, 0);
    assert_eq!(store.version(), 0);
}

#[test]
fn test_checkpoints_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(
        CheckpointerConfig::new(dir.path()).with_save_interval(2),
    )
    .unwrap();
    let (mut learner, _tx, _store) = learner(config(), Some(checkpointer));

    for _ in 0..4 {
        learner.train_on_batch(&[trajectory(0, 3, -1.0, false)]).unwrap();
    }

    let reader = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
    let steps: Vec<u64> = reader
        .list_checkpoints()
        .unwrap()
        .iter()
        .map(|c| c.step)
        .collect();
    assert_eq!(steps, vec![2, 4]);
    assert_eq!(reader.load_latest().unwrap().snapshot.train_step, 4);
}

#[test]
fn test_value_loss_decreases_on_fixed_batch() {
    let mut cfg = config();
    cfg.learning_rate = 1e-2;
    let (mut learner, _tx, _store) = learner(cfg, None);
    let batch = vec![trajectory(0, 4, -1.0, true), trajectory(1, 4, -1.0, true)];

    let first = learner.train_on_batch(&batch).unwrap().loss.value_loss;
    let mut last = first;
    for _ in 0..40 {
        last = learner.train_on_batch(&batch).unwrap().loss.value_loss;
    }
    assert!(last < first, "value loss {} -> {}", first, last);
}

#[test]
fn test_checkpoints_carry_published_version() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(
        CheckpointerConfig::new(dir.path())
            .with_save_interval(1)
            .with_keep_last_n(0),
    )
    .unwrap();
    let (mut learner, _tx, store) = learner(config(), Some(checkpointer));
    let reader = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();

    for step in 1..=3u64 {
        learner.train_on_batch(&[trajectory(0, 3, -1.0, false)]).unwrap();
        let saved = reader.load_latest().unwrap().snapshot;
        assert_eq!(saved.train_step, step);
        assert_eq!(saved.version, store.version());
        assert_eq!(saved, *store.get_behavior());
    }
}

#[test]
fn test_unpublished_checkpoint_keeps_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(
        CheckpointerConfig::new(dir.path()).with_save_interval(1),
    )
    .unwrap();
    let (mut learner, _tx, store) =
        learner(config().with_publish_interval(2), Some(checkpointer));
    let reader = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();

    learner.train_on_batch(&[trajectory(0, 3, -1.0, false)]).unwrap();
    let saved = reader.load_latest().unwrap().snapshot;
    assert_eq!((saved.train_step, saved.version), (1, 0));

    learner.train_on_batch(&[trajectory(0, 3, -1.0, false)]).unwrap();
    let saved = reader.load_latest().unwrap().snapshot;
    assert_eq!((saved.train_step, saved.version), (2, 1));
    assert_eq!(store.version(), 1);
}
