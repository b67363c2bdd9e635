//! Train, checkpoint, then serve decisions from the checkpoint.

use std::time::Duration;

use burn::backend::{Autodiff, NdArray};

use handover_rl::checkpoint::{Checkpointer, CheckpointerConfig};
use handover_rl::env::SlotInput;
use handover_rl::{
    policy_store, CSVLogger, DecisionMode, DecisionService, DecisionServiceConfig, DhoConfig,
    DistributedTrainer, FinishReason, MultiLogger, NetworkPolicy,
};

type TB = Autodiff<NdArray<f32>>;

fn config(dir: &std::path::Path) -> DhoConfig {
    DhoConfig::new()
        .with_n_ues(3)
        .with_n_targets(3)
        .with_episode_length(12)
        .with_hidden_size(16)
        .with_actor_count(2)
        .with_envs_per_actor(2)
        .with_rollout_horizon(6)
        .with_batch_size(3)
        .with_batch_timeout_ms(100)
        .with_max_train_steps(4)
        .with_checkpoint_dir(dir.join("checkpoints"))
        .with_checkpoint_interval(2)
        .with_seed(3)
}

#[test]
fn test_train_checkpoint_and_serve() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let csv_path = dir.path().join("metrics.csv");

    let mut logger = MultiLogger::new().add(CSVLogger::new(&csv_path).unwrap());
    let trainer = DistributedTrainer::<TB>::new(config.clone())
        .unwrap()
        .with_log_interval(Duration::from_millis(10));
    let report = trainer.run(&mut logger).unwrap();
    drop(logger);

    assert_eq!(report.reason, FinishReason::Completed);
    assert_eq!(report.final_train_step, 4);
    assert_eq!(report.learner.discarded_batches, 0);
    assert!(report.learner.trajectories_consumed >= 4);
    assert!(report.learner.mean_rho > 0.0 && report.learner.mean_rho <= 1.0);
    assert!(report.metrics.mean_delay >= 0.0 && report.metrics.mean_delay <= 1.0);

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("step,env_steps"));
    assert!(lines.count() >= 1);

    let checkpointer =
        Checkpointer::new(CheckpointerConfig::new(dir.path().join("checkpoints"))).unwrap();
    let steps: Vec<u64> = checkpointer
        .list_checkpoints()
        .unwrap()
        .iter()
        .map(|c| c.step)
        .collect();
    assert_eq!(steps, vec![2, 4]);

    let latest = checkpointer.load_latest().unwrap();
    assert_eq!(latest.snapshot.train_step, 4);
    assert_eq!(latest.snapshot.version, report.final_version);

    let store = policy_store(latest.snapshot);
    let policy =
        NetworkPolicy::<NdArray<f32>>::from_config(&config, store, DecisionMode::Greedy, Default::default());
    let service_config =
        DecisionServiceConfig::from_config(&config).with_latency_budget(Duration::from_millis(500));
    let mut service = DecisionService::new(policy, service_config).unwrap();

    let input = SlotInput {
        time_index: 0,
        available_targets: [(1, 2), (2, 2)].into_iter().collect(),
        ue_access_snapshot: (0..3).map(|ue| (ue, false)).collect(),
    };
    let record = service.decide(&input).unwrap();

    assert!(!record.fallback);
    assert_eq!(record.decisions.len(), 3);
    assert_eq!(record.policy_version, Some(report.final_version));
    assert_eq!(service.history().len(), 1);
}
