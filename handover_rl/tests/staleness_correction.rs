//! An actor acting on a snapshot three versions behind the target.
//!
//! The V-trace targets for its trajectory must stay finite, respect the
//! truncation bounds, and differ from the on-policy n-step targets by no more
//! than the discounted sum of TD errors.

use std::sync::Arc;

use burn::backend::NdArray;
use burn::tensor::Tensor;

use handover_rl::env::{CapacityConfig, EnvConfig};
use handover_rl::{
    compute_vtrace, policy_store, training_metrics, Actor, ActorConfig, HandoverNetConfig,
    Trajectory, VTraceParams,
};

type B = NdArray<f32>;

const J: usize = 3;
const K: usize = 3;
const EPISODE: u64 = 50;

fn host(tensor: Tensor<B, 1>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().unwrap()
}

#[test]
fn test_stale_behavior_targets_are_bounded() {
    let device = Default::default();
    let net_config = HandoverNetConfig::new(J, K, 16);
    let store = policy_store(net_config.init::<B>(&device).to_snapshot(0, 0).unwrap());

    // No RB capacity: nobody connects, so the episode runs the whole window.
    let capacity = CapacityConfig::Fixed {
        per_target: vec![0; K - 1],
    };
    let env_config = EnvConfig::default()
        .with_n_ues(J)
        .with_n_targets(K)
        .with_episode_length(EPISODE);
    let actor_config = ActorConfig::for_actor(0)
        .with_n_envs(1)
        .with_rollout_horizon(EPISODE as usize)
        .with_refresh_interval(1_000)
        .with_max_staleness(8)
        .with_seed(21);
    let (tx, _rx) = crossbeam_channel::bounded(4);
    let mut actor = Actor::<B>::new(
        actor_config,
        env_config,
        &capacity,
        net_config,
        Arc::clone(&store),
        tx,
        training_metrics(),
        device,
    )
    .unwrap();

    let mut closed: Vec<Trajectory> = actor.collect_slot().unwrap();

    // The learner moves three versions ahead while the actor keeps v0.
    for step in 1..=3u64 {
        let next = net_config.init::<B>(&device).to_snapshot(0, step).unwrap();
        store.publish(next);
    }
    assert_eq!(store.version(), 3);

    for _ in 1..EPISODE {
        closed.extend(actor.collect_slot().unwrap());
    }
    assert_eq!(actor.local_version(), 0);
    assert_eq!(actor.stats().max_observed_lag, 3);

    assert_eq!(closed.len(), 1);
    let traj = &closed[0];
    assert_eq!(traj.len(), EPISODE as usize);
    assert!(traj.is_terminal());
    assert!(traj.iter().all(|s| s.behavior_version == 0));

    // Target policy and values come from the newest snapshot.
    let target = net_config
        .init::<B>(&device)
        .load_snapshot(&store.get_target(), &device)
        .unwrap();
    let mut features = Vec::new();
    for step in traj.iter() {
        step.state.write_features(EPISODE, &mut features);
    }
    let obs = Tensor::<B, 1>::from_floats(features.as_slice(), &device)
        .reshape([traj.len(), features.len() / traj.len()]);
    let choices: Vec<i64> = traj
        .iter()
        .flat_map(|s| s.choices())
        .map(|c| c as i64)
        .collect();
    let (policy, values) = target.forward(obs);
    let target_log_probs = host(policy.log_prob(&choices, &device));
    let values = host(values);

    let params = VTraceParams::default();
    let rewards = traj.rewards();
    let dones = traj.dones();
    let behavior_log_probs = traj.behavior_log_probs();

    let corrected = compute_vtrace(
        &behavior_log_probs,
        &target_log_probs,
        &rewards,
        &values,
        &dones,
        0.0,
        &params,
    );
    let on_policy = compute_vtrace(
        &target_log_probs,
        &target_log_probs,
        &rewards,
        &values,
        &dones,
        0.0,
        &params,
    );

    assert!(corrected.is_finite());
    assert!(on_policy.is_finite());
    assert!(corrected.rhos.iter().all(|&r| r >= 0.0 && r <= params.rho_bar));
    assert!(corrected.cs.iter().all(|&c| c >= 0.0 && c <= params.c_bar));

    // With rho_bar = c_bar = 1 every trace product lies in [0, 1], so the gap
    // at t is at most sum_{s>=t} gamma^(s-t) |delta_s|.
    let n = traj.len();
    let deltas: Vec<f32> = (0..n)
        .map(|t| {
            let next = if t + 1 < n { values[t + 1] } else { 0.0 };
            let not_done = if dones[t] { 0.0 } else { 1.0 };
            rewards[t] + params.gamma * next * not_done - values[t]
        })
        .collect();
    let mut bound = 0.0f32;
    for t in (0..n).rev() {
        bound = deltas[t].abs() + params.gamma * bound;
        let gap = (corrected.vs[t] - on_policy.vs[t]).abs();
        assert!(
            gap <= bound + 1e-3,
            "gap {} at t={} exceeds bound {}",
            gap,
            t,
            bound
        );
    }
}
