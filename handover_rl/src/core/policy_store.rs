//! Lock-free policy and value store.
//!
//! Holds two snapshots:
//!
//! - `behavior`: what actors and the decision service execute
//! - `target`: the learner's latest parameters, possibly not yet published
//!
//! Both live behind [`ArcSwap`], so readers never lock and never observe a
//! half-written snapshot. A reader that grabbed the previous `Arc` keeps a
//! valid snapshot for as long as it holds it. Only the learner writes.
//!
//! ```text
//! Learner ──set_target──► target
//!    └──────publish─────► target + behavior ──get_behavior──► Actors
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::snapshot::ParameterSnapshot;

pub struct PolicyStore {
    behavior: ArcSwap<ParameterSnapshot>,
    target: ArcSwap<ParameterSnapshot>,
    version: AtomicU64,
}

impl PolicyStore {
    /// Store with `initial` as both behavior and target.
    pub fn new(initial: ParameterSnapshot) -> Self {
        let version = initial.version;
        let initial = Arc::new(initial);
        Self {
            behavior: ArcSwap::new(Arc::clone(&initial)),
            target: ArcSwap::new(initial),
            version: AtomicU64::new(version),
        }
    }

    pub fn get_behavior(&self) -> Arc<ParameterSnapshot> {
        self.behavior.load_full()
    }

    pub fn get_target(&self) -> Arc<ParameterSnapshot> {
        self.target.load_full()
    }

    /// Version of the current behavior snapshot.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replace the target without exposing it to actors.
    pub fn set_target(&self, snapshot: ParameterSnapshot) {
        self.target.store(Arc::new(snapshot));
    }

    /// Stamp `snapshot` with the next version and make it both target and
    /// behavior. Returns the new version.
    pub fn publish(&self, mut snapshot: ParameterSnapshot) -> u64 {
        let version = self.version() + 1;
        snapshot.version = version;
        let snapshot = Arc::new(snapshot);
        self.target.store(Arc::clone(&snapshot));
        self.behavior.store(snapshot);
        self.version.store(version, Ordering::Release);
        version
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("version", &self.version())
            .field("target_step", &self.target.load().train_step)
            .finish()
    }
}

pub type SharedPolicyStore = Arc<PolicyStore>;

pub fn policy_store(initial: ParameterSnapshot) -> SharedPolicyStore {
    Arc::new(PolicyStore::new(initial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(step: u64, fill: u8) -> ParameterSnapshot {
        ParameterSnapshot::new(0, step, vec![fill; 8], vec![fill; 4])
    }

    #[test]
    fn test_initial_state() {
        let store = PolicyStore::new(snapshot(0, 1));
        assert_eq!(store.version(), 0);
        assert_eq!(store.get_behavior().policy, vec![1; 8]);
        assert_eq!(store.get_target().policy, vec![1; 8]);
    }

    #[test]
    fn test_set_target_hides_from_actors() {
        let store = PolicyStore::new(snapshot(0, 1));
        store.set_target(snapshot(5, 2));

        assert_eq!(store.get_target().train_step, 5);
        assert_eq!(store.get_behavior().train_step, 0);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_publish_swaps_both_and_bumps_version() {
        let store = PolicyStore::new(snapshot(0, 1));
        assert_eq!(store.publish(snapshot(1, 2)), 1);
        assert_eq!(store.publish(snapshot(2, 3)), 2);

        let behavior = store.get_behavior();
        assert_eq!(behavior.version, 2);
        assert_eq!(behavior.policy, vec![3; 8]);
        assert_eq!(store.get_target().version, 2);
    }

    #[test]
    fn test_held_snapshot_survives_publish() {
        let store = PolicyStore::new(snapshot(0, 1));
        let held = store.get_behavior();
        store.publish(snapshot(1, 9));

        assert_eq!(held.version, 0);
        assert_eq!(held.policy, vec![1; 8]);
        assert_eq!(store.get_behavior().policy, vec![9; 8]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let store = policy_store(snapshot(0, 0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let s = store.get_behavior();
                        let first = s.policy[0];
                        assert!(s.policy.iter().all(|&b| b == first));
                        assert!(s.value.iter().all(|&b| b == first));
                    }
                })
            })
            .collect();

        for i in 1..=200u8 {
            store.publish(snapshot(i as u64, i));
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.version(), 200);
    }
}
