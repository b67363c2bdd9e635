//! Core data plumbing: parameter snapshots, the policy store and trajectories.

pub mod policy_store;
pub mod snapshot;
pub mod trajectory;

pub use policy_store::{policy_store, PolicyStore, SharedPolicyStore};
pub use snapshot::ParameterSnapshot;
pub use trajectory::{Experience, Trajectory};
