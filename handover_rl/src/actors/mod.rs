//! Rollout actors.
//!
//! - `Actor`: runs vectorised simulators under a local behavior snapshot
//! - `ActorPool`: one named thread per actor

pub mod actor;
pub mod actor_pool;

pub use actor::{Actor, ActorConfig};
pub use actor_pool::{ActorHandle, ActorPool};

pub use crate::messages::{ActorMsg, ActorStats};
