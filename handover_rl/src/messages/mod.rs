//! Message types exchanged between actors, the learner and the trainer.
//!
//! ```text
//!    +---------+   ActorMsg    +---------+
//!    | Actor 0 | ------------> |         |
//!    +---------+  (bounded)    | Learner | --> PolicyStore
//!    | Actor N | ------------> |         |
//!    +---------+               +---------+
//!         |                         |
//!         +-- ActorStats            +-- LearnerStats
//! ```

mod actor_msg;
mod coordinator_msg;
mod learner_msg;

pub use actor_msg::{ActorMsg, ActorStats};
pub use coordinator_msg::FinishReason;
pub use learner_msg::LearnerStats;
