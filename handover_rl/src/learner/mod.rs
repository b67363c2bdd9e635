//! Learner: batched V-trace updates and snapshot publishing.

pub mod learner;

#[cfg(test)]
mod tests;

pub use learner::{create_optimizer, Learner, LearnerConfig, LearnerOutcome, UpdateReport};

pub use crate::messages::LearnerStats;
