//! Environment error taxonomy.

use thiserror::Error;

/// Errors raised by the encoder and simulator.
///
/// Both shape errors are fatal for the offending call. A malformed action
/// is never coerced into a valid one, since that would hide a policy bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("invalid state shape for {field}: expected {expected}, found {found}")]
    InvalidStateShape {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid action for ue {ue}: {reason}")]
    InvalidAction { ue: usize, reason: String },

    #[error("invalid environment config: {0}")]
    InvalidConfig(String),
}
