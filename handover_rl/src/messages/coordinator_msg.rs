//! Thread completion reasons.

/// Why a worker thread or the whole run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Stop was requested.
    Stopped,

    /// The learner reached its update limit.
    Completed,

    /// Every actor went away before the limit was reached.
    ActorsExhausted,

    /// Thread panicked.
    Panicked(String),
}

impl FinishReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, FinishReason::Stopped | FinishReason::Completed)
    }
}
