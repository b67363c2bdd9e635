//! Learning components.
//!
//! - `vtrace`: off-policy correction for stale behavior policies
//! - `policy`: per-UE categorical policy and state-value networks
//! - `loss`: IMPALA policy/value/entropy loss

pub mod loss;
pub mod policy;
pub mod vtrace;

pub use loss::{impala_loss, LossComponents, LossWeights};
pub use policy::{
    GreedyChoice, HandoverNet, HandoverNetConfig, JointPolicyOutput, JointSample, PolicyNet,
    ValueNet,
};
pub use vtrace::{compute_vtrace, compute_vtrace_batch, VTraceInput, VTraceParams, VTraceResult};
