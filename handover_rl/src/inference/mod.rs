//! Live inference path.
//!
//! - [`DecisionService`]: one decision per slot within a latency budget, with
//!   an all "no request" fallback
//! - [`NetworkPolicy`]: the trained policy network, hot-reloaded from the
//!   policy store

pub mod decision;

pub use decision::{
    DecisionMetrics, DecisionMode, DecisionPolicy, DecisionRecord, DecisionService,
    DecisionServiceConfig, NetworkPolicy, PolicyDecision, HISTORY_CAPACITY,
};
