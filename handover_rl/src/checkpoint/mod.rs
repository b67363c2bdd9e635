//! Snapshot checkpointing.
//!
//! - Saves at a fixed learner-step cadence
//! - Tracks the best snapshot by mean episode return
//! - Keeps only the last N checkpoints
//! - Loads the latest checkpoint to resume
//!
//! ```rust,ignore
//! let mut checkpointer = Checkpointer::new(
//!     CheckpointerConfig::new("./checkpoints").with_save_interval(100),
//! )?;
//!
//! if checkpointer.should_save(step) {
//!     checkpointer.save(&snapshot, Some(avg_return))?;
//! }
//!
//! let resumed = checkpointer.load_latest()?.snapshot;
//! ```

pub mod checkpointer;

pub use checkpointer::{
    CheckpointError, CheckpointInfo, CheckpointRecord, Checkpointer, CheckpointerConfig,
};
