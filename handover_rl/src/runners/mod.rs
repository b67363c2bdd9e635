//! Training runners.
//!
//! - [`DistributedTrainer`]: N actor threads + 1 learner thread with V-trace
//!   correction, a monitoring loop and cooperative stop
//!
//! ```rust,ignore
//! use burn::backend::{Autodiff, NdArray};
//!
//! let trainer = DistributedTrainer::<Autodiff<NdArray<f32>>>::new(config)?;
//! let stop = trainer.stop_handle();
//! let report = trainer.run(&mut ConsoleLogger::new(10))?;
//! ```

pub mod trainer;

#[cfg(test)]
mod tests;

pub use trainer::{DistributedTrainer, StopHandle, TrainingReport};
