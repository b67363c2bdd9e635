//! Training metrics and logging.
//!
//! - [`TrainingMetrics`]: counters shared by actors and the learner
//! - [`ConsoleLogger`]: periodic `log::info!` summaries
//! - [`CSVLogger`]: one row per snapshot for offline analysis
//! - [`MultiLogger`]: fan-out to several loggers

pub mod logger;
pub mod training_metrics;

pub use logger::{CSVLogger, ConsoleLogger, MetricsLogger, MultiLogger, TrainingSnapshot};
pub use training_metrics::{training_metrics, SharedTrainingMetrics, TrainingMetrics, RECENT_RETURNS};
