//! Training loggers.
//!
//! Console output goes through the `log` facade so the binary's subscriber
//! decides formatting and filtering.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Point-in-time training progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSnapshot {
    /// Learner updates applied.
    pub step: u64,
    /// Slots simulated across all actors.
    pub env_steps: u64,
    pub episodes: u64,
    /// Mean return of recent episodes.
    pub avg_return: f32,
    /// Mean per-slot access delay `D`.
    pub mean_delay: f32,
    /// Mean per-slot collision `C`.
    pub mean_collision: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub policy_version: u64,
    pub discarded_batches: u64,
    pub forced_refreshes: u64,
}

pub trait MetricsLogger: Send {
    fn log(&mut self, snapshot: &TrainingSnapshot);

    fn flush(&mut self);
}

/// Logs a one-line summary at `info` every `log_interval` learner steps.
pub struct ConsoleLogger {
    log_interval: u64,
    last_log_step: Option<u64>,
    start_time: Instant,
}

impl ConsoleLogger {
    pub fn new(log_interval: u64) -> Self {
        Self {
            log_interval: log_interval.max(1),
            last_log_step: None,
            start_time: Instant::now(),
        }
    }

    fn due(&self, step: u64) -> bool {
        match self.last_log_step {
            None => true,
            Some(last) => step >= last + self.log_interval,
        }
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        if !self.due(snapshot.step) {
            return;
        }

        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sps = if elapsed > 0.0 {
            snapshot.env_steps as f32 / elapsed
        } else {
            0.0
        };

        log::info!(
            "step {:>6} | slots {:>9} | eps {:>6} | return {:>8.3} | D {:.3} C {:.3} | pi {:>8.4} v {:>8.4} H {:>6.3} | v{} | {:.0} slots/s",
            snapshot.step,
            snapshot.env_steps,
            snapshot.episodes,
            snapshot.avg_return,
            snapshot.mean_delay,
            snapshot.mean_collision,
            snapshot.policy_loss,
            snapshot.value_loss,
            snapshot.entropy,
            snapshot.policy_version,
            sps
        );

        self.last_log_step = Some(snapshot.step);
    }

    fn flush(&mut self) {}
}

/// CSV file logger for analysis.
pub struct CSVLogger {
    writer: BufWriter<File>,
    start_time: Instant,
    last_step: Option<u64>,
}

impl CSVLogger {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "step,env_steps,episodes,avg_return,mean_delay,mean_collision,policy_loss,value_loss,entropy,policy_version,discarded_batches,forced_refreshes,elapsed_secs"
        )?;

        Ok(Self {
            writer,
            start_time: Instant::now(),
            last_step: None,
        })
    }
}

impl MetricsLogger for CSVLogger {
    /// At most one row per training step.
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        if self.last_step.is_some_and(|last| snapshot.step <= last) {
            return;
        }
        self.last_step = Some(snapshot.step);
        let elapsed = self.start_time.elapsed().as_secs_f32();
        if let Err(e) = writeln!(
            self.writer,
            "{},{},{},{:.4},{:.4},{:.4},{:.6},{:.6},{:.6},{},{},{},{:.2}",
            snapshot.step,
            snapshot.env_steps,
            snapshot.episodes,
            snapshot.avg_return,
            snapshot.mean_delay,
            snapshot.mean_collision,
            snapshot.policy_loss,
            snapshot.value_loss,
            snapshot.entropy,
            snapshot.policy_version,
            snapshot.discarded_batches,
            snapshot.forced_refreshes,
            elapsed
        ) {
            log::warn!("csv metrics write failed: {}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("csv metrics flush failed: {}", e);
        }
    }
}

impl Drop for CSVLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Fans a snapshot out to several loggers.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        for logger in &mut self.loggers {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}
