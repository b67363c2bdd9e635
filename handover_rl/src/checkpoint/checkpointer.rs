//! Snapshot checkpointing.
//!
//! Each checkpoint is a JSON document holding one [`ParameterSnapshot`] plus
//! the metric it was saved with. Files are named `checkpoint_{step:08}.json`
//! so lexical order is step order; the best snapshot by metric is mirrored to
//! `best.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::snapshot::ParameterSnapshot;

const PREFIX: &str = "checkpoint_";
const SUFFIX: &str = ".json";
const BEST: &str = "best.json";

#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    pub checkpoint_dir: PathBuf,
    /// Learner steps between saves.
    pub save_interval: u64,
    /// Recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
    /// Mirror the best snapshot by metric to `best.json`.
    pub save_best: bool,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./checkpoints"),
            save_interval: 100,
            keep_last_n: 5,
            save_best: true,
        }
    }
}

impl CheckpointerConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_save_interval(mut self, interval: u64) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }

    pub fn with_save_best(mut self, save_best: bool) -> Self {
        self.save_best = save_best;
        self
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(#[from] io::Error),

    #[error("checkpoint encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no checkpoints found")]
    NoCheckpoints,
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub snapshot: ParameterSnapshot,
    /// Mean episode return at save time, if known.
    pub metric: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub step: u64,
}

pub struct Checkpointer {
    config: CheckpointerConfig,
    best_metric: f32,
    history: Vec<CheckpointInfo>,
}

impl Checkpointer {
    /// Creates the checkpoint directory if needed.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;

        Ok(Self {
            config,
            best_metric: f32::NEG_INFINITY,
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    pub fn should_save(&self, step: u64) -> bool {
        self.config.save_interval > 0 && step > 0 && step % self.config.save_interval == 0
    }

    pub fn best_metric(&self) -> f32 {
        self.best_metric
    }

    fn path_for(&self, step: u64) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{}{:08}{}", PREFIX, step, SUFFIX))
    }

    fn write_atomic(path: &Path, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(record)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Save a snapshot keyed by its training step.
    pub fn save(
        &mut self,
        snapshot: &ParameterSnapshot,
        metric: Option<f32>,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(snapshot.train_step);
        let record = CheckpointRecord {
            snapshot: snapshot.clone(),
            metric,
        };
        Self::write_atomic(&path, &record)?;
        log::info!(
            "checkpoint v{} step {} -> {}",
            snapshot.version,
            snapshot.train_step,
            path.display()
        );

        if !self.history.iter().any(|c| c.path == path) {
            self.history.push(CheckpointInfo {
                path: path.clone(),
                step: snapshot.train_step,
            });
        }

        if self.config.save_best {
            if let Some(m) = metric.filter(|m| m.is_finite()) {
                if m > self.best_metric {
                    self.best_metric = m;
                    Self::write_atomic(&self.config.checkpoint_dir.join(BEST), &record)?;
                }
            }
        }

        self.cleanup_old_checkpoints();

        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<CheckpointRecord, CheckpointError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_best(&self) -> Result<CheckpointRecord, CheckpointError> {
        let path = self.config.checkpoint_dir.join(BEST);
        if !path.exists() {
            return Err(CheckpointError::NoCheckpoints);
        }
        self.load(&path)
    }

    /// Newest checkpoint on disk, for resume.
    pub fn load_latest(&self) -> Result<CheckpointRecord, CheckpointError> {
        let latest = self
            .list_checkpoints()?
            .pop()
            .ok_or(CheckpointError::NoCheckpoints)?;
        self.load(&latest.path)
    }

    /// Checkpoints in the directory, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut checkpoints: Vec<CheckpointInfo> = fs::read_dir(&self.config.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let step = path
                    .file_name()?
                    .to_str()?
                    .strip_prefix(PREFIX)?
                    .strip_suffix(SUFFIX)?
                    .parse()
                    .ok()?;
                Some(CheckpointInfo { path, step })
            })
            .collect();

        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    /// Drop all but the last `keep_last_n` checkpoints written by this instance.
    fn cleanup_old_checkpoints(&mut self) {
        if self.config.keep_last_n == 0 {
            return;
        }

        while self.history.len() > self.config.keep_last_n {
            let old = self.history.remove(0);
            if let Err(e) = fs::remove_file(&old.path) {
                log::warn!("failed to remove {}: {}", old.path.display(), e);
            }
        }
    }
}
