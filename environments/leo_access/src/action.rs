//! Joint handover action.
//!
//! A [`JointAction`] is a dense `J x K` matrix of 0/1 cells. Row `j` is the
//! one-hot choice of UE `j`; column [`NO_REQUEST`] means the UE defers this
//! slot. Construction from policy output goes through [`JointAction::from_choices`],
//! which can only produce valid rows. Matrices arriving from outside (deserialised,
//! hand-built) are checked with [`JointAction::validate`] before the simulator
//! touches them.

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Column index reserved for "no handover request".
pub const NO_REQUEST: usize = 0;

/// `J x K` one-hot joint action, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JointAction {
    n_ues: usize,
    n_targets: usize,
    cells: Vec<u8>,
}

/// A non-zero request issued by one UE in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub ue: usize,
    pub target: usize,
}

impl JointAction {
    /// Every UE defers.
    pub fn no_request(n_ues: usize, n_targets: usize) -> Self {
        let mut cells = vec![0u8; n_ues * n_targets];
        for ue in 0..n_ues {
            cells[ue * n_targets + NO_REQUEST] = 1;
        }
        Self {
            n_ues,
            n_targets,
            cells,
        }
    }

    /// Build from one chosen column per UE.
    pub fn from_choices(choices: &[usize], n_targets: usize) -> Result<Self, EnvError> {
        let mut cells = vec![0u8; choices.len() * n_targets];
        for (ue, &choice) in choices.iter().enumerate() {
            if choice >= n_targets {
                return Err(EnvError::InvalidAction {
                    ue,
                    reason: format!("choice {} out of range 0..{}", choice, n_targets),
                });
            }
            cells[ue * n_targets + choice] = 1;
        }
        Ok(Self {
            n_ues: choices.len(),
            n_targets,
            cells,
        })
    }

    /// Build from explicit rows. Rows must share one length and be one-hot.
    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Self, EnvError> {
        let n_targets = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut cells = Vec::with_capacity(rows.len() * n_targets);
        for (ue, row) in rows.iter().enumerate() {
            if row.len() != n_targets {
                return Err(EnvError::InvalidAction {
                    ue,
                    reason: format!("row has {} cells, expected {}", row.len(), n_targets),
                });
            }
            cells.extend_from_slice(row);
        }
        let action = Self {
            n_ues: rows.len(),
            n_targets,
            cells,
        };
        action.validate()?;
        Ok(action)
    }

    /// Wrap raw row-major cells without checking them.
    ///
    /// Use for data that is validated later by the simulator.
    pub fn from_raw(n_ues: usize, n_targets: usize, cells: Vec<u8>) -> Self {
        Self {
            n_ues,
            n_targets,
            cells,
        }
    }

    /// Check the storage length and that every row sums to exactly one.
    pub fn validate(&self) -> Result<(), EnvError> {
        if self.cells.len() != self.n_ues * self.n_targets {
            return Err(EnvError::InvalidAction {
                ue: 0,
                reason: format!(
                    "matrix holds {} cells, expected {}x{}",
                    self.cells.len(),
                    self.n_ues,
                    self.n_targets
                ),
            });
        }
        for ue in 0..self.n_ues {
            let row = self.row(ue);
            if let Some(bad) = row.iter().find(|&&c| c > 1) {
                return Err(EnvError::InvalidAction {
                    ue,
                    reason: format!("cell value {} is not 0/1", bad),
                });
            }
            let sum: usize = row.iter().map(|&c| c as usize).sum();
            if sum != 1 {
                return Err(EnvError::InvalidAction {
                    ue,
                    reason: format!("row sums to {}, expected exactly 1", sum),
                });
            }
        }
        Ok(())
    }

    /// Check the action against the expected `J x K` shape, then validate it.
    pub fn validate_shape(&self, n_ues: usize, n_targets: usize) -> Result<(), EnvError> {
        if self.n_ues != n_ues || self.n_targets != n_targets {
            return Err(EnvError::InvalidAction {
                ue: 0,
                reason: format!(
                    "shape {}x{} does not match {}x{}",
                    self.n_ues, self.n_targets, n_ues, n_targets
                ),
            });
        }
        self.validate()
    }

    pub fn n_ues(&self) -> usize {
        self.n_ues
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn row(&self, ue: usize) -> &[u8] {
        &self.cells[ue * self.n_targets..(ue + 1) * self.n_targets]
    }

    pub fn cell(&self, ue: usize, target: usize) -> u8 {
        self.cells[ue * self.n_targets + target]
    }

    /// Column chosen by `ue`. Only meaningful on a validated action.
    pub fn choice(&self, ue: usize) -> usize {
        self.row(ue).iter().position(|&c| c == 1).unwrap_or(NO_REQUEST)
    }

    pub fn choices(&self) -> Vec<usize> {
        (0..self.n_ues).map(|ue| self.choice(ue)).collect()
    }

    /// Non-zero requests, in UE order.
    pub fn requests(&self) -> impl Iterator<Item = RequestRecord> + '_ {
        (0..self.n_ues).filter_map(move |ue| {
            let target = self.choice(ue);
            (target != NO_REQUEST).then_some(RequestRecord { ue, target })
        })
    }

    /// Row-major cells as policy features.
    pub fn features(&self) -> impl Iterator<Item = f32> + '_ {
        self.cells.iter().map(|&c| c as f32)
    }
}
