//! Recent removal history fed to the removal decoder.

use crate::error::{ensure_dim, Error, Result};
use ndarray::{s, Array3};

/// Number of remembered removals per instance.
pub const HISTORY_DEPTH: usize = 4;

/// One-hot rows of the last [`HISTORY_DEPTH`] removed pairs, row 0 being the
/// most recent; shape `(batch, HISTORY_DEPTH, pairs)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionHistory {
    table: Array3<f64>,
}

impl SelectionHistory {
    pub fn new(batch: usize, pairs: usize) -> Self {
        SelectionHistory {
            table: Array3::zeros((batch, HISTORY_DEPTH, pairs)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.table.dim().0
    }

    pub fn pairs(&self) -> usize {
        self.table.dim().2
    }

    pub fn table(&self) -> &Array3<f64> {
        &self.table
    }

    /// Shift every instance's rows down by one and record the new removals on top.
    pub fn push(&mut self, removed: &[usize]) -> Result<()> {
        let removed: Vec<Option<usize>> = removed.iter().copied().map(Some).collect();
        self.record(&removed)
    }

    /// Like [`SelectionHistory::push`], but instances with `None` keep their rows.
    pub fn record(&mut self, removed: &[Option<usize>]) -> Result<()> {
        ensure_dim("history batch", removed.len(), self.batch_size())?;
        let pairs = self.pairs();
        if let Some(bad) = removed.iter().flatten().find(|&&r| r >= pairs) {
            return Err(Error::shape_mismatch(format!(
                "removal index {bad} out of range for {pairs} pairs"
            )));
        }

        for (b, pair) in removed.iter().enumerate() {
            let Some(pair) = *pair else { continue };
            let older = self.table.slice(s![b, ..HISTORY_DEPTH - 1, ..]).to_owned();
            self.table.slice_mut(s![b, 1.., ..]).assign(&older);
            self.table.slice_mut(s![b, 0, ..]).fill(0.0);
            self.table[[b, 0, pair]] = 1.0;
        }
        Ok(())
    }
}
