//! Mapping from sweep indices to writes into growable arrays.
//!
//! A dataset created `depth` sweep levels deep has the swept axes as its outer
//! dimensions. Every measurement cycle writes one block at the current index
//! tuple. Rank-0 data below a sweep is appended point by point, and once the
//! innermost sweep reaches the last index of its axis the row is closed with
//! [`Storage::next_matrix`]. The rollover is keyed off the axis length, not off
//! how many points a filter let through.

use ndarray::ArrayViewD;

use super::{ArrayHandle, Row, Storage, MAX_STORAGE_RANK};
use crate::error::{SweepError, SweepResult};

/// Where in the sweep tree a measurement currently runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPosition {
    indices: Vec<usize>,
    lengths: Vec<usize>,
}

impl SweepPosition {
    /// Position of top-level measurements (no sweep entered).
    pub fn root() -> Self {
        Self::default()
    }

    /// Position one level deeper, at `index` of an axis with `len` values.
    pub fn descend(&self, index: usize, len: usize) -> Self {
        let mut next = self.clone();
        next.indices.push(index);
        next.lengths.push(len);
        next
    }

    /// Number of enclosing sweeps.
    pub fn depth(&self) -> usize {
        self.indices.len()
    }

    /// Original (unfiltered) index per enclosing sweep, outermost first.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Axis length per enclosing sweep.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// True when the innermost of at least two sweeps sits on its last axis value.
    pub fn closes_row(&self) -> bool {
        self.depth() >= 2
            && matches!(
                (self.indices.last(), self.lengths.last()),
                (Some(index), Some(len)) if index + 1 == *len
            )
    }
}

/// The concrete write for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    /// Index prefix of the block.
    pub position: Vec<usize>,
    /// Single point into a higher-rank array.
    pub pointwise: bool,
    /// Issue `next_matrix` after the write.
    pub rollover: bool,
}

/// Plan the write of a block of rank `data_rank` for dataset `name`.
pub fn plan_write(name: &str, position: &SweepPosition, data_rank: usize) -> SweepResult<WriteOp> {
    let rank = position.depth() + data_rank;
    if rank > MAX_STORAGE_RANK {
        return Err(SweepError::UnsupportedRank {
            name: name.to_string(),
            depth: position.depth(),
            rank,
        });
    }
    Ok(WriteOp {
        position: position.indices().to_vec(),
        pointwise: data_rank == 0 && position.depth() > 0,
        rollover: position.closes_row(),
    })
}

/// Write `data` for `handle` at `position`, closing the row when the inner axis is exhausted.
pub fn write_block(
    storage: &mut dyn Storage,
    handle: &ArrayHandle,
    position: &SweepPosition,
    data: ArrayViewD<'_, f64>,
) -> SweepResult<()> {
    let op = plan_write(handle.name(), position, data.ndim())?;
    storage.append(
        handle,
        Row {
            position: &op.position,
            data: data.reborrow(),
            pointwise: op.pointwise,
        },
    )?;
    if op.rollover {
        tracing::trace!(dataset = handle.name(), position = ?op.position, "row complete");
        storage.next_matrix(handle)?;
    }
    Ok(())
}
