//! Categorical downsampling by block union
//!
//! One step takes a category grid and its table to the next coarser level.
//! Each 2x2x2 block (clipped at odd upper boundaries) contributes the union of
//! its cells' segment sets, so a segment present anywhere in the fine block
//! stays discoverable in the coarse cell. Precision is lost in *where*, never
//! in *whether present*; a majority vote would lose minority labels.

use crate::error::{Result, SegvolError};
use crate::table::{CategorySetTable, SegmentSet};
use ndarray::{s, Array3};

/// One resolution rung of a segmentation lattice
#[derive(Debug, Clone)]
pub struct SegmentationLevel {
    /// Resolution ratio (1 = native)
    pub ratio: u32,
    /// Category grid; every value is a key of `table`
    pub grid: Array3<u32>,
    /// Level-local category table; ids are not comparable across levels
    pub table: CategorySetTable,
}

impl SegmentationLevel {
    /// Native level from a raw-value grid and its value→segment map
    pub fn native(grid: Array3<u32>, table: CategorySetTable) -> Self {
        Self {
            ratio: 1,
            grid,
            table,
        }
    }

    /// Build the next coarser level (ratio doubled, fresh table).
    ///
    /// Reads only this level's table; feeding a stale table from another
    /// level would silently corrupt the unions.
    pub fn downsampled(&self) -> Result<SegmentationLevel> {
        let (grid, table) = downsample_step(&self.grid, &self.table)?;
        Ok(SegmentationLevel {
            ratio: self.ratio * 2,
            grid,
            table,
        })
    }
}

/// One block-union downsampling step.
///
/// Output shape is `ceil(dim / 2)` per axis. Block origins advance at stride
/// 2; trailing blocks at odd boundaries are clipped, so a block holds 1 to 8
/// contributing cells.
pub fn downsample_step(
    grid: &Array3<u32>,
    table: &CategorySetTable,
) -> Result<(Array3<u32>, CategorySetTable)> {
    let (sx, sy, sz) = grid.dim();
    if sx == 0 || sy == 0 || sz == 0 {
        return Err(SegvolError::InvalidDimensions(
            "cannot downsample an empty grid".to_string(),
        ));
    }
    let out_dim = (sx.div_ceil(2), sy.div_ceil(2), sz.div_ceil(2));
    let mut assigned: Array3<Option<u32>> = Array3::from_elem(out_dim, None);
    let mut out_table = CategorySetTable::new();

    for bx in (0..sx).step_by(2) {
        for by in (0..sy).step_by(2) {
            for bz in (0..sz).step_by(2) {
                let block = grid.slice(s![
                    bx..(bx + 2).min(sx),
                    by..(by + 2).min(sy),
                    bz..(bz + 2).min(sz)
                ]);
                let values: Vec<u32> = block.iter().copied().collect();
                let sets = table.categories_for(&values)?;
                let union: SegmentSet = sets.iter().flat_map(|s| s.iter().copied()).collect();
                let id = out_table.resolve(&union);
                assigned[[bx / 2, by / 2, bz / 2]] = Some(id);
            }
        }
    }

    // Every output cell must have been written before this grid may persist.
    let mut out = Array3::zeros(out_dim);
    for (idx, value) in assigned.indexed_iter() {
        match value {
            Some(id) => out[idx] = *id,
            None => {
                return Err(SegvolError::GridIntegrity(format!(
                    "cell {:?} was never assigned a category id",
                    idx
                )))
            }
        }
    }
    Ok((out, out_table))
}
