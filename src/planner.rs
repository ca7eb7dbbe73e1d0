//! Request-time planning: pick the coarsest acceptable resolution and its
//! grid-index box for a physical-space query under a point budget
//!
//! Resolutions are walked in ascending ratio order (finest first). The first
//! level whose clamped box fits the budget wins; if none fits, the coarsest
//! overlapping level is returned anyway so a response is always bounded. Only
//! when no level overlaps at all does the planner report `NoOverlap`.

use crate::error::{Result, SegvolError};
use crate::metadata::EntryMetadata;
use crate::types::{GridSliceBox, PhysicalBox, SamplingBox};

/// Grid-index cover of `request` at one level, or `None` when the request
/// misses the grid entirely.
///
/// The lower corner rounds down and the upper corner rounds up, so the cover
/// never undershoots the request; both are then clamped into the grid.
fn cover_at_level(ratio: u32, sampling: &SamplingBox, request: &PhysicalBox) -> Option<GridSliceBox> {
    let lower = sampling.physical_to_grid_floor(request.min);
    let upper = sampling.physical_to_grid_ceil(request.max);
    let dims = sampling.grid_dimensions;
    for a in 0..3 {
        if upper[a] < 0 || lower[a] > dims[a] as i64 - 1 {
            return None;
        }
    }
    let bottom_left = [
        lower[0].max(0) as usize,
        lower[1].max(0) as usize,
        lower[2].max(0) as usize,
    ];
    let top_right = [
        (upper[0] as usize).min(dims[0] - 1),
        (upper[1] as usize).min(dims[1] - 1),
        (upper[2] as usize).min(dims[2] - 1),
    ];
    Some(GridSliceBox::new(ratio, bottom_left, top_right))
}

/// Decide the slice box for a query.
///
/// `max_points` of `None` means an unbounded budget: the finest overlapping
/// resolution wins. For a fixed request, a larger budget never selects a
/// coarser resolution than a smaller one.
pub fn decide_slice_box(
    max_points: Option<usize>,
    requested_box: Option<&PhysicalBox>,
    metadata: &EntryMetadata,
) -> Result<GridSliceBox> {
    if let Some(request) = requested_box {
        if !request.is_valid() {
            return Err(SegvolError::InvalidDimensions(format!(
                "degenerate physical request box {:?}",
                request
            )));
        }
    }

    let mut coarsest_overlap: Option<GridSliceBox> = None;
    for &ratio in &metadata.resolutions {
        let sampling = metadata.sampling_box(ratio)?;
        let candidate = match requested_box {
            None => {
                let dims = sampling.grid_dimensions;
                Some(GridSliceBox::new(
                    ratio,
                    [0, 0, 0],
                    [dims[0] - 1, dims[1] - 1, dims[2] - 1],
                ))
            }
            Some(request) => cover_at_level(ratio, sampling, request),
        };
        let Some(candidate) = candidate else {
            continue;
        };
        if max_points.map_or(true, |budget| candidate.voxel_count() < budget) {
            return Ok(candidate);
        }
        coarsest_overlap = Some(candidate);
    }

    // Budget exhausted on every level: degrade gracefully to the coarsest
    // overlapping box rather than refuse.
    coarsest_overlap.ok_or(SegvolError::NoOverlap)
}
