//! Numeric volume pyramid: separable binomial smoothing + stride-2 decimation
//!
//! Each step convolves the current level with the 5-tap binomial kernel
//! (1,4,6,4,1)/16 expanded separably over the three axes, with mirror
//! (reflect) boundary handling, then keeps every second sample per axis
//! starting at index 0. Output shape is `ceil(dim / 2)` per axis.
//!
//! The planner half of this module decides how many steps to build and which
//! levels are worth persisting under the configured size/level budget.

use crate::array::VolumeArray;
use crate::error::{Result, SegvolError};
use ndarray::{Array3, Axis};
use num_traits::clamp;
use serde::{Deserialize, Serialize};

/// Normalized binomial smoothing kernel
const KERNEL: [f64; 5] = [
    1.0 / 16.0,
    4.0 / 16.0,
    6.0 / 16.0,
    4.0 / 16.0,
    1.0 / 16.0,
];

/// Reflect an out-of-range index back into `[0, n)`, mirroring around the
/// edge samples. Constant inputs stay constant under this convention.
fn mirror(mut i: isize, n: isize) -> usize {
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

fn smooth_axis(src: &Array3<f64>, axis: Axis) -> Array3<f64> {
    let n = src.len_of(axis) as isize;
    let mut out = Array3::zeros(src.raw_dim());
    for (lane_in, mut lane_out) in src.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for i in 0..n {
            let mut acc = 0.0;
            for (tap, weight) in KERNEL.iter().enumerate() {
                acc += lane_in[mirror(i + tap as isize - 2, n)] * weight;
            }
            lane_out[i as usize] = acc;
        }
    }
    out
}

fn decimate(src: &Array3<f64>) -> Array3<f64> {
    let (sx, sy, sz) = src.dim();
    Array3::from_shape_fn((sx.div_ceil(2), sy.div_ceil(2), sz.div_ceil(2)), |(i, j, k)| {
        src[[i * 2, j * 2, k * 2]]
    })
}

fn to_f64(arr: &VolumeArray) -> Array3<f64> {
    match arr {
        VolumeArray::U8(a) => a.mapv(|v| v as f64),
        VolumeArray::U16(a) => a.mapv(|v| v as f64),
        VolumeArray::U32(a) => a.mapv(|v| v as f64),
        VolumeArray::F32(a) => a.mapv(|v| v as f64),
        VolumeArray::F64(a) => a.clone(),
    }
}

fn cast_back(template: &VolumeArray, values: Array3<f64>) -> VolumeArray {
    match template {
        VolumeArray::U8(_) => {
            VolumeArray::U8(values.mapv(|v| clamp(v.round(), 0.0, u8::MAX as f64) as u8))
        }
        VolumeArray::U16(_) => {
            VolumeArray::U16(values.mapv(|v| clamp(v.round(), 0.0, u16::MAX as f64) as u16))
        }
        VolumeArray::U32(_) => {
            VolumeArray::U32(values.mapv(|v| clamp(v.round(), 0.0, u32::MAX as f64) as u32))
        }
        VolumeArray::F32(_) => VolumeArray::F32(values.mapv(|v| v as f32)),
        VolumeArray::F64(_) => VolumeArray::F64(values),
    }
}

/// One smoothing + decimation step; dtype is preserved.
pub fn smooth_and_decimate(arr: &VolumeArray) -> VolumeArray {
    let mut field = to_f64(arr);
    for axis in 0..3 {
        field = smooth_axis(&field, Axis(axis));
    }
    cast_back(arr, decimate(&field))
}

/// Size/level budget for pyramid construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownsamplingConfig {
    /// Coarsest ratio to build (power of two); fixes the step count outright
    pub max_level: Option<u32>,
    /// Finest downsampled ratio worth persisting
    pub min_level: Option<u32>,
    /// Persisted levels whose projected size exceeds this are skipped
    pub max_bytes_per_level: Option<u64>,
    /// Stop adding steps once the projected level size falls below this
    pub min_projected_bytes: u64,
    /// Native grids at or below this voxel count get a single step
    pub min_grid_voxels: u64,
}

impl Default for DownsamplingConfig {
    fn default() -> Self {
        Self {
            max_level: None,
            min_level: None,
            max_bytes_per_level: None,
            min_projected_bytes: 8 * 1024 * 1024,
            min_grid_voxels: 100 * 100 * 100,
        }
    }
}

impl DownsamplingConfig {
    pub fn with_max_level(mut self, level: u32) -> Self {
        self.max_level = Some(level);
        self
    }

    pub fn with_min_level(mut self, level: u32) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn with_max_bytes_per_level(mut self, bytes: u64) -> Self {
        self.max_bytes_per_level = Some(bytes);
        self
    }
}

/// Number of downsampling steps to run for a native grid.
///
/// A configured `max_level` pins the step count to `log2(max_level)`. Small
/// grids get one step; otherwise steps accumulate while the projected size
/// (native bytes shrinking 8x per step) stays at or above the configured
/// minimum.
pub fn number_of_downsampling_steps(
    config: &DownsamplingConfig,
    native_voxels: u64,
    dtype_size: u64,
) -> Result<u32> {
    if let Some(max_level) = config.max_level {
        if !max_level.is_power_of_two() || max_level < 2 {
            return Err(SegvolError::ConfigurationInfeasible(format!(
                "max_level {} is not a power of two >= 2",
                max_level
            )));
        }
        return Ok(max_level.ilog2());
    }
    if native_voxels <= config.min_grid_voxels {
        return Ok(1);
    }
    let mut steps = 1u32;
    let mut projected = native_voxels.saturating_mul(dtype_size) / 8;
    while projected >= config.min_projected_bytes {
        steps += 1;
        projected /= 8;
    }
    Ok(steps)
}

/// Which of the built levels `{2, 4, .., 2^steps}` get persisted.
///
/// Candidates outside the configured `[min_level, max_level]` bound are
/// dropped, as are levels whose projected size still exceeds the per-level
/// maximum; the persisted ladder need not be contiguous. An empty result
/// means no legal level satisfies the combined constraints.
pub fn downsamplings_to_be_stored(
    config: &DownsamplingConfig,
    steps: u32,
    native_bytes: u64,
) -> Result<Vec<u32>> {
    let mut ratios = Vec::new();
    for step in 1..=steps {
        let ratio = 1u32 << step;
        if config.min_level.is_some_and(|min| ratio < min) {
            continue;
        }
        if config.max_level.is_some_and(|max| ratio > max) {
            continue;
        }
        if let Some(limit) = config.max_bytes_per_level {
            let projected = native_bytes >> (3 * step);
            if projected > limit {
                continue;
            }
        }
        ratios.push(ratio);
    }
    if ratios.is_empty() {
        return Err(SegvolError::ConfigurationInfeasible(format!(
            "no persistable level among {} candidate steps",
            steps
        )));
    }
    Ok(ratios)
}
