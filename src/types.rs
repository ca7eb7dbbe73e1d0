//! Core data types shared by the write and read paths

use serde::{Deserialize, Serialize};
use std::fmt;

/// Voxel data types supported by the store.
///
/// The dtype of a channel is fixed once at ingestion and constant across all
/// resolution levels of that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8 = 0,
    /// Unsigned 16-bit integer
    U16 = 1,
    /// Unsigned 32-bit integer
    U32 = 2,
    /// 32-bit floating point
    F32 = 3,
    /// 64-bit floating point
    F64 = 4,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Axis-aligned box in physical space (inclusive corners)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl PhysicalBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min
            .iter()
            .zip(self.max.iter())
            .all(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo <= hi)
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &PhysicalBox) -> bool {
        (0..3).all(|a| self.min[a] <= other.min[a] && other.max[a] <= self.max[a])
    }
}

/// Physical-to-grid coordinate mapping of one resolution level.
///
/// Each level carries its own sampling box; coarser levels may round their
/// dimensions independently, so boxes are never derived across levels at read
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingBox {
    /// Physical coordinate of grid index (0, 0, 0)
    pub origin: [f64; 3],
    /// Physical extent of one voxel per axis
    pub voxel_size: [f64; 3],
    /// Number of samples per axis
    pub grid_dimensions: [usize; 3],
}

impl SamplingBox {
    pub fn new(origin: [f64; 3], voxel_size: [f64; 3], grid_dimensions: [usize; 3]) -> Self {
        Self {
            origin,
            voxel_size,
            grid_dimensions,
        }
    }

    /// Total number of voxels in the grid
    pub fn voxel_count(&self) -> usize {
        self.grid_dimensions.iter().product()
    }

    /// Physical coordinate of a grid index
    pub fn grid_to_physical(&self, index: [usize; 3]) -> [f64; 3] {
        [
            self.origin[0] + index[0] as f64 * self.voxel_size[0],
            self.origin[1] + index[1] as f64 * self.voxel_size[1],
            self.origin[2] + index[2] as f64 * self.voxel_size[2],
        ]
    }

    /// Grid index at or below a physical coordinate, per axis
    pub fn physical_to_grid_floor(&self, point: [f64; 3]) -> [i64; 3] {
        let mut out = [0i64; 3];
        for (a, slot) in out.iter_mut().enumerate() {
            *slot = ((point[a] - self.origin[a]) / self.voxel_size[a]).floor() as i64;
        }
        out
    }

    /// Grid index at or above a physical coordinate, per axis
    pub fn physical_to_grid_ceil(&self, point: [f64; 3]) -> [i64; 3] {
        let mut out = [0i64; 3];
        for (a, slot) in out.iter_mut().enumerate() {
            *slot = ((point[a] - self.origin[a]) / self.voxel_size[a]).ceil() as i64;
        }
        out
    }

    /// Sampling box of the next coarser level (ratio doubled).
    ///
    /// Dimensions shrink to `ceil(dim / 2)` per axis, matching the decimation
    /// performed by the pyramid builders; the origin is shared because both
    /// decimations keep sample 0.
    pub fn halved(&self) -> SamplingBox {
        SamplingBox {
            origin: self.origin,
            voxel_size: [
                self.voxel_size[0] * 2.0,
                self.voxel_size[1] * 2.0,
                self.voxel_size[2] * 2.0,
            ],
            grid_dimensions: [
                self.grid_dimensions[0].div_ceil(2),
                self.grid_dimensions[1].div_ceil(2),
                self.grid_dimensions[2].div_ceil(2),
            ],
        }
    }
}

/// Request-scoped grid-index sub-box at one resolution.
///
/// Corners are inclusive. Created by the slice planner, consumed by one store
/// read, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSliceBox {
    /// Resolution ratio this box is expressed in (1, 2, 4, ...)
    pub downsampling_rate: u32,
    /// Inclusive lower corner per axis
    pub bottom_left: [usize; 3],
    /// Inclusive upper corner per axis
    pub top_right: [usize; 3],
}

impl GridSliceBox {
    pub fn new(downsampling_rate: u32, bottom_left: [usize; 3], top_right: [usize; 3]) -> Self {
        Self {
            downsampling_rate,
            bottom_left,
            top_right,
        }
    }

    /// Extent per axis, in voxels
    pub fn shape(&self) -> [usize; 3] {
        [
            self.top_right[0] - self.bottom_left[0] + 1,
            self.top_right[1] - self.bottom_left[1] + 1,
            self.top_right[2] - self.bottom_left[2] + 1,
        ]
    }

    /// Number of voxels covered by the box
    pub fn voxel_count(&self) -> usize {
        self.shape().iter().product()
    }

    /// Physical-space cover of this box under the level's sampling box
    pub fn to_physical(&self, sampling: &SamplingBox) -> PhysicalBox {
        PhysicalBox::new(
            sampling.grid_to_physical(self.bottom_left),
            sampling.grid_to_physical(self.top_right),
        )
    }
}

/// Descriptive statistics cached per (resolution, time, channel)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl DescriptiveStats {
    pub fn is_valid(&self) -> bool {
        self.mean.is_finite() && self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::U8.size_in_bytes(), 1);
        assert_eq!(DataType::U16.size_in_bytes(), 2);
        assert_eq!(DataType::U32.size_in_bytes(), 4);
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_sampling_box_roundtrip() {
        let sb = SamplingBox::new([10.0, 0.0, -5.0], [2.0, 2.0, 2.0], [100, 80, 60]);
        assert_eq!(sb.grid_to_physical([0, 0, 0]), [10.0, 0.0, -5.0]);
        assert_eq!(sb.grid_to_physical([1, 2, 3]), [12.0, 4.0, 1.0]);
        assert_eq!(sb.physical_to_grid_floor([13.0, 4.0, 1.0]), [1, 2, 3]);
        assert_eq!(sb.physical_to_grid_ceil([13.0, 4.0, 1.0]), [2, 2, 3]);
    }

    #[test]
    fn test_sampling_box_halved_rounds_up() {
        let sb = SamplingBox::new([0.0; 3], [1.0; 3], [7, 8, 9]);
        let coarse = sb.halved();
        assert_eq!(coarse.grid_dimensions, [4, 4, 5]);
        assert_eq!(coarse.voxel_size, [2.0, 2.0, 2.0]);
        assert_eq!(coarse.origin, sb.origin);
    }

    #[test]
    fn test_slice_box_shape_and_volume() {
        let b = GridSliceBox::new(2, [1, 2, 3], [4, 4, 4]);
        assert_eq!(b.shape(), [4, 3, 2]);
        assert_eq!(b.voxel_count(), 24);
    }

    #[test]
    fn test_slice_box_physical_cover_contains_request() {
        let sb = SamplingBox::new([0.0; 3], [4.0; 3], [50, 50, 50]);
        let request = PhysicalBox::new([3.0, 3.0, 3.0], [9.0, 9.0, 9.0]);
        let lower = sb.physical_to_grid_floor(request.min);
        let upper = sb.physical_to_grid_ceil(request.max);
        let slice = GridSliceBox::new(
            1,
            [lower[0] as usize, lower[1] as usize, lower[2] as usize],
            [upper[0] as usize, upper[1] as usize, upper[2] as usize],
        );
        assert!(slice.to_physical(&sb).contains(&request));
    }
}
