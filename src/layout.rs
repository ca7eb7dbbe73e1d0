//! Store layout: path keys and per-array chunk geometry
//!
//! Writer and reader share this module, so the on-disk tree is reproduced
//! bit-identically by any pair. Non-payload path segments are string-encoded
//! small integers. Chunking is a performance knob only; any chunk shape must
//! read back identically.

use crate::compression::CompressionMethod;
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// Key of the entry metadata document at the entry root
pub const METADATA_KEY: &str = "metadata.json";

/// Key of the per-array descriptor below an array prefix
pub const ARRAY_DESCRIPTOR_KEY: &str = "array.json";

/// Prefix of one volume array: `volume/<resolution>/<time>/<channel>`
pub fn volume_prefix(resolution: u32, time: u32, channel: u32) -> String {
    format!("volume/{}/{}/{}", resolution, time, channel)
}

/// Prefix of one segmentation grid:
/// `lattice/<lattice_id>/<resolution>/<time>/<channel>/grid`
pub fn lattice_grid_prefix(lattice_id: u32, resolution: u32, time: u32, channel: u32) -> String {
    format!("lattice/{}/{}/{}/{}/grid", lattice_id, resolution, time, channel)
}

/// Key of one serialized category-set table:
/// `lattice/<lattice_id>/<resolution>/<time>/<channel>/set_table`
pub fn set_table_key(lattice_id: u32, resolution: u32, time: u32, channel: u32) -> String {
    format!(
        "lattice/{}/{}/{}/{}/set_table",
        lattice_id, resolution, time, channel
    )
}

/// Key of one chunk below an array prefix
pub fn chunk_key(prefix: &str, coords: [usize; 3]) -> String {
    format!("{}/chunk-{}-{}-{}", prefix, coords[0], coords[1], coords[2])
}

/// Per-array descriptor, written after every chunk of the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub dtype: DataType,
    pub shape: [usize; 3],
    pub chunk_shape: [usize; 3],
    pub compression: CompressionMethod,
}

/// Chunk geometry of one stored array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    pub shape: [usize; 3],
    pub chunk_shape: [usize; 3],
}

impl ArrayLayout {
    pub fn new(shape: [usize; 3], chunk_shape: [usize; 3]) -> Self {
        Self { shape, chunk_shape }
    }

    /// Automatic chunk shape: a quarter of each axis extent, clamped to
    /// `[1, extent]`.
    pub fn auto(shape: [usize; 3]) -> Self {
        let chunk_shape = [
            (shape[0] / 4).clamp(1, shape[0].max(1)),
            (shape[1] / 4).clamp(1, shape[1].max(1)),
            (shape[2] / 4).clamp(1, shape[2].max(1)),
        ];
        Self { shape, chunk_shape }
    }

    /// Number of chunks per axis
    pub fn chunk_count(&self) -> [usize; 3] {
        [
            self.shape[0].div_ceil(self.chunk_shape[0]),
            self.shape[1].div_ceil(self.chunk_shape[1]),
            self.shape[2].div_ceil(self.chunk_shape[2]),
        ]
    }

    pub fn total_chunks(&self) -> usize {
        self.chunk_count().iter().product()
    }

    /// Voxel range `[start, end)` per axis covered by one chunk; trailing
    /// chunks are trimmed to the array boundary.
    pub fn chunk_voxel_range(&self, coords: [usize; 3]) -> [(usize, usize); 3] {
        let mut range = [(0, 0); 3];
        for (a, slot) in range.iter_mut().enumerate() {
            let start = coords[a] * self.chunk_shape[a];
            let end = (start + self.chunk_shape[a]).min(self.shape[a]);
            *slot = (start, end);
        }
        range
    }

    /// Chunk coordinates overlapping the inclusive voxel box
    /// `[bottom_left, top_right]`
    pub fn chunks_overlapping(
        &self,
        bottom_left: [usize; 3],
        top_right: [usize; 3],
    ) -> Vec<[usize; 3]> {
        let lo = [
            bottom_left[0] / self.chunk_shape[0],
            bottom_left[1] / self.chunk_shape[1],
            bottom_left[2] / self.chunk_shape[2],
        ];
        let hi = [
            top_right[0] / self.chunk_shape[0],
            top_right[1] / self.chunk_shape[1],
            top_right[2] / self.chunk_shape[2],
        ];
        let mut out = Vec::new();
        for i in lo[0]..=hi[0] {
            for j in lo[1]..=hi[1] {
                for k in lo[2]..=hi[2] {
                    out.push([i, j, k]);
                }
            }
        }
        out
    }
}

impl From<&ArrayDescriptor> for ArrayLayout {
    fn from(desc: &ArrayDescriptor) -> Self {
        ArrayLayout::new(desc.shape, desc.chunk_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_keys_are_stringified_integers() {
        assert_eq!(volume_prefix(2, 0, 1), "volume/2/0/1");
        assert_eq!(lattice_grid_prefix(0, 4, 0, 0), "lattice/0/4/0/0/grid");
        assert_eq!(set_table_key(3, 1, 0, 0), "lattice/3/1/0/0/set_table");
        assert_eq!(chunk_key("volume/1/0/0", [0, 2, 5]), "volume/1/0/0/chunk-0-2-5");
    }

    #[test]
    fn test_auto_chunk_shape() {
        assert_eq!(ArrayLayout::auto([64, 64, 64]).chunk_shape, [16, 16, 16]);
        // Tiny axes clamp to a single voxel, never zero.
        assert_eq!(ArrayLayout::auto([3, 64, 2]).chunk_shape, [1, 16, 1]);
    }

    #[test]
    fn test_chunk_count_and_trimmed_range() {
        let layout = ArrayLayout::new([100, 80, 50], [32, 32, 32]);
        assert_eq!(layout.chunk_count(), [4, 3, 2]);
        assert_eq!(layout.total_chunks(), 24);
        assert_eq!(
            layout.chunk_voxel_range([3, 2, 1]),
            [(96, 100), (64, 80), (32, 50)]
        );
    }

    #[test]
    fn test_chunks_overlapping_box() {
        let layout = ArrayLayout::new([64, 64, 64], [16, 16, 16]);
        // A box inside a single chunk.
        assert_eq!(layout.chunks_overlapping([0, 0, 0], [15, 15, 15]), vec![[0, 0, 0]]);
        // A box straddling one chunk boundary along x.
        let coords = layout.chunks_overlapping([10, 0, 0], [20, 10, 10]);
        assert_eq!(coords, vec![[0, 0, 0], [1, 0, 0]]);
    }
}
