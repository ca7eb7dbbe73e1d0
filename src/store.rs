//! GridStore: chunked, write-once persistence of volume and lattice trees
//!
//! Arrays are split into chunks on write and reassembled on read; overlapping
//! chunks are fetched concurrently. The same code runs against a live
//! directory or a sealed archive, because both sit behind
//! [`crate::io::StoreBackend`].

use crate::array::VolumeArray;
use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{Result, SegvolError};
use crate::io::StoreBackend;
use crate::layout::{
    chunk_key, lattice_grid_prefix, set_table_key, volume_prefix, ArrayDescriptor, ArrayLayout,
    ARRAY_DESCRIPTOR_KEY, METADATA_KEY,
};
use crate::metadata::EntryMetadata;
use crate::table::CategorySetTable;
use crate::types::{DataType, GridSliceBox};
use futures::future::try_join_all;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// On-disk form of one chunk: dtype and shape up front, voxel bytes
/// (optionally compressed) behind them
#[derive(Debug, Serialize, Deserialize)]
struct ChunkPayload {
    dtype: DataType,
    shape: [usize; 3],
    data: Vec<u8>,
}

/// Chunked array store over one entry root
pub struct GridStore {
    backend: Arc<dyn StoreBackend>,
    compression: CompressionMethod,
}

impl GridStore {
    pub fn new(backend: Arc<dyn StoreBackend>, compression: CompressionMethod) -> Self {
        Self {
            backend,
            compression,
        }
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    /// Write one array below `prefix`, chunked with the automatic chunk
    /// shape. The descriptor goes in last, so a readable descriptor implies
    /// complete chunks.
    pub async fn write_array(&self, prefix: &str, array: &VolumeArray) -> Result<()> {
        let layout = ArrayLayout::auto(array.shape());
        let compressor = get_compressor(self.compression);
        let count = layout.chunk_count();
        for i in 0..count[0] {
            for j in 0..count[1] {
                for k in 0..count[2] {
                    let coords = [i, j, k];
                    let range = layout.chunk_voxel_range(coords);
                    let sub = array.extract(
                        [range[0].0, range[1].0, range[2].0],
                        [range[0].1 - 1, range[1].1 - 1, range[2].1 - 1],
                    )?;
                    let payload = ChunkPayload {
                        dtype: sub.dtype(),
                        shape: sub.shape(),
                        data: compressor.compress(&sub.to_le_bytes(), CompressionLevel::default())?,
                    };
                    self.backend
                        .write(&chunk_key(prefix, coords), &bincode::serialize(&payload)?)
                        .await?;
                }
            }
        }
        let descriptor = ArrayDescriptor {
            dtype: array.dtype(),
            shape: array.shape(),
            chunk_shape: layout.chunk_shape,
            compression: self.compression,
        };
        self.backend
            .write(
                &format!("{}/{}", prefix, ARRAY_DESCRIPTOR_KEY),
                &serde_json::to_vec(&descriptor)?,
            )
            .await
    }

    async fn read_descriptor(&self, prefix: &str) -> Result<ArrayDescriptor> {
        let bytes = self
            .backend
            .read(&format!("{}/{}", prefix, ARRAY_DESCRIPTOR_KEY))
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn read_chunk(
        &self,
        prefix: &str,
        coords: [usize; 3],
        descriptor: &ArrayDescriptor,
    ) -> Result<VolumeArray> {
        let bytes = self.backend.read(&chunk_key(prefix, coords)).await?;
        let payload: ChunkPayload = bincode::deserialize(&bytes)?;
        if payload.dtype != descriptor.dtype {
            return Err(SegvolError::GridIntegrity(format!(
                "chunk {:?} dtype {} disagrees with descriptor {}",
                coords, payload.dtype, descriptor.dtype
            )));
        }
        let voxels = payload.shape.iter().product::<usize>() * payload.dtype.size_in_bytes();
        let raw = get_compressor(descriptor.compression).decompress(&payload.data, Some(voxels))?;
        VolumeArray::from_le_bytes(payload.dtype, payload.shape, &raw)
    }

    /// Read the inclusive sub-box `[bottom_left, top_right]` of the array
    /// below `prefix`, assembling it from the overlapping chunks.
    ///
    /// The box must already be validated and clamped by the caller; an
    /// out-of-range box is an error here, not a clamp.
    pub async fn read_array_box(
        &self,
        prefix: &str,
        bottom_left: [usize; 3],
        top_right: [usize; 3],
    ) -> Result<VolumeArray> {
        let descriptor = self.read_descriptor(prefix).await?;
        let layout = ArrayLayout::from(&descriptor);
        for a in 0..3 {
            if bottom_left[a] > top_right[a] || top_right[a] >= descriptor.shape[a] {
                return Err(SegvolError::OutOfBounds(format!(
                    "box [{:?}, {:?}] outside array of shape {:?}",
                    bottom_left, top_right, descriptor.shape
                )));
            }
        }

        let coords = layout.chunks_overlapping(bottom_left, top_right);
        let descriptor_ref = &descriptor;
        let chunks = try_join_all(coords.into_iter().map(|c| async move {
            let chunk = self.read_chunk(prefix, c, descriptor_ref).await?;
            Ok::<_, SegvolError>((c, chunk))
        }))
        .await?;

        let out_shape = [
            top_right[0] - bottom_left[0] + 1,
            top_right[1] - bottom_left[1] + 1,
            top_right[2] - bottom_left[2] + 1,
        ];
        let mut out = VolumeArray::zeros(descriptor.dtype, out_shape);
        for (c, chunk) in chunks {
            let range = layout.chunk_voxel_range(c);
            let mut dst_offset = [0usize; 3];
            let mut src_offset = [0usize; 3];
            let mut shape = [0usize; 3];
            for a in 0..3 {
                let start = bottom_left[a].max(range[a].0);
                let end = (top_right[a] + 1).min(range[a].1);
                dst_offset[a] = start - bottom_left[a];
                src_offset[a] = start - range[a].0;
                shape[a] = end - start;
            }
            out.assign_region(dst_offset, &chunk, src_offset, shape)?;
        }
        Ok(out)
    }

    /// Read one whole array
    pub async fn read_array(&self, prefix: &str) -> Result<VolumeArray> {
        let descriptor = self.read_descriptor(prefix).await?;
        let shape = descriptor.shape;
        self.read_array_box(prefix, [0, 0, 0], [shape[0] - 1, shape[1] - 1, shape[2] - 1])
            .await
    }

    // Volume tree

    pub async fn write_volume_level(
        &self,
        resolution: u32,
        time: u32,
        channel: u32,
        array: &VolumeArray,
    ) -> Result<()> {
        self.write_array(&volume_prefix(resolution, time, channel), array)
            .await
    }

    pub async fn read_volume_box(
        &self,
        resolution: u32,
        time: u32,
        channel: u32,
        slice_box: &GridSliceBox,
    ) -> Result<VolumeArray> {
        self.read_array_box(
            &volume_prefix(resolution, time, channel),
            slice_box.bottom_left,
            slice_box.top_right,
        )
        .await
    }

    // Lattice tree

    pub async fn write_lattice_level(
        &self,
        lattice_id: u32,
        resolution: u32,
        time: u32,
        channel: u32,
        grid: &Array3<u32>,
        table: &CategorySetTable,
    ) -> Result<()> {
        self.write_array(
            &lattice_grid_prefix(lattice_id, resolution, time, channel),
            &VolumeArray::U32(grid.clone()),
        )
        .await?;
        self.backend
            .write(
                &set_table_key(lattice_id, resolution, time, channel),
                &table.to_bytes()?,
            )
            .await
    }

    pub async fn read_lattice_box(
        &self,
        lattice_id: u32,
        resolution: u32,
        time: u32,
        channel: u32,
        slice_box: &GridSliceBox,
    ) -> Result<(Array3<u32>, CategorySetTable)> {
        let grid = self
            .read_array_box(
                &lattice_grid_prefix(lattice_id, resolution, time, channel),
                slice_box.bottom_left,
                slice_box.top_right,
            )
            .await?;
        let table_bytes = self
            .backend
            .read(&set_table_key(lattice_id, resolution, time, channel))
            .await?;
        let table = CategorySetTable::from_bytes(&table_bytes)?;
        match grid {
            VolumeArray::U32(grid) => Ok((grid, table)),
            other => Err(SegvolError::GridIntegrity(format!(
                "lattice grid stored with dtype {}, expected U32",
                other.dtype()
            ))),
        }
    }

    // Entry metadata

    pub async fn write_metadata(&self, metadata: &EntryMetadata) -> Result<()> {
        self.backend.write(METADATA_KEY, &metadata.to_bytes()?).await
    }

    pub async fn read_metadata(&self) -> Result<EntryMetadata> {
        let bytes = self.backend.read(METADATA_KEY).await?;
        EntryMetadata::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FsBackend;
    use crate::table::SegmentSet;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> GridStore {
        GridStore::new(Arc::new(FsBackend::new(dir.path())), CompressionMethod::Zstd)
    }

    fn test_volume(shape: (usize, usize, usize)) -> VolumeArray {
        VolumeArray::F32(Array3::from_shape_fn(shape, |(i, j, k)| {
            (i * 10000 + j * 100 + k) as f32
        }))
    }

    #[tokio::test]
    async fn test_array_roundtrip_across_chunks() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        // 20x17x9 with auto chunking (5x4x2) exercises trimmed trailing chunks.
        let array = test_volume((20, 17, 9));
        store.write_array("volume/1/0/0", &array).await.unwrap();

        let whole = store.read_array("volume/1/0/0").await.unwrap();
        assert_eq!(whole, array);

        // A sub-box crossing several chunk boundaries equals a direct extract.
        let sub = store
            .read_array_box("volume/1/0/0", [3, 2, 1], [12, 16, 8])
            .await
            .unwrap();
        assert_eq!(sub, array.extract([3, 2, 1], [12, 16, 8]).unwrap());
    }

    #[tokio::test]
    async fn test_read_box_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.write_array("volume/1/0/0", &test_volume((8, 8, 8))).await.unwrap();
        assert!(matches!(
            store.read_array_box("volume/1/0/0", [0, 0, 0], [8, 7, 7]).await,
            Err(SegvolError::OutOfBounds(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_array_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert!(matches!(
            store.read_array("volume/4/0/0").await,
            Err(SegvolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lattice_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let grid = Array3::from_shape_fn((6, 6, 6), |(i, _, _)| i as u32 % 3);
        let mut table = CategorySetTable::new();
        for v in 0..3u32 {
            table.resolve(&SegmentSet::from([v as u64 * 7]));
        }
        store.write_lattice_level(0, 1, 0, 0, &grid, &table).await.unwrap();

        let full = GridSliceBox::new(1, [0, 0, 0], [5, 5, 5]);
        let (read_grid, read_table) = store.read_lattice_box(0, 1, 0, 0, &full).await.unwrap();
        assert_eq!(read_grid, grid);
        assert_eq!(read_table, table);
    }

    #[tokio::test]
    async fn test_write_once_is_enforced() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let array = test_volume((4, 4, 4));
        store.write_array("volume/1/0/0", &array).await.unwrap();
        assert!(matches!(
            store.write_array("volume/1/0/0", &array).await,
            Err(SegvolError::AlreadyExists(_))
        ));
    }
}
