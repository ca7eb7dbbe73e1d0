//! Read path: compose metadata, the slice planner and scoped store reads
//!
//! Stateless across requests; each request opens its own scoped reader and
//! performs no mutation, so concurrent readers never block each other. The
//! reader releases its backend when dropped, on every exit path.

use crate::array::VolumeArray;
use crate::error::{Result, SegvolError};
use crate::io::{open_backend, resolve_entry};
use crate::metadata::EntryMetadata;
use crate::planner::decide_slice_box;
use crate::store::GridStore;
use crate::table::CategorySetTable;
use crate::types::{GridSliceBox, PhysicalBox};
use ndarray::Array3;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One query against a published entry
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub namespace: String,
    pub key: String,
    pub time: u32,
    pub channel: u32,
    /// Upper bound on returned voxels; `None` means finest available
    pub max_points: Option<usize>,
    /// Physical-space region; `None` means the whole grid
    pub requested_box: Option<PhysicalBox>,
    /// Preferred segmentation lattice; an absent id falls back to the first
    /// available lattice
    pub lattice_id: Option<u32>,
}

/// Segmentation part of a response
#[derive(Debug, Clone)]
pub struct SegmentationSlice {
    pub lattice_id: u32,
    pub grid: Array3<u32>,
    pub table: CategorySetTable,
}

/// Raw arrays plus the chosen box and metadata, ready for an external
/// serializer
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub slice_box: GridSliceBox,
    pub volume: VolumeArray,
    /// `None` when the entry has no segmentation lattices
    pub segmentation: Option<SegmentationSlice>,
    pub metadata: Arc<EntryMetadata>,
}

/// Scoped read handle over one published entry
pub struct EntryReader {
    store: GridStore,
    metadata: Arc<EntryMetadata>,
}

impl EntryReader {
    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    fn check_rate(&self, resolution: u32, slice_box: &GridSliceBox) -> Result<()> {
        if slice_box.downsampling_rate != resolution {
            return Err(SegvolError::InvalidDimensions(format!(
                "slice box planned at resolution {} read at {}",
                slice_box.downsampling_rate, resolution
            )));
        }
        Ok(())
    }

    pub async fn read_volume_slice(
        &self,
        resolution: u32,
        time: u32,
        channel: u32,
        slice_box: &GridSliceBox,
    ) -> Result<VolumeArray> {
        self.check_rate(resolution, slice_box)?;
        self.store
            .read_volume_box(resolution, time, channel, slice_box)
            .await
    }

    pub async fn read_segmentation_slice(
        &self,
        lattice_id: u32,
        resolution: u32,
        time: u32,
        channel: u32,
        slice_box: &GridSliceBox,
    ) -> Result<(Array3<u32>, CategorySetTable)> {
        self.check_rate(resolution, slice_box)?;
        self.store
            .read_lattice_box(lattice_id, resolution, time, channel, slice_box)
            .await
    }
}

/// Entry point of the read side, rooted at one registry directory.
///
/// Metadata documents are cached per entry; call [`QueryService::invalidate`]
/// after re-processing an id in the same process.
pub struct QueryService {
    root: PathBuf,
    metadata_cache: RwLock<HashMap<(String, String), Arc<EntryMetadata>>>,
}

impl QueryService {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            metadata_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Metadata of one entry, from cache when warm
    pub async fn read_metadata(&self, namespace: &str, key: &str) -> Result<Arc<EntryMetadata>> {
        let cache_key = (namespace.to_string(), key.to_string());
        if let Some(metadata) = self.metadata_cache.read().get(&cache_key) {
            return Ok(Arc::clone(metadata));
        }
        let reader = self.read(namespace, key).await?;
        Ok(reader.metadata)
    }

    /// Open a scoped reader over one entry
    pub async fn read(&self, namespace: &str, key: &str) -> Result<EntryReader> {
        let path = resolve_entry(&self.root, namespace, key).await?;
        let backend = open_backend(&path).await?;
        // Compression for reads comes from each array's descriptor; the
        // store-level method only matters on the write path.
        let store = GridStore::new(backend, crate::compression::CompressionMethod::None);
        let metadata = Arc::new(store.read_metadata().await?);
        self.metadata_cache.write().insert(
            (namespace.to_string(), key.to_string()),
            Arc::clone(&metadata),
        );
        Ok(EntryReader { store, metadata })
    }

    /// Drop the cached metadata of one entry
    pub fn invalidate(&self, namespace: &str, key: &str) {
        self.metadata_cache
            .write()
            .remove(&(namespace.to_string(), key.to_string()));
    }

    /// Run one query: plan the slice, read the arrays, hand back raw data.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let reader = self.read(&request.namespace, &request.key).await?;
        let metadata = Arc::clone(&reader.metadata);

        if !metadata.times.contains(&request.time) {
            return Err(SegvolError::NotFound(format!("time {}", request.time)));
        }
        if !metadata.channels.contains(&request.channel) {
            return Err(SegvolError::NotFound(format!("channel {}", request.channel)));
        }

        let slice_box = decide_slice_box(
            request.max_points,
            request.requested_box.as_ref(),
            &metadata,
        )?;
        debug!(
            rate = slice_box.downsampling_rate,
            voxels = slice_box.voxel_count(),
            "slice box decided"
        );

        let volume = reader
            .read_volume_slice(
                slice_box.downsampling_rate,
                request.time,
                request.channel,
                &slice_box,
            )
            .await?;

        // A requested lattice that does not exist falls back to the first
        // available one; an entry without lattices yields no segmentation.
        let effective_lattice = match request.lattice_id {
            Some(id) if metadata.lattice_ids.contains(&id) => Some(id),
            _ => metadata.first_lattice_id(),
        };
        let segmentation = match effective_lattice {
            Some(lattice_id) => {
                let (grid, table) = reader
                    .read_segmentation_slice(
                        lattice_id,
                        slice_box.downsampling_rate,
                        request.time,
                        request.channel,
                        &slice_box,
                    )
                    .await?;
                Some(SegmentationSlice {
                    lattice_id,
                    grid,
                    table,
                })
            }
            None => None,
        };

        Ok(QueryResponse {
            slice_box,
            volume,
            segmentation,
            metadata,
        })
    }
}
