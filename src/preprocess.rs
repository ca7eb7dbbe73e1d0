//! Write path: turn one ingested entry into a published multiresolution tree
//!
//! The pipeline is a single-threaded, strictly ordered task sequence; a
//! failed task aborts the entry and the working area is discarded, never
//! reused. Publication is atomic from the read side: the full tree (or
//! sealed archive) is built under a staging path and moved into place with
//! one rename. Re-processing an existing id deletes the old entry first.

use crate::archive::pack_directory;
use crate::compression::CompressionMethod;
use crate::downsample::SegmentationLevel;
use crate::error::{Result, SegvolError};
use crate::ingest::{ingest, IngestedEntry, SourceFormat};
use crate::io::{entry_archive_path, entry_dir_path, FsBackend, Packaging};
use crate::metadata::MetadataBuilder;
use crate::pyramid::{
    downsamplings_to_be_stored, number_of_downsampling_steps, smooth_and_decimate,
    DownsamplingConfig,
};
use crate::store::GridStore;
use crate::table::CategorySetTable;
use crate::types::SamplingBox;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Builder-configured write pipeline rooted at one registry directory
pub struct Preprocessor {
    root: PathBuf,
    downsampling: DownsamplingConfig,
    compression: CompressionMethod,
    packaging: Packaging,
}

impl Preprocessor {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            downsampling: DownsamplingConfig::default(),
            compression: CompressionMethod::Zstd,
            packaging: Packaging::Directory,
        }
    }

    pub fn with_downsampling(mut self, config: DownsamplingConfig) -> Self {
        self.downsampling = config;
        self
    }

    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn with_packaging(mut self, packaging: Packaging) -> Self {
        self.packaging = packaging;
        self
    }

    /// Run the full task sequence for one entry and publish it.
    ///
    /// Returns the path the read side resolves.
    pub async fn preprocess(
        &self,
        namespace: &str,
        key: &str,
        format: SourceFormat,
    ) -> Result<PathBuf> {
        validate_id(namespace)?;
        validate_id(key)?;

        info!(namespace, key, "preprocessing entry");
        let entry = ingest(format)?;

        let staging = self
            .root
            .join(".staging")
            .join(format!("{}-{}", namespace, key));
        // A leftover staging area from a failed run is discarded, never reused.
        if fs::metadata(&staging).await.is_ok() {
            fs::remove_dir_all(&staging).await.map_err(SegvolError::Io)?;
        }
        fs::create_dir_all(&staging).await.map_err(SegvolError::Io)?;

        let result = self.build_tree(&entry, &staging).await;
        match result {
            Ok(()) => self.publish(namespace, key, &staging).await,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                Err(e)
            }
        }
    }

    /// Tasks: persist level 1, build+persist pyramid levels, statistics,
    /// metadata. Everything lands in the staging tree.
    async fn build_tree(&self, entry: &IngestedEntry, staging: &Path) -> Result<()> {
        let store = GridStore::new(Arc::new(FsBackend::new(staging)), self.compression);

        let dtype = entry.volume.dtype;
        let native_voxels = entry.sampling_box.voxel_count() as u64;
        let native_bytes = native_voxels * dtype.size_in_bytes() as u64;

        let steps = number_of_downsampling_steps(&self.downsampling, native_voxels, dtype.size_in_bytes() as u64)?;
        let stored = downsamplings_to_be_stored(&self.downsampling, steps, native_bytes)?;
        info!(steps, ?stored, "planned pyramid");

        let mut builder = MetadataBuilder::new(dtype, self.compression);
        builder.set_axes(entry.volume.times(), entry.volume.channels());
        builder.add_resolution(1, entry.sampling_box);

        // Persist level 1 and seed the per-frame working state.
        let mut volume_levels = BTreeMap::new();
        for (&(time, channel), frame) in &entry.volume.frames {
            store.write_volume_level(1, time, channel, frame).await?;
            builder.set_statistics(1, time, channel, frame.statistics());
            volume_levels.insert((time, channel), frame.clone());
        }
        let mut lattice_levels = BTreeMap::new();
        for seg in &entry.segmentations {
            builder.add_lattice(seg.lattice_id);
            let table = CategorySetTable::identity(&seg.value_to_segment);
            for (&(time, channel), grid) in &seg.grids {
                let level = SegmentationLevel::native(grid.clone(), table.clone());
                store
                    .write_lattice_level(seg.lattice_id, 1, time, channel, &level.grid, &level.table)
                    .await?;
                lattice_levels.insert((seg.lattice_id, time, channel), level);
            }
        }

        // Walk the ladder; persist only the planned levels, but keep stepping
        // through skipped ones so every kept level derives from its direct
        // predecessor.
        let mut sampling = entry.sampling_box;
        for step in 1..=steps {
            let ratio = 1u32 << step;
            sampling = sampling.halved();
            let persist = stored.contains(&ratio);
            debug!(ratio, persist, "building level");

            for (&(time, channel), frame) in volume_levels.iter_mut() {
                *frame = smooth_and_decimate(frame);
                if persist {
                    store.write_volume_level(ratio, time, channel, frame).await?;
                    builder.set_statistics(ratio, time, channel, frame.statistics());
                }
            }
            for (&(lattice_id, time, channel), level) in lattice_levels.iter_mut() {
                *level = level.downsampled()?;
                if persist {
                    store
                        .write_lattice_level(lattice_id, ratio, time, channel, &level.grid, &level.table)
                        .await?;
                }
            }
            if persist {
                builder.add_resolution(ratio, sampling);
            }
        }

        store.write_metadata(&builder.build()?).await
    }

    /// Atomic publish: seal the packaging, delete any previous entry, then
    /// one rename into the resolved location.
    async fn publish(&self, namespace: &str, key: &str, staging: &Path) -> Result<PathBuf> {
        let namespace_dir = self.root.join(namespace);
        fs::create_dir_all(&namespace_dir).await.map_err(SegvolError::Io)?;

        let dir_target = entry_dir_path(&self.root, namespace, key);
        let archive_target = entry_archive_path(&self.root, namespace, key);
        for old in [&dir_target, &archive_target] {
            if let Ok(meta) = fs::metadata(old).await {
                info!(path = %old.display(), "deleting previous entry");
                if meta.is_dir() {
                    fs::remove_dir_all(old).await.map_err(SegvolError::Io)?;
                } else {
                    fs::remove_file(old).await.map_err(SegvolError::Io)?;
                }
            }
        }

        let published = match self.packaging {
            Packaging::Directory => {
                fs::rename(staging, &dir_target).await.map_err(SegvolError::Io)?;
                dir_target
            }
            Packaging::Archive => {
                let partial = staging.with_extension("partial.sva");
                if fs::metadata(&partial).await.is_ok() {
                    fs::remove_file(&partial).await.map_err(SegvolError::Io)?;
                }
                pack_directory(staging, &partial).await?;
                fs::remove_dir_all(staging).await.map_err(SegvolError::Io)?;
                fs::rename(&partial, &archive_target).await.map_err(SegvolError::Io)?;
                archive_target
            }
        };
        info!(path = %published.display(), "published entry");
        Ok(published)
    }
}

fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SegvolError::Unsupported(format!(
            "entry id {:?} must be alphanumeric with - or _",
            id
        )))
    }
}

/// Sampling box of one downsampled level, for callers that need it without
/// walking the ladder themselves.
pub fn level_sampling_box(native: &SamplingBox, ratio: u32) -> SamplingBox {
    let mut sampling = *native;
    let mut r = 1;
    while r < ratio {
        sampling = sampling.halved();
        r *= 2;
    }
    sampling
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("em-1234").is_ok());
        assert!(validate_id("idr_0001").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id(".hidden").is_err());
    }

    #[test]
    fn test_level_sampling_box() {
        let native = SamplingBox::new([0.0; 3], [1.0; 3], [64, 64, 64]);
        let level4 = level_sampling_box(&native, 4);
        assert_eq!(level4.grid_dimensions, [16, 16, 16]);
        assert_eq!(level4.voxel_size, [4.0, 4.0, 4.0]);
    }
}
