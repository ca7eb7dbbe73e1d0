//! Entry metadata: the tagged record the read path plans against
//!
//! One document per entry, written once at the end of preprocessing and never
//! mutated. All write-side accumulation goes through [`MetadataBuilder`] so
//! there is exactly one commit point.

use crate::compression::CompressionMethod;
use crate::error::{Result, SegvolError};
use crate::types::{DataType, DescriptiveStats, SamplingBox};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata document format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

fn stats_key(resolution: u32, time: u32, channel: u32) -> String {
    format!("{}/{}/{}", resolution, time, channel)
}

/// Complete metadata for one published entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub version: FormatVersion,

    /// Voxel dtype, constant across all levels
    pub dtype: DataType,

    /// Compression method of every chunk payload
    pub compression: CompressionMethod,

    /// Available resolution ratios, ascending; 1 is native
    pub resolutions: Vec<u32>,

    /// Time indices present per level
    pub times: Vec<u32>,

    /// Channel indices present per level
    pub channels: Vec<u32>,

    /// Segmentation lattice ids, ascending; empty for volume-only entries
    pub lattice_ids: Vec<u32>,

    /// Per-resolution physical-to-grid mapping, keyed by ratio
    pub sampling_boxes: BTreeMap<u32, SamplingBox>,

    /// Descriptive statistics keyed by `resolution/time/channel`
    pub statistics: BTreeMap<String, DescriptiveStats>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn sampling_box(&self, resolution: u32) -> Result<&SamplingBox> {
        self.sampling_boxes.get(&resolution).ok_or_else(|| {
            SegvolError::NotFound(format!("no sampling box for resolution {}", resolution))
        })
    }

    pub fn statistics_for(
        &self,
        resolution: u32,
        time: u32,
        channel: u32,
    ) -> Option<&DescriptiveStats> {
        self.statistics.get(&stats_key(resolution, time, channel))
    }

    pub fn has_resolution(&self, resolution: u32) -> bool {
        self.resolutions.contains(&resolution)
    }

    /// First lattice id, the fallback when a requested one is absent
    pub fn first_lattice_id(&self) -> Option<u32> {
        self.lattice_ids.first().copied()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metadata: EntryMetadata = serde_json::from_slice(bytes)?;
        if !metadata.version.is_compatible(&FormatVersion::CURRENT) {
            return Err(SegvolError::Metadata(format!(
                "incompatible metadata version {}.{}",
                metadata.version.major, metadata.version.minor
            )));
        }
        Ok(metadata)
    }
}

/// Write-side accumulator for [`EntryMetadata`].
///
/// Preprocessing tasks each contribute their piece; `build` validates and
/// commits once at the end.
#[derive(Debug)]
pub struct MetadataBuilder {
    dtype: DataType,
    compression: CompressionMethod,
    times: Vec<u32>,
    channels: Vec<u32>,
    lattice_ids: Vec<u32>,
    sampling_boxes: BTreeMap<u32, SamplingBox>,
    statistics: BTreeMap<String, DescriptiveStats>,
}

impl MetadataBuilder {
    pub fn new(dtype: DataType, compression: CompressionMethod) -> Self {
        Self {
            dtype,
            compression,
            times: Vec::new(),
            channels: Vec::new(),
            lattice_ids: Vec::new(),
            sampling_boxes: BTreeMap::new(),
            statistics: BTreeMap::new(),
        }
    }

    pub fn set_axes(&mut self, times: Vec<u32>, channels: Vec<u32>) {
        self.times = times;
        self.channels = channels;
    }

    /// Register one persisted resolution with its own sampling box
    pub fn add_resolution(&mut self, ratio: u32, sampling_box: SamplingBox) {
        self.sampling_boxes.insert(ratio, sampling_box);
    }

    pub fn add_lattice(&mut self, lattice_id: u32) {
        if !self.lattice_ids.contains(&lattice_id) {
            self.lattice_ids.push(lattice_id);
            self.lattice_ids.sort_unstable();
        }
    }

    pub fn set_statistics(
        &mut self,
        resolution: u32,
        time: u32,
        channel: u32,
        stats: DescriptiveStats,
    ) {
        self.statistics.insert(stats_key(resolution, time, channel), stats);
    }

    /// Validate and commit the document
    pub fn build(self) -> Result<EntryMetadata> {
        let resolutions: Vec<u32> = self.sampling_boxes.keys().copied().collect();
        if resolutions.is_empty() {
            return Err(SegvolError::Metadata("no resolutions registered".to_string()));
        }
        for &ratio in &resolutions {
            if !ratio.is_power_of_two() {
                return Err(SegvolError::Metadata(format!(
                    "resolution ratio {} is not a power of two",
                    ratio
                )));
            }
        }
        if self.times.is_empty() || self.channels.is_empty() {
            return Err(SegvolError::Metadata("time/channel axes not set".to_string()));
        }
        for &r in &resolutions {
            for &t in &self.times {
                for &c in &self.channels {
                    if !self.statistics.contains_key(&stats_key(r, t, c)) {
                        return Err(SegvolError::Metadata(format!(
                            "missing statistics for resolution {} time {} channel {}",
                            r, t, c
                        )));
                    }
                }
            }
        }
        Ok(EntryMetadata {
            version: FormatVersion::CURRENT,
            dtype: self.dtype,
            compression: self.compression,
            resolutions,
            times: self.times,
            channels: self.channels,
            lattice_ids: self.lattice_ids,
            sampling_boxes: self.sampling_boxes,
            statistics: self.statistics,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_box(dims: [usize; 3]) -> SamplingBox {
        SamplingBox::new([0.0; 3], [1.0; 3], dims)
    }

    fn stats() -> DescriptiveStats {
        DescriptiveStats {
            mean: 1.0,
            min: 0.0,
            max: 2.0,
            std: 0.5,
        }
    }

    fn minimal_builder() -> MetadataBuilder {
        let mut builder = MetadataBuilder::new(DataType::F32, CompressionMethod::Zstd);
        builder.set_axes(vec![0], vec![0]);
        builder.add_resolution(1, sample_box([16, 16, 16]));
        builder.add_resolution(2, sample_box([8, 8, 8]));
        builder.set_statistics(1, 0, 0, stats());
        builder.set_statistics(2, 0, 0, stats());
        builder
    }

    #[test]
    fn test_build_and_roundtrip() {
        let mut builder = minimal_builder();
        builder.add_lattice(0);
        let metadata = builder.build().unwrap();
        assert_eq!(metadata.resolutions, vec![1, 2]);
        assert_eq!(metadata.first_lattice_id(), Some(0));

        let bytes = metadata.to_bytes().unwrap();
        let back = EntryMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(back.resolutions, metadata.resolutions);
        assert_eq!(back.sampling_box(2).unwrap(), metadata.sampling_box(2).unwrap());
        assert!(back.statistics_for(1, 0, 0).is_some());
        assert!(back.statistics_for(4, 0, 0).is_none());
    }

    #[test]
    fn test_build_rejects_missing_statistics() {
        let mut builder = minimal_builder();
        builder.add_resolution(4, sample_box([4, 4, 4]));
        // No statistics registered for the new level.
        assert!(matches!(builder.build(), Err(SegvolError::Metadata(_))));
    }

    #[test]
    fn test_build_rejects_non_power_of_two() {
        let mut builder = minimal_builder();
        builder.add_resolution(3, sample_box([5, 5, 5]));
        builder.set_statistics(3, 0, 0, stats());
        assert!(matches!(builder.build(), Err(SegvolError::Metadata(_))));
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let metadata = minimal_builder().build().unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&metadata.to_bytes().unwrap()).unwrap();
        doc["version"]["major"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert!(matches!(
            EntryMetadata::from_bytes(&bytes),
            Err(SegvolError::Metadata(_))
        ));
    }
}
