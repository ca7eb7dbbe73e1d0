//! Ingestion boundary: what external format decoders deliver
//!
//! Decoding density maps, HDF5 segmentations, chunked-array pyramids, TIFF
//! stacks or NIfTI files is a collaborator's job. Everything downstream of
//! [`ingest`] sees only [`IngestedEntry`], so the pyramid and store core
//! never branch on a source format.

use crate::array::VolumeArray;
use crate::error::{Result, SegvolError};
use crate::types::{DataType, SamplingBox};
use ndarray::Array3;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Source container kinds an external decoder can ingest
#[derive(Debug, Clone)]
pub enum SourceFormat {
    /// Single density/intensity map file
    DensityMap { path: PathBuf },
    /// HDF5-based segmentation container
    Hdf5Segmentation { path: PathBuf },
    /// Pre-built chunked-array pyramid
    ChunkedPyramid { path: PathBuf },
    /// Directory of multi-page TIFF sections
    TiffStack { directory: PathBuf },
    /// NIfTI volume
    Nifti { path: PathBuf },
    /// Already-decoded entry, as produced by a decoder or a test
    InMemory(Box<IngestedEntry>),
}

/// Volume frames of one entry, keyed by (time, channel)
#[derive(Debug, Clone)]
pub struct VolumeFrames {
    pub dtype: DataType,
    pub frames: BTreeMap<(u32, u32), VolumeArray>,
}

impl VolumeFrames {
    /// Single-frame entry at time 0, channel 0
    pub fn single(array: VolumeArray) -> Self {
        Self {
            dtype: array.dtype(),
            frames: BTreeMap::from([((0, 0), array)]),
        }
    }

    pub fn times(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.frames.keys().map(|&(t, _)| t).collect();
        set.into_iter().collect()
    }

    pub fn channels(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.frames.keys().map(|&(_, c)| c).collect();
        set.into_iter().collect()
    }
}

/// One segmentation lattice: raw-value grids plus the value→segment map
#[derive(Debug, Clone)]
pub struct SegmentationFrames {
    pub lattice_id: u32,
    /// Raw grid value → stable segment id; must cover every grid value
    pub value_to_segment: BTreeMap<u32, u64>,
    pub grids: BTreeMap<(u32, u32), Array3<u32>>,
}

/// Decoded native-resolution entry handed over by ingestion
#[derive(Debug, Clone)]
pub struct IngestedEntry {
    pub volume: VolumeFrames,
    /// Native-level physical-to-grid mapping
    pub sampling_box: SamplingBox,
    pub segmentations: Vec<SegmentationFrames>,
}

impl IngestedEntry {
    /// Check the axes are rectangular and every frame matches the native
    /// grid, so later tasks can rely on uniform shapes.
    pub fn validate(&self) -> Result<()> {
        if self.volume.frames.is_empty() {
            return Err(SegvolError::InvalidDimensions(
                "entry has no volume frames".to_string(),
            ));
        }
        let dims = self.sampling_box.grid_dimensions;
        let times = self.volume.times();
        let channels = self.volume.channels();
        for &t in &times {
            for &c in &channels {
                let frame = self.volume.frames.get(&(t, c)).ok_or_else(|| {
                    SegvolError::InvalidDimensions(format!(
                        "missing volume frame at time {} channel {}",
                        t, c
                    ))
                })?;
                if frame.shape() != dims {
                    return Err(SegvolError::InvalidDimensions(format!(
                        "frame ({}, {}) has shape {:?}, sampling box says {:?}",
                        t,
                        c,
                        frame.shape(),
                        dims
                    )));
                }
                if frame.dtype() != self.volume.dtype {
                    return Err(SegvolError::InvalidDimensions(format!(
                        "frame ({}, {}) dtype {} differs from entry dtype {}",
                        t,
                        c,
                        frame.dtype(),
                        self.volume.dtype
                    )));
                }
            }
        }
        for seg in &self.segmentations {
            for (&(t, c), grid) in &seg.grids {
                let shape = grid.dim();
                if [shape.0, shape.1, shape.2] != dims {
                    return Err(SegvolError::InvalidDimensions(format!(
                        "lattice {} grid ({}, {}) has shape {:?}, sampling box says {:?}",
                        seg.lattice_id, t, c, shape, dims
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolve a source format to a decoded entry.
///
/// Only in-memory entries resolve here; file formats belong to external
/// decoder crates that produce `SourceFormat::InMemory` themselves.
pub fn ingest(format: SourceFormat) -> Result<IngestedEntry> {
    match format {
        SourceFormat::InMemory(entry) => {
            entry.validate()?;
            Ok(*entry)
        }
        other => Err(SegvolError::Unsupported(format!(
            "no decoder linked for {:?}; decode externally and ingest SourceFormat::InMemory",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn entry() -> IngestedEntry {
        IngestedEntry {
            volume: VolumeFrames::single(VolumeArray::F32(Array3::zeros((4, 4, 4)))),
            sampling_box: SamplingBox::new([0.0; 3], [1.0; 3], [4, 4, 4]),
            segmentations: Vec::new(),
        }
    }

    #[test]
    fn test_in_memory_ingest() {
        let ingested = ingest(SourceFormat::InMemory(Box::new(entry()))).unwrap();
        assert_eq!(ingested.volume.times(), vec![0]);
        assert_eq!(ingested.volume.channels(), vec![0]);
    }

    #[test]
    fn test_file_formats_need_external_decoder() {
        let result = ingest(SourceFormat::Nifti {
            path: PathBuf::from("brain.nii"),
        });
        assert!(matches!(result, Err(SegvolError::Unsupported(_))));
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let mut bad = entry();
        bad.sampling_box.grid_dimensions = [5, 4, 4];
        assert!(ingest(SourceFormat::InMemory(Box::new(bad))).is_err());
    }

    #[test]
    fn test_validate_rejects_ragged_axes() {
        let mut bad = entry();
        bad.volume
            .frames
            .insert((1, 1), VolumeArray::F32(Array3::zeros((4, 4, 4))));
        // (0,1) and (1,0) are missing, so the time x channel grid is ragged.
        assert!(ingest(SourceFormat::InMemory(Box::new(bad))).is_err());
    }
}
