//! segvol - Multiresolution Volume & Segmentation Store
//!
//! Stores, downsamples and serves large 3D (+time/channel) scientific
//! volumes and their multi-label segmentations at multiple resolutions, so
//! remote clients fetch a bounded amount of data regardless of native size.
//!
//! # Features
//!
//! - Pyramid building under a size/level budget: binomial smoothing +
//!   stride-2 decimation for numeric volumes, block-union downsampling with
//!   per-level category-set tables for segmentations (a label present
//!   anywhere stays discoverable at every coarser level)
//! - Chunked, write-once storage layout keyed by resolution x time x
//!   channel (volumes) and lattice x resolution x time x channel
//!   (segmentations), identical for the writer and the reader
//! - Two packagings behind one backend trait: a live directory of chunks or
//!   a single sealed archive file
//! - Request-time planner picking the coarsest acceptable resolution and
//!   grid box for a physical-space query under a point budget
//! - Async I/O throughout
//!
//! # Example
//!
//! ```rust,ignore
//! use segvol::{Preprocessor, QueryService, QueryRequest, SourceFormat};
//!
//! # async fn example(entry: segvol::IngestedEntry) -> segvol::Result<()> {
//! let preprocessor = Preprocessor::new("/data/registry");
//! preprocessor
//!     .preprocess("emdb", "em-1832", SourceFormat::InMemory(Box::new(entry)))
//!     .await?;
//!
//! let service = QueryService::new("/data/registry");
//! let response = service
//!     .query(&QueryRequest {
//!         namespace: "emdb".into(),
//!         key: "em-1832".into(),
//!         time: 0,
//!         channel: 0,
//!         max_points: Some(100_000),
//!         requested_box: None,
//!         lattice_id: None,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod array;
pub mod compression;
pub mod downsample;
pub mod error;
pub mod ingest;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod planner;
pub mod preprocess;
pub mod pyramid;
pub mod query;
pub mod store;
pub mod table;
pub mod types;

// Re-exports
pub use array::VolumeArray;
pub use downsample::{downsample_step, SegmentationLevel};
pub use error::{Result, SegvolError};
pub use ingest::{ingest, IngestedEntry, SegmentationFrames, SourceFormat, VolumeFrames};
pub use io::{open_backend, FsBackend, Packaging, StoreBackend};
pub use metadata::{EntryMetadata, MetadataBuilder};
pub use planner::decide_slice_box;
pub use preprocess::Preprocessor;
pub use pyramid::{smooth_and_decimate, DownsamplingConfig};
pub use query::{QueryRequest, QueryResponse, QueryService};
pub use store::GridStore;
pub use table::{CategorySetTable, SegmentSet};
pub use types::{DataType, DescriptiveStats, GridSliceBox, PhysicalBox, SamplingBox};

/// Version of the segvol implementation
pub const SEGVOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!SEGVOL_VERSION.is_empty());
    }
}
