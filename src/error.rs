//! Error types for segvol operations

use thiserror::Error;

/// Main error type for store and preprocessing operations
#[derive(Error, Debug)]
pub enum SegvolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("infeasible downsampling configuration: {0}")]
    ConfigurationInfeasible(String),

    #[error("grid integrity violation: {0}")]
    GridIntegrity(String),

    #[error("missing lookup: {0}")]
    LookupMissing(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("requested box overlaps no resolution of the entry")]
    NoOverlap,

    #[error("storage backend error: {0}")]
    StorageBackend(String),

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Specialized Result type for segvol operations
pub type Result<T> = std::result::Result<T, SegvolError>;

impl From<bincode::Error> for SegvolError {
    fn from(err: bincode::Error) -> Self {
        SegvolError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SegvolError {
    fn from(err: serde_json::Error) -> Self {
        SegvolError::Serialization(err.to_string())
    }
}
