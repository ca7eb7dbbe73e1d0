//! Chunk payload compression
//!
//! Voxel chunks compress well (segmentation grids are mostly runs of one
//! category id), so the store compresses each chunk payload independently.
//! The method is recorded in the array descriptor and must never change read
//! semantics.

use crate::error::{Result, SegvolError};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Compression methods supported for chunk payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Deflate compression
    Deflate = 1,
    /// Run-length encoding; effective on near-uniform category grids
    Rle = 2,
    /// Zstandard compression
    Zstd = 3,
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Trait for compression/decompression of chunk payloads
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    fn method(&self) -> CompressionMethod;
}

#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| SegvolError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = expected_size.map_or_else(Vec::new, Vec::with_capacity);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| SegvolError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(data, level.value() as i32)
            .map_err(|e| SegvolError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| SegvolError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Byte-wise run-length encoding: (count, value) pairs, runs capped at 255
#[derive(Debug, Default)]
pub struct RleCompressor;

impl Compressor for RleCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            let mut count = 1usize;
            while i + count < data.len() && data[i + count] == byte && count < 255 {
                count += 1;
            }
            compressed.push(count as u8);
            compressed.push(byte);
            i += count;
        }
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        if data.len() % 2 != 0 {
            return Err(SegvolError::Decompression(
                "RLE payload must have even length".to_string(),
            ));
        }
        let mut decompressed = expected_size.map_or_else(Vec::new, Vec::with_capacity);
        for pair in data.chunks_exact(2) {
            decompressed.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Rle
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Deflate => Box::new(DeflateCompressor),
        CompressionMethod::Rle => Box::new(RleCompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(method: CompressionMethod, data: &[u8]) {
        let compressor = get_compressor(method);
        let compressed = compressor.compress(data, CompressionLevel::default()).unwrap();
        let decompressed = compressor.decompress(&compressed, Some(data.len())).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_roundtrip_all_methods() {
        // A near-uniform category grid payload with a few embedded labels.
        let mut payload = vec![0u8; 4096];
        payload[100] = 3;
        payload[2000] = 7;
        for method in [
            CompressionMethod::None,
            CompressionMethod::Deflate,
            CompressionMethod::Rle,
            CompressionMethod::Zstd,
        ] {
            roundtrip(method, &payload);
        }
    }

    #[test]
    fn test_uniform_payload_shrinks() {
        let payload = vec![9u8; 8192];
        for method in [
            CompressionMethod::Deflate,
            CompressionMethod::Rle,
            CompressionMethod::Zstd,
        ] {
            let compressor = get_compressor(method);
            let compressed = compressor
                .compress(&payload, CompressionLevel::default())
                .unwrap();
            assert!(compressed.len() < payload.len());
        }
    }

    #[test]
    fn test_rle_rejects_odd_payload() {
        let compressor = RleCompressor;
        assert!(compressor.decompress(&[1, 2, 3], None).is_err());
    }
}
