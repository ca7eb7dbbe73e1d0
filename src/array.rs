//! Dtype-erased dense 3D arrays and their raw byte form
//!
//! Payloads cross the storage boundary as little-endian voxel bytes plus a
//! small header, so the writer and any reader agree on layout regardless of
//! host endianness.

use crate::error::{Result, SegvolError};
use crate::types::{DataType, DescriptiveStats};
use ndarray::{s, Array3};

/// Fixed-point/float voxel element that can cross the byte boundary
trait Element: Copy {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
    fn as_f64(self) -> f64;
}

macro_rules! impl_element {
    ($t:ty, $size:expr) => {
        impl Element for $t {
            const SIZE: usize = $size;
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
            fn as_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_element!(u8, 1);
impl_element!(u16, 2);
impl_element!(u32, 4);
impl_element!(f32, 4);
impl_element!(f64, 8);

fn typed_to_bytes<T: Element>(arr: &Array3<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(arr.len() * T::SIZE);
    // Standard (C) iteration order matches the on-disk contract.
    for &v in arr.iter() {
        v.write_le(&mut out);
    }
    out
}

fn bytes_to_typed<T: Element>(shape: [usize; 3], bytes: &[u8]) -> Result<Array3<T>> {
    let expected = shape.iter().product::<usize>() * T::SIZE;
    if bytes.len() != expected {
        return Err(SegvolError::InvalidDimensions(format!(
            "payload of {} bytes does not match shape {:?} ({} bytes expected)",
            bytes.len(),
            shape,
            expected
        )));
    }
    let data: Vec<T> = bytes.chunks_exact(T::SIZE).map(T::read_le).collect();
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)
        .map_err(|e| SegvolError::InvalidDimensions(e.to_string()))
}

fn stats_of<T: Element>(arr: &Array3<T>) -> DescriptiveStats {
    let n = arr.len() as f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &v in arr.iter() {
        let v = v.as_f64();
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    DescriptiveStats {
        mean,
        min,
        max,
        std: variance.sqrt(),
    }
}

/// Dense 3D array with its dtype carried at runtime.
///
/// The dtype of a channel is decided at ingestion and kept across every
/// resolution level, so readers can rely on a constant element size.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeArray {
    U8(Array3<u8>),
    U16(Array3<u16>),
    U32(Array3<u32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

impl VolumeArray {
    /// Allocate a zero-filled array of the given dtype and shape
    pub fn zeros(dtype: DataType, shape: [usize; 3]) -> Self {
        let dim = (shape[0], shape[1], shape[2]);
        match dtype {
            DataType::U8 => VolumeArray::U8(Array3::zeros(dim)),
            DataType::U16 => VolumeArray::U16(Array3::zeros(dim)),
            DataType::U32 => VolumeArray::U32(Array3::zeros(dim)),
            DataType::F32 => VolumeArray::F32(Array3::zeros(dim)),
            DataType::F64 => VolumeArray::F64(Array3::zeros(dim)),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            VolumeArray::U8(_) => DataType::U8,
            VolumeArray::U16(_) => DataType::U16,
            VolumeArray::U32(_) => DataType::U32,
            VolumeArray::F32(_) => DataType::F32,
            VolumeArray::F64(_) => DataType::F64,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let d = match self {
            VolumeArray::U8(a) => a.dim(),
            VolumeArray::U16(a) => a.dim(),
            VolumeArray::U32(a) => a.dim(),
            VolumeArray::F32(a) => a.dim(),
            VolumeArray::F64(a) => a.dim(),
        };
        [d.0, d.1, d.2]
    }

    pub fn voxel_count(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.voxel_count() * self.dtype().size_in_bytes()
    }

    /// Serialize the voxels as little-endian bytes in standard order
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            VolumeArray::U8(a) => typed_to_bytes(a),
            VolumeArray::U16(a) => typed_to_bytes(a),
            VolumeArray::U32(a) => typed_to_bytes(a),
            VolumeArray::F32(a) => typed_to_bytes(a),
            VolumeArray::F64(a) => typed_to_bytes(a),
        }
    }

    /// Rebuild an array from its dtype, shape and little-endian payload
    pub fn from_le_bytes(dtype: DataType, shape: [usize; 3], bytes: &[u8]) -> Result<Self> {
        Ok(match dtype {
            DataType::U8 => VolumeArray::U8(bytes_to_typed(shape, bytes)?),
            DataType::U16 => VolumeArray::U16(bytes_to_typed(shape, bytes)?),
            DataType::U32 => VolumeArray::U32(bytes_to_typed(shape, bytes)?),
            DataType::F32 => VolumeArray::F32(bytes_to_typed(shape, bytes)?),
            DataType::F64 => VolumeArray::F64(bytes_to_typed(shape, bytes)?),
        })
    }

    /// Descriptive statistics over every voxel
    pub fn statistics(&self) -> DescriptiveStats {
        match self {
            VolumeArray::U8(a) => stats_of(a),
            VolumeArray::U16(a) => stats_of(a),
            VolumeArray::U32(a) => stats_of(a),
            VolumeArray::F32(a) => stats_of(a),
            VolumeArray::F64(a) => stats_of(a),
        }
    }

    /// Copy of the inclusive sub-box `[bottom_left, top_right]`
    pub fn extract(&self, bottom_left: [usize; 3], top_right: [usize; 3]) -> Result<VolumeArray> {
        let shape = self.shape();
        for a in 0..3 {
            if bottom_left[a] > top_right[a] || top_right[a] >= shape[a] {
                return Err(SegvolError::OutOfBounds(format!(
                    "box [{:?}, {:?}] outside array of shape {:?}",
                    bottom_left, top_right, shape
                )));
            }
        }
        let sl = s![
            bottom_left[0]..=top_right[0],
            bottom_left[1]..=top_right[1],
            bottom_left[2]..=top_right[2]
        ];
        Ok(match self {
            VolumeArray::U8(a) => VolumeArray::U8(a.slice(sl).to_owned()),
            VolumeArray::U16(a) => VolumeArray::U16(a.slice(sl).to_owned()),
            VolumeArray::U32(a) => VolumeArray::U32(a.slice(sl).to_owned()),
            VolumeArray::F32(a) => VolumeArray::F32(a.slice(sl).to_owned()),
            VolumeArray::F64(a) => VolumeArray::F64(a.slice(sl).to_owned()),
        })
    }

    /// Write `src` (starting at `src_offset`, extent `shape`) into this array
    /// at `dst_offset`. Both arrays must share a dtype.
    pub fn assign_region(
        &mut self,
        dst_offset: [usize; 3],
        src: &VolumeArray,
        src_offset: [usize; 3],
        shape: [usize; 3],
    ) -> Result<()> {
        let dst_sl = s![
            dst_offset[0]..dst_offset[0] + shape[0],
            dst_offset[1]..dst_offset[1] + shape[1],
            dst_offset[2]..dst_offset[2] + shape[2]
        ];
        let src_sl = s![
            src_offset[0]..src_offset[0] + shape[0],
            src_offset[1]..src_offset[1] + shape[1],
            src_offset[2]..src_offset[2] + shape[2]
        ];
        match (self, src) {
            (VolumeArray::U8(d), VolumeArray::U8(s)) => d.slice_mut(dst_sl).assign(&s.slice(src_sl)),
            (VolumeArray::U16(d), VolumeArray::U16(s)) => d.slice_mut(dst_sl).assign(&s.slice(src_sl)),
            (VolumeArray::U32(d), VolumeArray::U32(s)) => d.slice_mut(dst_sl).assign(&s.slice(src_sl)),
            (VolumeArray::F32(d), VolumeArray::F32(s)) => d.slice_mut(dst_sl).assign(&s.slice(src_sl)),
            (VolumeArray::F64(d), VolumeArray::F64(s)) => d.slice_mut(dst_sl).assign(&s.slice(src_sl)),
            (d, s) => {
                return Err(SegvolError::InvalidDimensions(format!(
                    "dtype mismatch: {} vs {}",
                    d.dtype(),
                    s.dtype()
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_bytes_roundtrip() {
        let arr = Array3::from_shape_fn((3, 4, 5), |(i, j, k)| (i * 20 + j * 5 + k) as f32);
        let va = VolumeArray::F32(arr);
        let bytes = va.to_le_bytes();
        assert_eq!(bytes.len(), 3 * 4 * 5 * 4);
        let back = VolumeArray::from_le_bytes(DataType::F32, [3, 4, 5], &bytes).unwrap();
        assert_eq!(va, back);
    }

    #[test]
    fn test_bytes_length_mismatch() {
        let err = VolumeArray::from_le_bytes(DataType::U16, [2, 2, 2], &[0u8; 15]);
        assert!(matches!(err, Err(SegvolError::InvalidDimensions(_))));
    }

    #[test]
    fn test_statistics_constant() {
        let va = VolumeArray::U8(Array3::from_elem((4, 4, 4), 7u8));
        let stats = va.statistics();
        assert_eq!(stats.mean, 7.0);
        assert_eq!(stats.min, 7.0);
        assert_eq!(stats.max, 7.0);
        assert_eq!(stats.std, 0.0);
    }

    #[test]
    fn test_extract_and_assign() {
        let arr = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i * 16 + j * 4 + k) as u32);
        let va = VolumeArray::U32(arr);
        let sub = va.extract([1, 1, 1], [2, 3, 3]).unwrap();
        assert_eq!(sub.shape(), [2, 3, 3]);

        let mut dst = VolumeArray::zeros(DataType::U32, [4, 4, 4]);
        dst.assign_region([0, 0, 0], &sub, [0, 0, 0], [2, 3, 3]).unwrap();
        let back = dst.extract([0, 0, 0], [1, 2, 2]).unwrap();
        assert_eq!(back, sub);
    }

    #[test]
    fn test_extract_out_of_bounds() {
        let va = VolumeArray::zeros(DataType::U8, [4, 4, 4]);
        assert!(va.extract([0, 0, 0], [4, 3, 3]).is_err());
        assert!(va.extract([2, 0, 0], [1, 3, 3]).is_err());
    }

    #[test]
    fn test_assign_dtype_mismatch() {
        let mut dst = VolumeArray::zeros(DataType::U8, [2, 2, 2]);
        let src = VolumeArray::zeros(DataType::F32, [2, 2, 2]);
        assert!(dst.assign_region([0, 0, 0], &src, [0, 0, 0], [2, 2, 2]).is_err());
    }
}
