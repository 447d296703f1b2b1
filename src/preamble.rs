//! ## PipelineDB HLL preamble
//! Fixed 20 bytes written in front of every payload, mirroring the padded in-memory struct of
//! PipelineDB's HLL (0.8.x, x86_64) field by field:
//!
//! | Bytes  | Field          | Description                                          |
//! |--------|----------------|------------------------------------------------------|
//! | 0      | encoding       | Encoding tag, see [`Encoding`]                       |
//! | 1..4   | padding        | Zero filled                                          |
//! | 4..12  | cardinality    | Cached cardinality, `u64` little endian              |
//! | 12     | precision      | HyperLogLog precision `p`                            |
//! | 13..16 | padding        | Zero filled                                          |
//! | 16..20 | payload length | Number of payload bytes following, `u32` little endian |

use bytes::BufMut;

/// Preamble length in bytes
pub const PREAMBLE_LEN: usize = 20;

/// PipelineDB HLL encoding tags.
///
/// Dirty variants ask PipelineDB to recompute the cardinality on first read,
/// clean variants declare the embedded cardinality authoritative.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encoding {
    DenseDirty = b'd',
    DenseClean = b'D',
    ExplicitDirty = b'e',
    ExplicitClean = b'E',
    SparseDirty = b's',
    SparseClean = b'S',
}

impl Encoding {
    /// Dense encoding tag
    #[inline]
    pub fn dense(dirty: bool) -> Self {
        if dirty {
            Encoding::DenseDirty
        } else {
            Encoding::DenseClean
        }
    }

    /// Explicit encoding tag
    #[inline]
    pub fn explicit(dirty: bool) -> Self {
        if dirty {
            Encoding::ExplicitDirty
        } else {
            Encoding::ExplicitClean
        }
    }

    #[inline]
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            Encoding::DenseDirty | Encoding::ExplicitDirty | Encoding::SparseDirty
        )
    }

    #[inline]
    pub fn is_dense(self) -> bool {
        matches!(self, Encoding::DenseDirty | Encoding::DenseClean)
    }

    #[inline]
    pub fn is_explicit(self) -> bool {
        matches!(self, Encoding::ExplicitDirty | Encoding::ExplicitClean)
    }

    /// Tag byte written into the preamble
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Encoding {
    type Error = u8;

    /// Recognize encoding tag, returning the unknown byte as error
    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            b'd' => Ok(Encoding::DenseDirty),
            b'D' => Ok(Encoding::DenseClean),
            b'e' => Ok(Encoding::ExplicitDirty),
            b'E' => Ok(Encoding::ExplicitClean),
            b's' => Ok(Encoding::SparseDirty),
            b'S' => Ok(Encoding::SparseClean),
            _ => Err(tag),
        }
    }
}

/// Size-invariant part of PipelineDB HLL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub encoding: Encoding,
    pub cardinality: u64,
    pub precision: u8,
    pub payload_len: u32,
}

impl Preamble {
    /// Write preamble fields with their padding into `buf`
    #[inline]
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.encoding.as_byte());
        buf.put_bytes(0, 3);
        buf.put_u64_le(self.cardinality);
        buf.put_u8(self.precision);
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.payload_len);
    }

    /// Return preamble bytes
    pub fn to_bytes(&self) -> [u8; PREAMBLE_LEN] {
        let mut out = [0u8; PREAMBLE_LEN];
        let mut buf = &mut out[..];
        self.write_to(&mut buf);
        out
    }
}
