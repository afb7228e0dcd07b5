//! Bit-precise field extraction and the additive datagram checksum.
//!
//! All multi-byte encodings are little-endian. For `U1` fields bit 0 is the
//! most significant bit of the addressed byte.

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported data type: {0}")]
    UnsupportedType(String),

    #[error("field at byte {byte_offset} bit {bit_offset} does not fit a {len} byte buffer")]
    BufferUnderrun {
        byte_offset: usize,
        bit_offset: u32,
        len: usize,
    },
}

/// The closed set of primitive field encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    U1,
    U8,
    U16,
    S16,
    U32,
    S32,
    F32,
    U64,
    S64,
    F64,
}

impl FieldType {
    pub fn bit_width(self) -> u32 {
        match self {
            FieldType::U1 => 1,
            FieldType::U8 => 8,
            FieldType::U16 | FieldType::S16 => 16,
            FieldType::U32 | FieldType::S32 | FieldType::F32 => 32,
            FieldType::U64 | FieldType::S64 | FieldType::F64 => 64,
        }
    }

    /// Bytes occupied in the datagram, counting a lone bit as a full byte.
    pub fn byte_width(self) -> usize {
        ((self.bit_width() + 7) / 8) as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::U1 => "U1",
            FieldType::U8 => "U8",
            FieldType::U16 => "U16",
            FieldType::S16 => "S16",
            FieldType::U32 => "U32",
            FieldType::S32 => "S32",
            FieldType::F32 => "F32",
            FieldType::U64 => "U64",
            FieldType::S64 => "S64",
            FieldType::F64 => "F64",
        }
    }
}

impl FromStr for FieldType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "U1" => Ok(FieldType::U1),
            "U8" => Ok(FieldType::U8),
            "U16" => Ok(FieldType::U16),
            "S16" => Ok(FieldType::S16),
            "U32" => Ok(FieldType::U32),
            "S32" => Ok(FieldType::S32),
            "F32" => Ok(FieldType::F32),
            "U64" => Ok(FieldType::U64),
            "S64" => Ok(FieldType::S64),
            "F64" => Ok(FieldType::F64),
            other => Err(CodecError::UnsupportedType(other.to_string())),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn take<const N: usize>(
    buf: &[u8],
    byte_offset: usize,
    bit_offset: u32,
) -> Result<[u8; N], CodecError> {
    buf.get(byte_offset..byte_offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(CodecError::BufferUnderrun {
            byte_offset,
            bit_offset,
            len: buf.len(),
        })
}

/// Decode one field from `buf` and widen it to `f64`.
pub fn decode_field(
    buf: &[u8],
    byte_offset: usize,
    bit_offset: u32,
    ty: FieldType,
) -> Result<f64, CodecError> {
    let underrun = || CodecError::BufferUnderrun {
        byte_offset,
        bit_offset,
        len: buf.len(),
    };
    match ty {
        FieldType::U1 => {
            if bit_offset >= 8 {
                return Err(underrun());
            }
            let byte = *buf.get(byte_offset).ok_or_else(underrun)?;
            // bit 0 is the most significant bit of the byte
            let shift = 8 - (1 + bit_offset);
            Ok(((byte >> shift) & 1) as f64)
        }
        FieldType::U8 => Ok(take::<1>(buf, byte_offset, bit_offset)?[0] as f64),
        FieldType::U16 => Ok(u16::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::S16 => Ok(i16::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::U32 => Ok(u32::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::S32 => Ok(i32::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::F32 => Ok(f32::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::U64 => Ok(u64::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::S64 => Ok(i64::from_le_bytes(take(buf, byte_offset, bit_offset)?) as f64),
        FieldType::F64 => Ok(f64::from_le_bytes(take(buf, byte_offset, bit_offset)?)),
    }
}

/// Sum of all bytes in `buf`, modulo 65536.
pub fn checksum16(buf: &[u8]) -> u16 {
    buf.iter().fold(0u16, |sum, b| sum.wrapping_add(*b as u16))
}

/// Verify the additive checksum carried in the trailing two bytes
/// (little-endian) against the rest of the buffer.
pub fn verify_checksum(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let body = &buf[..buf.len() - 2];
    let expected = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
    checksum16(body) == expected
}
