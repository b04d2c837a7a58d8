//! Per-element decoding of chunk bytes.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::datatype::{Datatype, DatatypeByteOrder};
use crate::error::{Error, FormatError, Result};

/// Size of a variable-length heap handle.
pub const VLEN_HANDLE_SIZE: usize = 16;

/// Reference to a variable-length payload in a global heap collection.
///
/// The payload itself is resolved by the object layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlenHandle {
    /// Number of base elements (or bytes, for strings).
    pub length: u32,
    pub collection_address: u64,
    pub object_index: u32,
}

/// One decoded dataset element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    /// Bytes of a fixed-length string, up to the first NUL.
    Bytes(Vec<u8>),
    /// Object address held by an 8-byte reference.
    Reference(u64),
    Vlen(VlenHandle),
}

impl Value {
    /// The value as `u64`, for integer-like variants.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Unsigned(v) | Value::Reference(v) => Some(v),
            Value::Signed(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// The value as `f64`, for numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Unsigned(v) => Some(v as f64),
            Value::Signed(v) => Some(v as f64),
            Value::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// Decoder for one element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementCodec {
    Unsigned {
        size: usize,
        byte_order: DatatypeByteOrder,
    },
    Signed {
        size: usize,
        byte_order: DatatypeByteOrder,
    },
    Float {
        size: usize,
        byte_order: DatatypeByteOrder,
    },
    FixedString {
        size: usize,
    },
    /// 8-byte little-endian object reference.
    Reference,
    /// 16-byte variable-length handle.
    VlenHandle,
}

impl ElementCodec {
    /// Resolve the codec for elements of `dtype`.
    pub fn for_datatype(dtype: &Datatype) -> Result<Self> {
        match dtype {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
            } => {
                let size = *size as usize;
                if !(1..=8).contains(&size) {
                    return Err(unsupported(dtype));
                }
                let byte_order = *byte_order;
                Ok(if *signed {
                    ElementCodec::Signed { size, byte_order }
                } else {
                    ElementCodec::Unsigned { size, byte_order }
                })
            }
            Datatype::FloatingPoint { size, byte_order } => match *size {
                4 | 8 => Ok(ElementCodec::Float {
                    size: *size as usize,
                    byte_order: *byte_order,
                }),
                _ => Err(unsupported(dtype)),
            },
            Datatype::String { size } => Ok(ElementCodec::FixedString {
                size: *size as usize,
            }),
            Datatype::Enumeration { base } => Self::for_datatype(base),
            Datatype::Reference { size: 8 } => Ok(ElementCodec::Reference),
            Datatype::Reference { .. } => Err(unsupported(dtype)),
            Datatype::VariableLength { .. } => Ok(ElementCodec::VlenHandle),
            Datatype::Compound { .. } | Datatype::Opaque { .. } | Datatype::Array { .. } => {
                Err(unsupported(dtype))
            }
        }
    }

    /// Bytes per stored element.
    pub fn item_size(&self) -> usize {
        match *self {
            ElementCodec::Unsigned { size, .. }
            | ElementCodec::Signed { size, .. }
            | ElementCodec::Float { size, .. }
            | ElementCodec::FixedString { size } => size,
            ElementCodec::Reference => 8,
            ElementCodec::VlenHandle => VLEN_HANDLE_SIZE,
        }
    }

    /// Decode the element starting at byte `offset` of `data`.
    pub fn decode(&self, data: &[u8], offset: usize) -> core::result::Result<Value, FormatError> {
        let size = self.item_size();
        let bytes = data
            .get(offset..offset.saturating_add(size))
            .ok_or(FormatError::UnexpectedEof {
                expected: offset.saturating_add(size),
                available: data.len(),
            })?;
        Ok(match *self {
            ElementCodec::Unsigned { size, byte_order } => Value::Unsigned(match byte_order {
                DatatypeByteOrder::LittleEndian => LittleEndian::read_uint(bytes, size),
                DatatypeByteOrder::BigEndian => BigEndian::read_uint(bytes, size),
            }),
            ElementCodec::Signed { size, byte_order } => Value::Signed(match byte_order {
                DatatypeByteOrder::LittleEndian => LittleEndian::read_int(bytes, size),
                DatatypeByteOrder::BigEndian => BigEndian::read_int(bytes, size),
            }),
            ElementCodec::Float { size: 4, byte_order } => {
                let v = match byte_order {
                    DatatypeByteOrder::LittleEndian => LittleEndian::read_f32(bytes),
                    DatatypeByteOrder::BigEndian => BigEndian::read_f32(bytes),
                };
                Value::Float(v as f64)
            }
            ElementCodec::Float { byte_order, .. } => Value::Float(match byte_order {
                DatatypeByteOrder::LittleEndian => LittleEndian::read_f64(bytes),
                DatatypeByteOrder::BigEndian => BigEndian::read_f64(bytes),
            }),
            ElementCodec::FixedString { .. } => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Bytes(bytes[..end].to_vec())
            }
            ElementCodec::Reference => Value::Reference(LittleEndian::read_u64(bytes)),
            ElementCodec::VlenHandle => Value::Vlen(VlenHandle {
                length: LittleEndian::read_u32(&bytes[0..4]),
                collection_address: LittleEndian::read_u64(&bytes[4..12]),
                object_index: LittleEndian::read_u32(&bytes[12..16]),
            }),
        })
    }
}

fn unsupported(dtype: &Datatype) -> Error {
    Error::UnsupportedType(format!("{} of size {}", dtype.class_name(), dtype.size()))
}
