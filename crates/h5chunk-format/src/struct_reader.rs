//! Fixed-layout record decoding.
//!
//! On-disk headers are described as ordered field schemas and decoded in one
//! read from a [`ByteSource`]. All integers are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::source::ByteSource;

/// Encoding of a single schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `B`: 1-byte unsigned.
    U8,
    /// `H`: 2-byte unsigned.
    U16,
    /// `I`: 4-byte unsigned.
    U32,
    /// `Q`: 8-byte unsigned.
    U64,
    /// `Ns`: fixed-length byte string.
    Bytes(usize),
}

impl FieldKind {
    /// Width of the field in bytes.
    pub const fn size(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::U32 => 4,
            FieldKind::U64 => 8,
            FieldKind::Bytes(n) => n,
        }
    }
}

/// A named field in a record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Total byte size of a schema.
pub fn schema_size(schema: &[Field]) -> usize {
    schema.iter().map(|f| f.kind.size()).sum()
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Uint(u64),
    Bytes(Vec<u8>),
}

/// A decoded record: field values in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Record {
    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Integer field by name. Missing or non-integer fields read as 0.
    pub fn uint(&self, name: &str) -> u64 {
        match self.get(name) {
            Some(FieldValue::Uint(v)) => *v,
            _ => 0,
        }
    }

    /// Byte-string field by name. Missing or integer fields read as empty.
    pub fn bytes(&self, name: &str) -> &[u8] {
        match self.get(name) {
            Some(FieldValue::Bytes(b)) => b,
            _ => &[],
        }
    }
}

/// Decode `schema` from the front of `data`.
pub fn unpack_struct(schema: &[Field], data: &[u8]) -> core::result::Result<Record, FormatError> {
    let size = schema_size(schema);
    if data.len() < size {
        return Err(FormatError::UnexpectedEof {
            expected: size,
            available: data.len(),
        });
    }
    let mut pos = 0;
    let mut fields = Vec::with_capacity(schema.len());
    for field in schema {
        let width = field.kind.size();
        let slice = &data[pos..pos + width];
        let value = match field.kind {
            FieldKind::Bytes(_) => FieldValue::Bytes(slice.to_vec()),
            _ => FieldValue::Uint(read_uint(slice, width)?),
        };
        fields.push((field.name, value));
        pos += width;
    }
    Ok(Record { fields })
}

/// Read and decode `schema` at `offset`.
pub async fn decode_struct<S: ByteSource>(
    schema: &[Field],
    source: &S,
    offset: u64,
) -> Result<Record> {
    let data = source.read_at(offset, schema_size(schema)).await?;
    Ok(unpack_struct(schema, &data)?)
}

/// Read a little-endian unsigned integer of width 1, 2, 4 or 8.
pub fn read_uint(data: &[u8], width: usize) -> core::result::Result<u64, FormatError> {
    if data.len() < width {
        return Err(FormatError::UnexpectedEof {
            expected: width,
            available: data.len(),
        });
    }
    Ok(match width {
        1 => data[0] as u64,
        2 => LittleEndian::read_u16(data) as u64,
        4 => LittleEndian::read_u32(data) as u64,
        8 => LittleEndian::read_u64(data),
        _ => return Err(FormatError::InvalidFieldWidth(width)),
    })
}
