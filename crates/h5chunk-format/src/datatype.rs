//! Element datatypes of chunked datasets.
//!
//! Only the fields reconstruction needs are carried; the full datatype
//! message is decoded by the object layer.

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatatypeByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Element datatype of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Integer types.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
    },
    /// IEEE floats.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
    },
    /// Fixed-length string.
    String { size: u32 },
    /// Enumeration, stored as its base integer type.
    Enumeration { base: Box<Datatype> },
    /// Object or region reference.
    Reference { size: u32 },
    /// Variable-length string or sequence, stored as a heap handle.
    VariableLength { is_string: bool },
    Compound { size: u32 },
    Opaque { size: u32 },
    Array {
        base: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

impl Datatype {
    /// Size in bytes of one stored element.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size }
            | Datatype::Reference { size }
            | Datatype::Compound { size }
            | Datatype::Opaque { size } => *size,
            Datatype::Enumeration { base } => base.size(),
            Datatype::VariableLength { .. } => 16,
            Datatype::Array { base, dimensions } => dimensions
                .iter()
                .fold(base.size(), |acc, &d| acc.saturating_mul(d)),
        }
    }

    /// Short class name used in diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "fixed-point",
            Datatype::FloatingPoint { .. } => "floating-point",
            Datatype::String { .. } => "string",
            Datatype::Enumeration { .. } => "enumeration",
            Datatype::Reference { .. } => "reference",
            Datatype::VariableLength { is_string: true } => "variable-length string",
            Datatype::VariableLength { is_string: false } => "variable-length sequence",
            Datatype::Compound { .. } => "compound",
            Datatype::Opaque { .. } => "opaque",
            Datatype::Array { .. } => "array",
        }
    }

    /// Unsigned little-endian integer of `size` bytes.
    pub fn uint(size: u32) -> Self {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed: false,
        }
    }

    /// Signed little-endian integer of `size` bytes.
    pub fn int(size: u32) -> Self {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed: true,
        }
    }

    /// Little-endian float of `size` bytes.
    pub fn float(size: u32) -> Self {
        Datatype::FloatingPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
        }
    }
}
