//! Error types for B-tree parsing and chunk reconstruction.

use core::fmt;

/// Structural errors found while decoding on-disk records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A node or header carried the wrong 4-byte signature.
    InvalidBTreeSignature {
        /// The signature the tree variant requires.
        expected: [u8; 4],
        /// The signature found on disk.
        found: [u8; 4],
    },
    /// A node declared a different node type than the tree variant.
    InvalidBTreeNodeType {
        /// The node type the tree variant requires.
        expected: u8,
        /// The node type found on disk.
        found: u8,
    },
    /// A child node's encoded level disagrees with its position in the tree.
    NodeLevelMismatch {
        /// Level implied by the parent.
        expected: u16,
        /// Level encoded in the node.
        found: u16,
    },
    /// The B-tree v2 header version is not supported.
    InvalidBTreeV2Version(u8),
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// An integer field width outside {1, 2, 4, 8}.
    InvalidFieldWidth(usize),
    /// Chunk shape, dataset shape and key rank disagree.
    RankMismatch {
        /// Rank of the dataset shape.
        data_rank: usize,
        /// Rank of the chunk shape.
        chunk_rank: usize,
        /// Number of coordinates stored in each chunk key.
        key_dims: usize,
    },
    /// The filter pipeline message version is not 1 or 2.
    InvalidFilterPipelineVersion(u8),
    /// An unfiltered chunk's declared size disagrees with its shape.
    ChunkSizeMismatch {
        /// `product(chunk_shape) * item_size`.
        expected: usize,
        /// Size declared in the chunk key.
        declared: usize,
    },
    /// A shape whose element count does not fit in memory.
    ShapeOverflow,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::InvalidBTreeSignature { expected, found } => write!(
                f,
                "invalid B-tree signature: expected {:?}, found {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(found)
            ),
            FormatError::InvalidBTreeNodeType { expected, found } => {
                write!(f, "invalid B-tree node type: expected {expected}, found {found}")
            }
            FormatError::NodeLevelMismatch { expected, found } => {
                write!(f, "node level does not match: expected {expected}, found {found}")
            }
            FormatError::InvalidBTreeV2Version(v) => {
                write!(f, "unsupported B-tree v2 version: {v}")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidFieldWidth(w) => {
                write!(f, "invalid integer field width: {w} (must be 1, 2, 4, or 8)")
            }
            FormatError::RankMismatch {
                data_rank,
                chunk_rank,
                key_dims,
            } => write!(
                f,
                "rank mismatch: dataset rank {data_rank}, chunk rank {chunk_rank}, \
                 {key_dims} coordinates per chunk key"
            ),
            FormatError::InvalidFilterPipelineVersion(v) => {
                write!(f, "invalid filter pipeline version: {v}")
            }
            FormatError::ChunkSizeMismatch { expected, declared } => write!(
                f,
                "chunk size mismatch: shape implies {expected} bytes, key declares {declared}"
            ),
            FormatError::ShapeOverflow => write!(f, "shape element count overflows"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Errors surfaced by tree construction and dataset reconstruction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed on-disk structure.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Datatype that has no element codec.
    #[error("unsupported datatype: {0}")]
    UnsupportedType(String),

    /// Filter id missing from the registry.
    #[error("filter with id {0} not supported")]
    UnsupportedFilter(u16),

    /// A registered filter rejected its input.
    #[error("filter {id} failed: {message}")]
    Filter { id: u16, message: String },

    /// Failure reported by the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
