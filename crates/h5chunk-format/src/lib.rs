//! B-tree traversal and chunked dataset reconstruction for HDF5-style
//! containers.
//!
//! Version 1 B-trees index group symbol tables and dataset chunks; version 2
//! B-trees index group links by name hash or creation order. Every read goes
//! through an async [`ByteSource`], so the same code serves local files,
//! memory maps and ranged network reads.

pub mod btree;
pub mod btree_v1;
pub mod btree_v2;
pub mod chunked_read;
pub mod codec;
pub mod datatype;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod nested;
pub mod source;
pub mod struct_reader;

pub use btree::{BTree, BTreeNode, NodeHeader, NodeReader};
pub use btree_v1::{BTreeV1Groups, BTreeV1RawDataChunks, ChunkKey};
pub use btree_v2::{
    AddressFormat, BTreeV2, BTreeV2GroupNames, BTreeV2GroupOrders, BTreeV2Header, ChildPointer,
    GroupNameRecord, GroupOrderRecord,
};
pub use chunked_read::{read_chunked_dataset, ReadOptions};
pub use codec::{ElementCodec, Value, VlenHandle};
pub use datatype::{Datatype, DatatypeByteOrder};
pub use error::{Error, FormatError, Result};
pub use filter_pipeline::{FilterDescription, FilterPipeline};
pub use filters::{FilterFn, FilterRegistry};
pub use nested::{to_nested, Nested};
pub use source::{ByteSource, MemorySource};
