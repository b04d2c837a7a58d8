//! Version 1 B-trees: group symbol tables (type 0) and raw data chunks (type 1).

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::btree::{BTree, BTreeNode, NodeHeader, NodeReader};
use crate::error::{FormatError, Result};
use crate::source::ByteSource;
use crate::struct_reader::{schema_size, unpack_struct, Field, FieldKind};

/// Node signature shared by both v1 variants.
pub const BTREE_V1_SIGNATURE: [u8; 4] = *b"TREE";
/// Node type of group symbol-table trees.
pub const NODE_TYPE_GROUP: u8 = 0;
/// Node type of raw-data-chunk trees.
pub const NODE_TYPE_RAW_DATA_CHUNK: u8 = 1;

const B_LINK_NODE: &[Field] = &[
    Field::new("signature", FieldKind::Bytes(4)),
    Field::new("node_type", FieldKind::U8),
    Field::new("node_level", FieldKind::U8),
    Field::new("entries_used", FieldKind::U16),
    Field::new("left_sibling", FieldKind::U64),
    Field::new("right_sibling", FieldKind::U64),
];

const UNDEFINED_ADDRESS: u64 = u64::MAX;

fn defined(address: u64) -> Option<u64> {
    (address != UNDEFINED_ADDRESS).then_some(address)
}

/// Read and validate a v1 node header of the given node type.
async fn read_v1_header<S: ByteSource>(
    source: &S,
    offset: u64,
    node_type: u8,
    level: Option<u16>,
) -> Result<NodeHeader> {
    let raw = source.read_at(offset, schema_size(B_LINK_NODE)).await?;
    let node = unpack_struct(B_LINK_NODE, &raw)?;

    let mut found = [0u8; 4];
    found.copy_from_slice(node.bytes("signature"));
    if found != BTREE_V1_SIGNATURE {
        return Err(FormatError::InvalidBTreeSignature {
            expected: BTREE_V1_SIGNATURE,
            found,
        }
        .into());
    }
    let found_type = node.uint("node_type") as u8;
    if found_type != node_type {
        return Err(FormatError::InvalidBTreeNodeType {
            expected: node_type,
            found: found_type,
        }
        .into());
    }
    let node_level = node.uint("node_level") as u16;
    if let Some(expected) = level {
        if expected != node_level {
            return Err(FormatError::NodeLevelMismatch {
                expected,
                found: node_level,
            }
            .into());
        }
    }

    debug!(offset, node_type, level = node_level, "read v1 B-tree node header");
    Ok(NodeHeader {
        level: node_level,
        entries: node.uint("entries_used") as usize,
        body_offset: offset + raw.len() as u64,
        left_sibling: defined(node.uint("left_sibling")),
        right_sibling: defined(node.uint("right_sibling")),
    })
}

/// Node decoder for group symbol-table trees.
///
/// Body: `key[0], child[0], .., key[n-1], child[n-1], key[n]`, 8 bytes each.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupNodeReader;

impl NodeReader for GroupNodeReader {
    type Key = u64;
    type Address = u64;

    async fn read_node_header<S: ByteSource>(
        &self,
        source: &S,
        address: &u64,
        level: Option<u16>,
    ) -> Result<NodeHeader> {
        read_v1_header(source, *address, NODE_TYPE_GROUP, level).await
    }

    async fn read_node_body<S: ByteSource>(
        &self,
        source: &S,
        header: &NodeHeader,
    ) -> Result<(Vec<u64>, Vec<u64>)> {
        let n = header.entries;
        let body = source.read_at(header.body_offset, n * 16 + 8).await?;
        let mut keys = Vec::with_capacity(n + 1);
        let mut addresses = Vec::with_capacity(n);
        for entry in body[..n * 16].chunks_exact(16) {
            keys.push(LittleEndian::read_u64(&entry[..8]));
            addresses.push(LittleEndian::read_u64(&entry[8..]));
        }
        // N+1 key
        keys.push(LittleEndian::read_u64(&body[n * 16..]));
        Ok((keys, addresses))
    }
}

/// A v1 B-tree indexing a group's symbol-table nodes.
#[derive(Debug, Clone)]
pub struct BTreeV1Groups {
    offset: u64,
    tree: BTree<u64, u64>,
}

impl BTreeV1Groups {
    /// Read the whole tree rooted at `offset`.
    pub async fn new<S: ByteSource>(source: &S, offset: u64) -> Result<Self> {
        let tree = BTree::build(&GroupNodeReader, source, &offset, None).await?;
        Ok(Self { offset, tree })
    }

    /// Address of the root node.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn tree(&self) -> &BTree<u64, u64> {
        &self.tree
    }

    /// Addresses of every symbol-table node, in leaf order.
    pub fn symbol_table_addresses(&self) -> Vec<u64> {
        self.tree
            .leaves()
            .iter()
            .flat_map(|node| node.addresses.iter().copied())
            .collect()
    }
}

/// Key of a raw-data-chunk node entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    /// Stored (possibly filtered) byte length of the chunk.
    pub chunk_size: u32,
    /// Bit `i` set means pipeline filter `i` was skipped for this chunk.
    pub filter_mask: u32,
    /// Chunk origin in dataset space, plus one trailing pseudo-coordinate.
    pub chunk_offset: Vec<u64>,
}

impl ChunkKey {
    /// The chunk origin without the trailing pseudo-coordinate.
    pub fn spatial_offset(&self) -> &[u64] {
        let rank = self.chunk_offset.len().saturating_sub(1);
        &self.chunk_offset[..rank]
    }
}

/// Node decoder for raw-data-chunk trees.
///
/// Body: `dims`-coordinate keys paired 1:1 with addresses.
#[derive(Debug, Clone, Copy)]
pub struct ChunkNodeReader {
    /// Coordinates per key: dataset rank + 1.
    pub dims: usize,
}

impl ChunkNodeReader {
    fn entry_size(&self) -> usize {
        4 + 4 + self.dims * 8 + 8
    }
}

impl NodeReader for ChunkNodeReader {
    type Key = ChunkKey;
    type Address = u64;

    async fn read_node_header<S: ByteSource>(
        &self,
        source: &S,
        address: &u64,
        level: Option<u16>,
    ) -> Result<NodeHeader> {
        read_v1_header(source, *address, NODE_TYPE_RAW_DATA_CHUNK, level).await
    }

    async fn read_node_body<S: ByteSource>(
        &self,
        source: &S,
        header: &NodeHeader,
    ) -> Result<(Vec<ChunkKey>, Vec<u64>)> {
        let entry_size = self.entry_size();
        let body = source
            .read_at(header.body_offset, header.entries * entry_size)
            .await?;
        let mut keys = Vec::with_capacity(header.entries);
        let mut addresses = Vec::with_capacity(header.entries);
        for entry in body.chunks_exact(entry_size) {
            let chunk_size = LittleEndian::read_u32(&entry[0..4]);
            let filter_mask = LittleEndian::read_u32(&entry[4..8]);
            let coords_end = 8 + self.dims * 8;
            let chunk_offset = entry[8..coords_end]
                .chunks_exact(8)
                .map(LittleEndian::read_u64)
                .collect();
            keys.push(ChunkKey {
                chunk_size,
                filter_mask,
                chunk_offset,
            });
            addresses.push(LittleEndian::read_u64(&entry[coords_end..]));
        }
        Ok((keys, addresses))
    }
}

/// A v1 B-tree indexing the chunks of one dataset.
#[derive(Debug, Clone)]
pub struct BTreeV1RawDataChunks {
    offset: u64,
    dims: usize,
    tree: BTree<ChunkKey, u64>,
}

impl BTreeV1RawDataChunks {
    /// Read the whole tree rooted at `offset`; `dims` is dataset rank + 1.
    pub async fn new<S: ByteSource>(source: &S, offset: u64, dims: usize) -> Result<Self> {
        let tree = BTree::build(&ChunkNodeReader { dims }, source, &offset, None).await?;
        Ok(Self { offset, dims, tree })
    }

    /// Address of the root node.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Coordinates per chunk key, including the pseudo-dimension.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn tree(&self) -> &BTree<ChunkKey, u64> {
        &self.tree
    }

    /// Every `(key, chunk address)` pair, in leaf order.
    pub fn chunks(&self) -> impl Iterator<Item = (&ChunkKey, u64)> + '_ {
        self.tree
            .leaves()
            .iter()
            .flat_map(|node: &BTreeNode<ChunkKey, u64>| {
                node.keys.iter().zip(node.addresses.iter().copied())
            })
    }
}
