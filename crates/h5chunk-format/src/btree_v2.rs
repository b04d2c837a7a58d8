//! Version 2 B-trees indexing group links by name hash (type 5) or by
//! creation order (type 6).
//!
//! Internal nodes store child pointers whose record-count fields have
//! per-level byte widths. Those widths are not stored anywhere; they are
//! derived from the header's node and record sizes, see
//! [`calculate_address_formats`].

use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

use crate::btree::{BTree, NodeHeader, NodeReader};
use crate::error::{FormatError, Result};
use crate::source::ByteSource;
use crate::struct_reader::{decode_struct, read_uint, schema_size, unpack_struct, Field, FieldKind};

pub const BTREE_V2_HEADER_SIGNATURE: [u8; 4] = *b"BTHD";
pub const BTREE_V2_INTERNAL_SIGNATURE: [u8; 4] = *b"BTIN";
pub const BTREE_V2_LEAF_SIGNATURE: [u8; 4] = *b"BTLF";

/// Node header (6 bytes) plus trailing checksum (4 bytes).
pub const NODE_OVERHEAD: u64 = 10;

const B_TREE_HEADER: &[Field] = &[
    Field::new("signature", FieldKind::Bytes(4)),
    Field::new("version", FieldKind::U8),
    Field::new("node_type", FieldKind::U8),
    Field::new("node_size", FieldKind::U32),
    Field::new("record_size", FieldKind::U16),
    Field::new("depth", FieldKind::U16),
    Field::new("split_percent", FieldKind::U8),
    Field::new("merge_percent", FieldKind::U8),
    Field::new("root_address", FieldKind::U64),
    Field::new("root_nrecords", FieldKind::U16),
    Field::new("total_nrecords", FieldKind::U64),
];

const B_LINK_NODE: &[Field] = &[
    Field::new("signature", FieldKind::Bytes(4)),
    Field::new("version", FieldKind::U8),
    Field::new("node_type", FieldKind::U8),
];

fn signature(bytes: &[u8]) -> [u8; 4] {
    let mut sig = [0u8; 4];
    sig.copy_from_slice(&bytes[..4]);
    sig
}

/// Parsed B-tree v2 header (signature "BTHD").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    pub node_type: u8,
    /// Node size in bytes.
    pub node_size: u32,
    /// Record size in bytes.
    pub record_size: u16,
    /// Depth of the tree (0 = root is a leaf).
    pub depth: u16,
    pub split_percent: u8,
    pub merge_percent: u8,
    pub root_address: u64,
    pub root_nrecords: u16,
    /// Total number of records in all nodes.
    pub total_nrecords: u64,
}

impl BTreeV2Header {
    /// Read and validate the header at `offset`.
    pub async fn read<S: ByteSource>(source: &S, offset: u64, node_type: u8) -> Result<Self> {
        let h = decode_struct(B_TREE_HEADER, source, offset).await?;
        let found = signature(h.bytes("signature"));
        if found != BTREE_V2_HEADER_SIGNATURE {
            return Err(FormatError::InvalidBTreeSignature {
                expected: BTREE_V2_HEADER_SIGNATURE,
                found,
            }
            .into());
        }
        let version = h.uint("version") as u8;
        if version != 0 {
            return Err(FormatError::InvalidBTreeV2Version(version).into());
        }
        let found_type = h.uint("node_type") as u8;
        if found_type != node_type {
            return Err(FormatError::InvalidBTreeNodeType {
                expected: node_type,
                found: found_type,
            }
            .into());
        }
        Ok(Self {
            node_type: found_type,
            node_size: h.uint("node_size") as u32,
            record_size: h.uint("record_size") as u16,
            depth: h.uint("depth") as u16,
            split_percent: h.uint("split_percent") as u8,
            merge_percent: h.uint("merge_percent") as u8,
            root_address: h.uint("root_address"),
            root_nrecords: h.uint("root_nrecords") as u16,
            total_nrecords: h.uint("total_nrecords"),
        })
    }
}

/// Byte widths of a child pointer's fields at one tree level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressFormat {
    pub offset_size: usize,
    /// Width of the child's record count.
    pub num1_size: usize,
    /// Width of the child subtree's total record count; 0 when absent.
    pub num2_size: usize,
}

impl AddressFormat {
    /// Size of one child pointer.
    pub fn pointer_size(&self) -> usize {
        self.offset_size + self.num1_size + self.num2_size
    }
}

/// Smallest supported integer width (1, 2, 4 or 8 bytes) that holds `value`.
pub fn required_bytes(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    match bits.div_ceil(8) {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

/// Maximum records that fit in one node whose child pointers take `addr_size` bytes.
///
/// `node_size = overhead + n * record_size + (n + 1) * addr_size`, solved for
/// `n` with the `+1` pointer folded into the overhead.
pub fn max_records(node_size: u32, record_size: u16, addr_size: usize) -> u64 {
    let usable = (node_size as u64).saturating_sub(NODE_OVERHEAD + addr_size as u64);
    usable
        .checked_div(record_size as u64 + addr_size as u64)
        .unwrap_or(0)
}

/// Derive the child pointer format of every level `0..=depth`.
pub fn calculate_address_formats(node_size: u32, record_size: u16, depth: u16) -> Vec<AddressFormat> {
    let mut formats = Vec::with_capacity(depth as usize + 1);
    let mut nrecords_max = 0u64;
    let mut ntotalrecords_max = 0u64;
    for level in 0..=depth {
        let format = match level {
            0 => AddressFormat::default(),
            1 => AddressFormat {
                offset_size: 8,
                num1_size: required_bytes(nrecords_max),
                num2_size: 0,
            },
            _ => AddressFormat {
                offset_size: 8,
                num1_size: required_bytes(nrecords_max),
                num2_size: required_bytes(ntotalrecords_max),
            },
        };
        formats.push(format);
        if level < depth {
            nrecords_max = max_records(node_size, record_size, format.pointer_size());
            ntotalrecords_max = if ntotalrecords_max > 0 {
                ntotalrecords_max.saturating_mul(nrecords_max)
            } else {
                nrecords_max
            };
        }
        trace!(level, ?format, nrecords_max, ntotalrecords_max, "derived address format");
    }
    formats
}

/// Locator of a child node as stored in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer {
    pub address: u64,
    /// Records stored directly in the child.
    pub nrecords: u64,
    /// Records stored in the child's whole subtree.
    pub total_records: u64,
}

/// A fixed-size record stored in a v2 B-tree.
pub trait BTreeV2Record: Sized {
    /// Node type this record belongs to.
    const NODE_TYPE: u8;

    fn decode(bytes: &[u8]) -> core::result::Result<Self, FormatError>;
}

/// Heap ID handle of a link stored in a group's fractal heap.
pub type HeapId = [u8; 7];

fn heap_id(bytes: &[u8]) -> HeapId {
    let mut id = [0u8; 7];
    id.copy_from_slice(bytes);
    id
}

fn ensure_len(bytes: &[u8], needed: usize) -> core::result::Result<(), FormatError> {
    if bytes.len() < needed {
        return Err(FormatError::UnexpectedEof {
            expected: needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

/// Type 5 record: link name hash and heap ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupNameRecord {
    pub name_hash: u32,
    pub heap_id: HeapId,
}

impl BTreeV2Record for GroupNameRecord {
    const NODE_TYPE: u8 = 5;

    fn decode(bytes: &[u8]) -> core::result::Result<Self, FormatError> {
        ensure_len(bytes, 11)?;
        Ok(Self {
            name_hash: LittleEndian::read_u32(&bytes[..4]),
            heap_id: heap_id(&bytes[4..11]),
        })
    }
}

/// Type 6 record: link creation order and heap ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOrderRecord {
    pub creation_order: u64,
    pub heap_id: HeapId,
}

impl BTreeV2Record for GroupOrderRecord {
    const NODE_TYPE: u8 = 6;

    fn decode(bytes: &[u8]) -> core::result::Result<Self, FormatError> {
        ensure_len(bytes, 15)?;
        Ok(Self {
            creation_order: LittleEndian::read_u64(&bytes[..8]),
            heap_id: heap_id(&bytes[8..15]),
        })
    }
}

/// Node decoder for one v2 tree.
struct V2NodeReader<'a, R> {
    header: &'a BTreeV2Header,
    formats: &'a [AddressFormat],
    _record: PhantomData<R>,
}

impl<R: BTreeV2Record> NodeReader for V2NodeReader<'_, R> {
    type Key = R;
    type Address = ChildPointer;

    async fn read_node_header<S: ByteSource>(
        &self,
        source: &S,
        address: &ChildPointer,
        level: Option<u16>,
    ) -> Result<NodeHeader> {
        let level = level.unwrap_or(self.header.depth);
        let raw = source
            .read_at(address.address, schema_size(B_LINK_NODE))
            .await?;
        let node = unpack_struct(B_LINK_NODE, &raw)?;

        let expected = if level > 0 {
            BTREE_V2_INTERNAL_SIGNATURE
        } else {
            BTREE_V2_LEAF_SIGNATURE
        };
        let found = signature(node.bytes("signature"));
        if found != expected {
            return Err(FormatError::InvalidBTreeSignature { expected, found }.into());
        }
        let found_type = node.uint("node_type") as u8;
        if found_type != R::NODE_TYPE {
            return Err(FormatError::InvalidBTreeNodeType {
                expected: R::NODE_TYPE,
                found: found_type,
            }
            .into());
        }

        debug!(address = address.address, level, nrecords = address.nrecords, "read v2 B-tree node header");
        Ok(NodeHeader {
            level,
            entries: address.nrecords as usize,
            body_offset: address.address + raw.len() as u64,
            left_sibling: None,
            right_sibling: None,
        })
    }

    async fn read_node_body<S: ByteSource>(
        &self,
        source: &S,
        header: &NodeHeader,
    ) -> Result<(Vec<R>, Vec<ChildPointer>)> {
        let record_size = self.header.record_size as usize;
        let nrecords = header.entries;
        if record_size == 0 && nrecords > 0 {
            return Err(FormatError::InvalidFieldWidth(0).into());
        }
        let format = self
            .formats
            .get(header.level as usize)
            .copied()
            .unwrap_or_default();
        let pointers = if header.level == 0 { 0 } else { nrecords + 1 };

        let body = source
            .read_at(
                header.body_offset,
                nrecords * record_size + pointers * format.pointer_size(),
            )
            .await?;
        let (record_bytes, pointer_bytes) = body.split_at(nrecords * record_size);

        let keys = record_bytes
            .chunks_exact(record_size.max(1))
            .map(R::decode)
            .collect::<core::result::Result<Vec<_>, _>>()?;

        let mut addresses = Vec::with_capacity(pointers);
        for raw in pointer_bytes.chunks_exact(format.pointer_size().max(1)) {
            let address = read_uint(raw, format.offset_size)?;
            let mut pos = format.offset_size;
            let nrecords = read_uint(&raw[pos..], format.num1_size)?;
            pos += format.num1_size;
            // A twig's children are leaves: subtree total == direct count.
            let total_records = if format.num2_size > 0 {
                read_uint(&raw[pos..], format.num2_size)?
            } else {
                nrecords
            };
            addresses.push(ChildPointer {
                address,
                nrecords,
                total_records,
            });
        }
        Ok((keys, addresses))
    }
}

/// A materialized v2 B-tree of records `R`.
#[derive(Debug, Clone)]
pub struct BTreeV2<R> {
    offset: u64,
    header: BTreeV2Header,
    address_formats: Vec<AddressFormat>,
    tree: BTree<R, ChildPointer>,
}

/// Links indexed by name hash.
pub type BTreeV2GroupNames = BTreeV2<GroupNameRecord>;
/// Links indexed by creation order.
pub type BTreeV2GroupOrders = BTreeV2<GroupOrderRecord>;

impl<R: BTreeV2Record> BTreeV2<R> {
    /// Read the header at `offset` and every node of the tree.
    pub async fn new<S: ByteSource>(source: &S, offset: u64) -> Result<Self> {
        let header = BTreeV2Header::read(source, offset, R::NODE_TYPE).await?;
        let address_formats =
            calculate_address_formats(header.node_size, header.record_size, header.depth);

        let tree = if header.total_nrecords == 0 {
            debug!(offset, "v2 B-tree is empty");
            BTree::empty(header.depth)
        } else {
            let reader = V2NodeReader::<R> {
                header: &header,
                formats: &address_formats,
                _record: PhantomData,
            };
            let root = ChildPointer {
                address: header.root_address,
                nrecords: header.root_nrecords as u64,
                total_records: header.total_nrecords,
            };
            BTree::build(&reader, source, &root, Some(header.depth)).await?
        };

        Ok(Self {
            offset,
            header,
            address_formats,
            tree,
        })
    }
}

impl<R> BTreeV2<R> {
    /// Address of the tree header.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn header(&self) -> &BTreeV2Header {
        &self.header
    }

    /// Child pointer format per level, index = level.
    pub fn address_formats(&self) -> &[AddressFormat] {
        &self.address_formats
    }

    pub fn tree(&self) -> &BTree<R, ChildPointer> {
        &self.tree
    }

    /// Every record of every node, root level first.
    pub fn iter_records(&self) -> impl Iterator<Item = &R> + '_ {
        self.tree.iter_nodes().flat_map(|node| node.keys.iter())
    }
}
