//! Generic B-tree materialization.
//!
//! Each tree variant implements [`NodeReader`]; [`BTree::build`] drives it
//! level by level from the root down to the leaves and freezes the result.

use tracing::debug;

use crate::error::Result;
use crate::source::ByteSource;

/// Fixed leading fields of a node, decoded by a variant's header reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    /// Node level: 0 = leaf.
    pub level: u16,
    /// Number of entries (v1) or records (v2) in the node body.
    pub entries: usize,
    /// File offset of the first byte after the header.
    pub body_offset: u64,
    /// Left sibling address (v1 only), `None` if undefined.
    pub left_sibling: Option<u64>,
    /// Right sibling address (v1 only), `None` if undefined.
    pub right_sibling: Option<u64>,
}

/// One on-disk node.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeNode<K, A> {
    pub level: u16,
    pub keys: Vec<K>,
    pub addresses: Vec<A>,
    pub left_sibling: Option<u64>,
    pub right_sibling: Option<u64>,
}

/// Per-variant node decoding.
#[allow(async_fn_in_trait)]
pub trait NodeReader {
    /// Key record stored in this variant's nodes.
    type Key;
    /// Child pointer (internal nodes) or payload locator (leaves).
    type Address: Clone;

    /// Decode and validate the node header at `address`.
    ///
    /// `level` is the level implied by the parent, or `None` for a root whose
    /// level is read from disk.
    async fn read_node_header<S: ByteSource>(
        &self,
        source: &S,
        address: &Self::Address,
        level: Option<u16>,
    ) -> Result<NodeHeader>;

    /// Decode the keys and addresses following `header`.
    async fn read_node_body<S: ByteSource>(
        &self,
        source: &S,
        header: &NodeHeader,
    ) -> Result<(Vec<Self::Key>, Vec<Self::Address>)>;

    async fn read_node<S: ByteSource>(
        &self,
        source: &S,
        address: &Self::Address,
        level: Option<u16>,
    ) -> Result<BTreeNode<Self::Key, Self::Address>> {
        let header = self.read_node_header(source, address, level).await?;
        let (keys, addresses) = self.read_node_body(source, &header).await?;
        Ok(BTreeNode {
            level: header.level,
            keys,
            addresses,
            left_sibling: header.left_sibling,
            right_sibling: header.right_sibling,
        })
    }
}

/// A fully materialized, immutable B-tree.
///
/// `nodes(level)` lists nodes parent-major: every child of the first node at
/// `level + 1` in address order, then every child of the second, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct BTree<K, A> {
    depth: u16,
    levels: Vec<Vec<BTreeNode<K, A>>>,
}

impl<K, A: Clone> BTree<K, A> {
    /// Read every node reachable from `root`.
    pub async fn build<R, S>(
        reader: &R,
        source: &S,
        root: &A,
        root_level: Option<u16>,
    ) -> Result<Self>
    where
        R: NodeReader<Key = K, Address = A>,
        S: ByteSource,
    {
        let root_node = reader.read_node(source, root, root_level).await?;
        let depth = root_node.level;
        debug!(depth, "read B-tree root node");

        let mut levels: Vec<Vec<BTreeNode<K, A>>> = (0..=depth).map(|_| Vec::new()).collect();
        levels[depth as usize].push(root_node);

        for level in (1..=depth).rev() {
            let mut children = Vec::new();
            for parent in &levels[level as usize] {
                for address in &parent.addresses {
                    children.push(reader.read_node(source, address, Some(level - 1)).await?);
                }
            }
            debug!(level = level - 1, nodes = children.len(), "read B-tree level");
            levels[level as usize - 1] = children;
        }

        Ok(Self { depth, levels })
    }
}

impl<K, A> BTree<K, A> {
    /// A tree with no nodes at any level.
    pub fn empty(depth: u16) -> Self {
        Self {
            depth,
            levels: (0..=depth).map(|_| Vec::new()).collect(),
        }
    }

    /// Level of the root node.
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Nodes at `level`, in parent-major order.
    pub fn nodes(&self, level: u16) -> &[BTreeNode<K, A>] {
        self.levels
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Level-0 nodes.
    pub fn leaves(&self) -> &[BTreeNode<K, A>] {
        self.nodes(0)
    }

    /// Every node, root level first, then each lower level in turn.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &BTreeNode<K, A>> + '_ {
        self.levels.iter().rev().flatten()
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, FormatError};
    use crate::source::MemorySource;

    /// A toy variant: node at offset `o` is `[level, n, child_0 .. child_n-1]`,
    /// one byte each; keys mirror the child offsets.
    struct ByteTree;

    impl NodeReader for ByteTree {
        type Key = u8;
        type Address = u64;

        async fn read_node_header<S: ByteSource>(
            &self,
            source: &S,
            address: &u64,
            level: Option<u16>,
        ) -> Result<NodeHeader> {
            let head = source.read_at(*address, 2).await?;
            let found = head[0] as u16;
            if let Some(expected) = level {
                if expected != found {
                    return Err(FormatError::NodeLevelMismatch { expected, found }.into());
                }
            }
            Ok(NodeHeader {
                level: found,
                entries: head[1] as usize,
                body_offset: address + 2,
                left_sibling: None,
                right_sibling: None,
            })
        }

        async fn read_node_body<S: ByteSource>(
            &self,
            source: &S,
            header: &NodeHeader,
        ) -> Result<(Vec<u8>, Vec<u64>)> {
            let body = source.read_at(header.body_offset, header.entries).await?;
            Ok((body.clone(), body.iter().map(|&b| b as u64).collect()))
        }
    }

    fn image() -> MemorySource {
        let mut data = vec![0u8; 64];
        // root (level 2) at 0 -> internal nodes at 10, 20
        data[0..4].copy_from_slice(&[2, 2, 10, 20]);
        // level 1 at 10 -> leaves at 30, 40; at 20 -> leaf at 50
        data[10..14].copy_from_slice(&[1, 2, 30, 40]);
        data[20..23].copy_from_slice(&[1, 1, 50]);
        data[30..33].copy_from_slice(&[0, 1, 0xA]);
        data[40..43].copy_from_slice(&[0, 1, 0xB]);
        data[50..54].copy_from_slice(&[0, 2, 0xC, 0xD]);
        MemorySource::new(data)
    }

    #[tokio::test]
    async fn build_collects_levels_parent_major() {
        let source = image();
        let tree = BTree::build(&ByteTree, &source, &0, None).await.unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.nodes(2).len(), 1);
        assert_eq!(tree.nodes(1).len(), 2);
        let leaf_payloads: Vec<u64> = tree
            .leaves()
            .iter()
            .flat_map(|n| n.addresses.iter().copied())
            .collect();
        assert_eq!(leaf_payloads, vec![0xA, 0xB, 0xC, 0xD]);
        assert_eq!(tree.node_count(), 6);
        assert_eq!(tree.iter_nodes().next().unwrap().level, 2);
        assert!(tree.nodes(7).is_empty());
    }

    #[tokio::test]
    async fn build_is_deterministic() {
        let source = image();
        let a = BTree::build(&ByteTree, &source, &0, None).await.unwrap();
        let b = BTree::build(&ByteTree, &source, &0, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn level_mismatch_aborts_build() {
        let mut data = image().into_inner();
        data[30] = 1; // first leaf claims level 1
        let source = MemorySource::new(data);
        let err = BTree::build(&ByteTree, &source, &0, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::NodeLevelMismatch {
                expected: 0,
                found: 1
            })
        ));
    }

    #[tokio::test]
    async fn explicit_root_level_is_checked() {
        let source = image();
        let err = BTree::build(&ByteTree, &source, &0, Some(1)).await.unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::NodeLevelMismatch { .. })));
    }

    #[test]
    fn empty_tree_has_no_nodes() {
        let tree: BTree<u8, u64> = BTree::empty(3);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.node_count(), 0);
        assert!(tree.leaves().is_empty());
    }
}
