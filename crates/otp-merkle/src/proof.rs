//! sibling path selection and the commit-reveal hash formulas
//!
//! the formulas here are recomputed by the ledger byte for byte. the commit
//! hash binds only the leaf's immediate neighbor, so the operation stays
//! hidden until reveal.

use crate::hash::{keccak256, Hash, Hasher};
use crate::tree::InnerTree;
use crate::{Result, TreeError};

/// sibling at each level from leaf to root
///
/// `index` must name a real leaf: the filler padding an odd leaf layer has no
/// path of its own.
pub fn select_neighbors(tree: &InnerTree, index: usize) -> Result<Vec<Hash>> {
    let leaves = tree.leaf_count.min(tree.layers.first().map_or(0, Vec::len));
    if index >= leaves {
        return Err(TreeError::IndexOutOfRange { index, leaves: tree.leaf_count });
    }
    let Some((_, below_root)) = tree.layers.split_last() else {
        return Err(TreeError::Malformed("tree has no layers".into()));
    };

    let mut position = index;
    let mut neighbors = Vec::with_capacity(below_root.len());
    for layer in below_root {
        let sibling = layer.get(position ^ 1).ok_or_else(|| {
            TreeError::Malformed(format!("layer of width {} is not padded", layer.len()))
        })?;
        neighbors.push(*sibling);
        position >>= 1;
    }
    Ok(neighbors)
}

/// recompute the root from `leaf` and its neighbors
pub fn verify_path(
    hasher: &dyn Hasher,
    leaf: &Hash,
    index: usize,
    neighbors: &[Hash],
    root: &Hash,
) -> bool {
    let mut node = *leaf;
    let mut position = index;
    for neighbor in neighbors {
        node = if position & 1 == 0 {
            hasher.hash_siblings(&node, neighbor)
        } else {
            hasher.hash_siblings(neighbor, &node)
        };
        position >>= 1;
    }
    position == 0 && node == *root
}

/// `keccak256(neighbor || index as u32 be || eotp)`, published at commit
pub fn commit_hash(neighbor: &Hash, index: u32, eotp: &Hash) -> Hash {
    keccak256(&[&neighbor[..], &index.to_be_bytes()[..], &eotp[..]])
}

/// `keccak256(params_hash || eotp)`, checked at reveal
pub fn verification_hash(params_hash: &Hash, eotp: &Hash) -> Hash {
    keccak256(&[&params_hash[..], &eotp[..]])
}

/// params hash of an opaque data payload
pub fn data_hash(data: &[u8]) -> Hash {
    keccak256(&[data])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha256Hasher;
    use crate::tree::build_layers;
    use crate::tree_height;
    use proptest::prelude::*;

    fn tree_for(n: usize) -> InnerTree {
        let leaves = (0..n as u32)
            .map(|i| Sha256Hasher.hash(&i.to_le_bytes()))
            .collect();
        InnerTree { layers: build_layers(&Sha256Hasher, leaves), leaf_count: n }
    }

    #[test]
    fn test_out_of_range() {
        let tree = tree_for(4);
        assert_eq!(
            select_neighbors(&tree, 4),
            Err(TreeError::IndexOutOfRange { index: 4, leaves: 4 })
        );
        let empty = InnerTree { layers: vec![], leaf_count: 0 };
        assert!(select_neighbors(&empty, 0).is_err());
    }

    #[test]
    fn test_filler_is_not_a_leaf() {
        let tree = tree_for(3);
        // the leaf layer is padded to width 4, but only 3 leaves exist
        assert_eq!(tree.layers[0].len(), 4);
        assert_eq!(
            select_neighbors(&tree, 3),
            Err(TreeError::IndexOutOfRange { index: 3, leaves: 3 })
        );
        assert!(select_neighbors(&tree, 2).is_ok());
    }

    #[test]
    fn test_single_leaf_has_empty_path() {
        let tree = tree_for(1);
        let neighbors = select_neighbors(&tree, 0).unwrap();
        assert!(neighbors.is_empty());
        assert!(verify_path(&Sha256Hasher, &tree.layers[0][0], 0, &neighbors, &tree.root()));
    }

    #[test]
    fn test_wrong_index_fails() {
        let tree = tree_for(8);
        let root = tree.root();
        let leaf = tree.layers[0][2];
        let neighbors = select_neighbors(&tree, 2).unwrap();
        assert!(verify_path(&Sha256Hasher, &leaf, 2, &neighbors, &root));
        assert!(!verify_path(&Sha256Hasher, &leaf, 3, &neighbors, &root));
        // index beyond the path width
        assert!(!verify_path(&Sha256Hasher, &leaf, 2 + 8, &neighbors, &root));
    }

    #[test]
    fn test_commit_hash_layout() {
        let neighbor = [1u8; 32];
        let eotp = [2u8; 32];
        let mut buf = Vec::new();
        buf.extend_from_slice(&neighbor);
        buf.extend_from_slice(&[0, 0, 1, 2]);
        buf.extend_from_slice(&eotp);
        assert_eq!(commit_hash(&neighbor, 258, &eotp), keccak256(&[buf.as_slice()]));
        assert_ne!(commit_hash(&neighbor, 258, &eotp), commit_hash(&eotp, 258, &neighbor));
    }

    #[test]
    fn test_verification_hash_is_ordered() {
        let a = [3u8; 32];
        let b = [4u8; 32];
        assert_ne!(verification_hash(&a, &b), verification_hash(&b, &a));
        assert_eq!(data_hash(b"xyz"), keccak256(&[&b"xyz"[..]]));
    }

    proptest! {
        #[test]
        fn prop_paths_reproduce_root(n in 1usize..200, seed in any::<usize>()) {
            let tree = tree_for(n);
            let index = seed % n;
            let neighbors = select_neighbors(&tree, index).unwrap();
            prop_assert_eq!(neighbors.len(), tree_height(n));
            prop_assert!(verify_path(&Sha256Hasher, &tree.leaves()[index], index, &neighbors, &tree.root()));
        }
    }
}
