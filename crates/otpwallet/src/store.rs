//! content-addressed cache of authentication trees
//!
//! a tree is stored under the hex digest of its root. entries are write-once:
//! re-putting identical content is a no-op, different content under an
//! existing root is refused.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use otp_merkle::{Hash, InnerTree};
use tracing::{debug, info};

use crate::{Error, Result};

pub fn tree_key(root: &Hash) -> String {
    hex::encode(root)
}

pub trait TreeStore: Send + Sync {
    /// store a full layer set under its root
    fn put(&self, tree: &InnerTree) -> Result<()>;

    fn get(&self, root: &Hash) -> Result<Option<InnerTree>>;

    fn contains(&self, root: &Hash) -> Result<bool> {
        Ok(self.get(root)?.is_some())
    }

    /// like [`TreeStore::get`] but a missing tree is an error
    fn load(&self, root: &Hash) -> Result<InnerTree> {
        self.get(root)?
            .ok_or_else(|| Error::Storage(format!("no tree stored for root {}", tree_key(root))))
    }
}

/// refuse layer sets that would not survive `root()`/`leaves()`, or that are
/// filed under another root
fn check_tree(tree: &InnerTree, key: Option<&Hash>) -> Result<()> {
    tree.validate()
        .map_err(|e| Error::Storage(format!("unusable tree: {e}")))?;
    if let Some(key) = key {
        if tree.root() != *key {
            return Err(Error::Storage(format!(
                "tree under {} has root {}",
                tree_key(key),
                tree_key(&tree.root())
            )));
        }
    }
    Ok(())
}

fn conflict(root: &Hash) -> Error {
    Error::Storage(format!("different tree already stored for root {}", tree_key(root)))
}

#[derive(Default)]
pub struct MemoryStore {
    trees: RwLock<HashMap<String, InnerTree>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trees.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TreeStore for MemoryStore {
    fn put(&self, tree: &InnerTree) -> Result<()> {
        check_tree(tree, None)?;
        let root = tree.root();
        let mut trees = self.trees.write().map_err(|e| Error::Storage(e.to_string()))?;
        match trees.get(&tree_key(&root)) {
            Some(existing) if existing == tree => Ok(()),
            Some(_) => Err(conflict(&root)),
            None => {
                trees.insert(tree_key(&root), tree.clone());
                Ok(())
            }
        }
    }

    fn get(&self, root: &Hash) -> Result<Option<InnerTree>> {
        let trees = self.trees.read().map_err(|e| Error::Storage(e.to_string()))?;
        let tree = trees.get(&tree_key(root)).cloned();
        if let Some(tree) = &tree {
            check_tree(tree, Some(root))?;
        }
        Ok(tree)
    }
}

/// sled-backed store, bincode values
pub struct SledStore {
    db: sled::Db,
    trees: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening tree store at {}", path.display());
        let db = sled::open(path)?;
        let trees = db.open_tree("trees")?;
        Ok(Self { db, trees })
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl TreeStore for SledStore {
    fn put(&self, tree: &InnerTree) -> Result<()> {
        check_tree(tree, None)?;
        let root = tree.root();
        let key = tree_key(&root);
        let bytes = bincode::serialize(tree)?;
        match self.trees.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(bytes.as_slice()))? {
            Ok(()) => {
                debug!(root = %key, bytes = bytes.len(), "tree stored");
                self.trees.flush()?;
                Ok(())
            }
            Err(existing) if existing.current.as_deref() == Some(bytes.as_slice()) => Ok(()),
            Err(_) => Err(conflict(&root)),
        }
    }

    fn get(&self, root: &Hash) -> Result<Option<InnerTree>> {
        match self.trees.get(tree_key(root).as_bytes())? {
            Some(bytes) => {
                let tree: InnerTree = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Storage(format!("undecodable tree under {}: {e}", tree_key(root))))?;
                check_tree(&tree, Some(root))?;
                Ok(Some(tree))
            }
            None => Ok(None),
        }
    }
}
