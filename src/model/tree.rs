//! Tree objects: named, moded references to child objects

use super::object::{content_hash, ObjectKind};
use super::{Hash, Object};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reserved entry name present in every vault tree
///
/// It carries the vault format marker and is never reported as a key.
pub const SENTINEL: &str = ".vault";

/// Payload of the sentinel blob
pub const SENTINEL_PAYLOAD: &[u8] = b"vaultdb/1";

/// What a tree entry points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// A blob holding one record of a list
    Record,
    /// The root tree of a list
    List,
    /// A nested vault tree
    Vault,
}

/// Whether a tree is a vault key-space or a list record-space
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeKind {
    Vault,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub mode: EntryMode,
    pub hash: Hash,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, mode: EntryMode, hash: Hash) -> Self {
        TreeEntry {
            name: name.into(),
            mode,
            hash,
        }
    }
}

/// An ordered mapping of entry names to child objects
///
/// Vault trees are canonicalized by sorting on name, so construction order
/// never leaks into the hash. List trees keep their order: position is part
/// of a list's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub kind: TreeKind,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn vault(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Tree {
            kind: TreeKind::Vault,
            entries,
        }
    }

    pub fn list(entries: Vec<TreeEntry>) -> Self {
        Tree {
            kind: TreeKind::List,
            entries,
        }
    }

    /// Compute the tree hash (identical to the hash the store assigns it)
    pub fn hash(&self) -> Hash {
        let body = bincode::serialize(self).expect("tree serialization should not fail");
        content_hash(ObjectKind::Tree, &body)
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries other than the sentinel
    pub fn user_entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.name != SENTINEL)
    }
}

impl From<Tree> for Object {
    fn from(tree: Tree) -> Self {
        Object::Tree(tree)
    }
}

/// Check that `name` can be used as a vault key or record key
///
/// Names are path segments: non-empty, without `/`, and never the sentinel.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == SENTINEL {
        return Err(Error::InvalidKey(name.to_string()));
    }
    Ok(())
}

/// The sentinel blob written into every vault tree
pub fn sentinel_entry() -> (TreeEntry, Object) {
    let blob = Object::Blob(SENTINEL_PAYLOAD.to_vec());
    let hash = content_hash(ObjectKind::Blob, SENTINEL_PAYLOAD);
    (TreeEntry::new(SENTINEL, EntryMode::Record, hash), blob)
}
