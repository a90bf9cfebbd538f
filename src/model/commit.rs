//! Commit type - an immutable snapshot of a vault tree

use super::object::{content_hash, ObjectKind};
use super::{Hash, Object};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A commit points at one vault tree and zero or more parent commits
///
/// Like git commits, these form a DAG. The hash covers every field,
/// parents included, so history can only be extended, never rewritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Hash of the root vault tree
    pub tree: Hash,

    /// Parent commit hashes (empty for a root commit, two or more for merges)
    pub parents: Vec<Hash>,

    pub author: String,

    pub committer: String,

    pub message: String,

    /// Timestamp (unix millis)
    pub timestamp: u64,
}

impl Commit {
    pub fn new(
        tree: Hash,
        parents: Vec<Hash>,
        message: impl Into<String>,
        author: impl Into<String>,
        committer: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Commit {
            tree,
            parents,
            author: author.into(),
            committer: committer.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Compute the commit hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).expect("serialization should not fail");
        content_hash(ObjectKind::Commit, &data)
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

impl From<Commit> for Object {
    fn from(commit: Commit) -> Self {
        Object::Commit(commit)
    }
}

/// Current wall-clock time in unix millis
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
