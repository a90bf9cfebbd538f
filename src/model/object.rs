//! The three stored object kinds and their canonical encoding

use super::{Commit, Hash, Tree};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Type tag stored in front of every encoded object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn as_byte(&self) -> u8 {
        match self {
            ObjectKind::Blob => 0,
            ObjectKind::Tree => 1,
            ObjectKind::Commit => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ObjectKind::Blob),
            1 => Some(ObjectKind::Tree),
            2 => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

/// A content-addressed unit of storage
///
/// Objects are immutable: a change always produces a new object with a new
/// hash, never an edit of an existing one.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    /// Opaque payload; one List record
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
        }
    }

    /// Canonical body bytes (without the kind tag)
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Object::Blob(data) => data.clone(),
            Object::Tree(tree) => bincode::serialize(tree)?,
            Object::Commit(commit) => bincode::serialize(commit)?,
        })
    }

    pub fn decode(kind: ObjectKind, body: &[u8]) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(body.to_vec()),
            ObjectKind::Tree => Object::Tree(bincode::deserialize(body)?),
            ObjectKind::Commit => Object::Commit(bincode::deserialize(body)?),
        })
    }

    /// Compute the content hash
    pub fn hash(&self) -> Result<Hash> {
        let body = self.encode()?;
        Ok(content_hash(self.kind(), &body))
    }

    /// Decode a stored body and check it still hashes to `expected`
    pub fn decode_verified(expected: &Hash, kind: ObjectKind, body: &[u8]) -> Result<Self> {
        let actual = content_hash(kind, body);
        if actual != *expected {
            return Err(Error::CorruptObject(format!(
                "{} hashes to {}",
                expected.short(),
                actual.short()
            )));
        }
        Self::decode(kind, body).map_err(|e| {
            Error::CorruptObject(format!("{}: undecodable {:?}: {}", expected.short(), kind, e))
        })
    }

    pub fn into_tree(self) -> Result<Tree> {
        match self {
            Object::Tree(tree) => Ok(tree),
            other => Err(Error::CorruptObject(format!(
                "Expected Tree, got {:?}",
                other.kind()
            ))),
        }
    }

    pub fn into_commit(self) -> Result<Commit> {
        match self {
            Object::Commit(commit) => Ok(commit),
            other => Err(Error::CorruptObject(format!(
                "Expected Commit, got {:?}",
                other.kind()
            ))),
        }
    }

    pub fn into_blob(self) -> Result<Vec<u8>> {
        match self {
            Object::Blob(data) => Ok(data),
            other => Err(Error::CorruptObject(format!(
                "Expected Blob, got {:?}",
                other.kind()
            ))),
        }
    }
}

/// Hash of a kind tag plus canonical body
///
/// The kind is included so a blob can never collide with a tree that
/// happens to share its bytes.
pub fn content_hash(kind: ObjectKind, body: &[u8]) -> Hash {
    Hash::digest_many(&[&[kind.as_byte()], body])
}
