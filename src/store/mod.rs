//! Content-addressed object storage and the ref table
//!
//! The core only talks to storage through the [`ObjectStore`] and
//! [`RefTable`] traits. Two backends ship with the crate: an in-memory one
//! for tests and ephemeral vaults, and a single-file one where objects are
//! stored by their BLAKE3 hash and compressed with zstd.

mod file_store;
mod memory;
mod packed;

pub use file_store::{FileStore, DEFAULT_COMPRESSION_LEVEL};
pub use memory::{MemoryRefTable, MemoryStore};
pub use packed::PackedObject;

use crate::model::{Commit, Hash, Object, Tree};
use crate::Result;

/// Storage of immutable, content-addressed objects
///
/// Implementations must make `put` idempotent and must never return content
/// from `get` that hashes to something other than the requested hash; that
/// case is reported as [`crate::Error::CorruptObject`].
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, or [`crate::Error::ObjectNotFound`]
    fn get(&self, hash: &Hash) -> Result<Object>;

    /// Store an object and return its hash
    fn put(&self, object: &Object) -> Result<Hash>;

    fn contains(&self, hash: &Hash) -> Result<bool>;

    /// Verify the backing storage is reachable
    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn get_tree(&self, hash: &Hash) -> Result<Tree> {
        self.get(hash)?.into_tree()
    }

    fn get_commit(&self, hash: &Hash) -> Result<Commit> {
        self.get(hash)?.into_commit()
    }

    fn get_blob(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.get(hash)?.into_blob()
    }
}

/// Named, mutable pointers to commits
///
/// This is the only mutable state in the system. Writers advance a ref with
/// [`RefTable::compare_and_swap`] so that a concurrent advance is detected
/// instead of overwritten.
pub trait RefTable: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<Hash>>;

    /// Set `name` to `new` only if it currently equals `expected`
    /// (`None` meaning "absent"). Returns whether the swap happened.
    fn compare_and_swap(&self, name: &str, expected: Option<Hash>, new: Hash) -> Result<bool>;

    /// Remove a ref. Returns whether it existed.
    fn delete(&self, name: &str) -> Result<bool>;

    /// All refs, sorted by name
    fn list(&self) -> Result<Vec<(String, Hash)>>;
}
