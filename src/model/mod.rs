//! Core data model types for vaultdb

mod commit;
mod hash;
mod object;
mod tree;

pub use commit::{now_millis, Commit};
pub use hash::Hash;
pub use object::{content_hash, Object, ObjectKind};
pub use tree::{
    sentinel_entry, validate_name, EntryMode, Tree, TreeEntry, TreeKind, SENTINEL, SENTINEL_PAYLOAD,
};
