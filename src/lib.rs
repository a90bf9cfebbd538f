//! # vaultdb
//!
//! A hierarchical, versioned key-value store built on git-style
//! content-addressed objects.
//!
//! A vault maps keys to ordered lists of JSON records or to nested vaults.
//! Every state is a tree of immutable objects identified by their BLAKE3
//! hash, so unchanged subtrees are shared between commits and compare equal
//! without being read.
//!
//! ## Core Concepts
//!
//! - **Objects**: blobs (one record each), trees (vaults and lists) and
//!   commits, stored by hash in an [`ObjectStore`]
//! - **Refs**: named branch pointers in a [`RefTable`], advanced only by
//!   compare-and-swap
//! - **Diff/patch**: structural deltas between two vaults or lists
//! - **Merge**: three-way merge against the nearest common ancestor commit
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vaultdb::{MemoryRefTable, MemoryStore, Vault};
//!
//! let mut vault = Vault::open(Arc::new(MemoryStore::new()), Arc::new(MemoryRefTable::new()))?;
//! vault.checkout("main", true)?;
//! vault.set("people", vec![serde_json::json!({"name": "ann"})])?;
//! vault.commit("Add people", "ann", "ann", vaultdb::model::now_millis())?;
//! ```

pub mod config;
pub mod list;
pub mod model;
pub mod ops;
pub mod store;
pub mod subvault;

mod error;
mod vault;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use list::{List, Record};
pub use model::{Commit, Hash, Object};
pub use ops::{
    common_ancestor, reachable_closure, Change, Diff, DiffEntry, MergeReport, PatchMode,
    Snapshot,
};
pub use store::{FileStore, MemoryRefTable, MemoryStore, ObjectStore, RefTable};
pub use subvault::{Entry, SubVault};
pub use vault::Vault;

/// On-disk format version of the file store
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"VAULTDB\0";
