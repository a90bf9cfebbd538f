//! High-level Vault API
//!
//! A [`Vault`] is the handle applications work with: one checked-out branch,
//! an in-memory working tree, and the shared store and ref table behind it.
//! Mutations only touch the working tree. Nothing reaches the store until
//! [`Vault::commit`], and the ref only moves through compare-and-swap.

use crate::list::List;
use crate::model::{Commit, Hash, Object};
use crate::ops::merge::{self, MergeReport};
use crate::ops::{common_ancestor, BranchManager, Diff, Snapshot};
use crate::store::{ObjectStore, RefTable};
use crate::subvault::{Entry, SubVault};
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A hierarchical, versioned key-space over one branch
pub struct Vault {
    store: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefTable>,
    /// Checked-out branch; `None` until the first checkout
    branch: Option<String>,
    /// Commit the working tree was loaded from or last committed as
    head: Option<Hash>,
    /// Heads merged since the last commit, recorded as extra parents
    merge_heads: Vec<Hash>,
    root: SubVault,
}

impl Vault {
    /// Open an unattached vault with an empty working tree
    pub fn open(store: Arc<dyn ObjectStore>, refs: Arc<dyn RefTable>) -> Result<Self> {
        store.check()?;
        Ok(Vault {
            root: SubVault::empty(store.clone(), ""),
            store,
            refs,
            branch: None,
            head: None,
            merge_heads: Vec::new(),
        })
    }

    /// Load the tree `name` points at as the working state
    ///
    /// A missing branch is an error unless `create_if_missing` is set; the
    /// vault then starts empty and the ref is created by the first commit.
    pub fn checkout(&mut self, name: &str, create_if_missing: bool) -> Result<()> {
        match self.refs.read(name)? {
            Some(commit_hash) => {
                let commit = self.store.get_commit(&commit_hash)?;
                self.root = SubVault::load(self.store.clone(), "", &commit.tree)?;
                self.head = Some(commit_hash);
            }
            None if create_if_missing => {
                self.root = SubVault::empty(self.store.clone(), "");
                self.head = None;
            }
            None => return Err(Error::RefNotFound(name.to_string())),
        }

        self.branch = Some(name.to_string());
        self.merge_heads.clear();
        info!(
            branch = name,
            head = ?self.head.map(|h| h.short()),
            "checked out"
        );
        Ok(())
    }

    /// Load a specific commit without binding to any branch
    ///
    /// Commits made from a detached vault are written but move no ref.
    pub fn checkout_commit(&mut self, commit_hash: Hash) -> Result<()> {
        let commit = self.store.get_commit(&commit_hash)?;
        self.root = SubVault::load(self.store.clone(), "", &commit.tree)?;
        self.head = Some(commit_hash);
        self.branch = None;
        self.merge_heads.clear();
        info!(head = %commit_hash.short(), "checked out detached commit");
        Ok(())
    }

    // === Working tree ===

    pub fn get(&mut self, key: &str) -> Result<Entry<'_>> {
        self.root.get(key)
    }

    pub fn list(&mut self, key: &str) -> Result<&mut List> {
        self.root.list(key)
    }

    pub fn vault(&mut self, key: &str) -> Result<&mut SubVault> {
        self.root.vault(key)
    }

    /// Create or replace `key` with a list of positional records
    pub fn set(&mut self, key: &str, values: impl IntoIterator<Item = Value>) -> Result<()> {
        self.root.set(key, values)
    }

    /// Create or replace `key` with a list of keyed records
    pub fn set_records<K: Into<String>>(
        &mut self,
        key: &str,
        records: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<()> {
        self.root.set_records(key, records)
    }

    /// Create or replace `key` with an empty nested vault
    pub fn set_vault(&mut self, key: &str) -> Result<&mut SubVault> {
        self.root.set_vault(key)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.root.delete(key)
    }

    /// Keys of the working tree; the sentinel is never included
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.root.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    pub fn snapshot(&self, key: &str) -> Result<Snapshot> {
        self.root.snapshot(key)
    }

    pub fn to_snapshot(&self) -> Result<Snapshot> {
        self.root.to_snapshot()
    }

    pub fn root(&self) -> &SubVault {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut SubVault {
        &mut self.root
    }

    /// Hash of the working tree
    pub fn hash(&self) -> Hash {
        self.root.hash()
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn head_commit(&self) -> Option<Hash> {
        self.head
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // === Versioning ===

    /// Write the working tree and record it as a new commit
    ///
    /// A commit is created even when nothing changed. The branch is advanced
    /// with compare-and-swap against the commit this vault last saw; if
    /// another writer moved it first, this fails with [`Error::RefConflict`]
    /// and neither the ref nor this vault's head changes.
    pub fn commit(
        &mut self,
        message: &str,
        author: &str,
        committer: &str,
        timestamp: u64,
    ) -> Result<Hash> {
        let tree = self.root.write()?;

        let mut parents: Vec<Hash> = self.head.into_iter().collect();
        for head in &self.merge_heads {
            if !parents.contains(head) {
                parents.push(*head);
            }
        }

        let commit = Commit::new(tree, parents, message, author, committer, timestamp);
        let parent_count = commit.parents.len();
        let commit_hash = self.store.put(&Object::Commit(commit))?;

        match &self.branch {
            Some(branch) => {
                BranchManager::new(self.store.as_ref(), self.refs.as_ref()).advance(
                    branch,
                    self.head,
                    commit_hash,
                )?;
            }
            None => warn!(commit = %commit_hash.short(), "detached vault, no ref advanced"),
        }

        self.head = Some(commit_hash);
        self.merge_heads.clear();
        info!(
            branch = ?self.branch,
            commit = %commit_hash.short(),
            tree = %tree.short(),
            parents = parent_count,
            "committed"
        );
        Ok(commit_hash)
    }

    /// Changes that turn `other`'s working tree into this one
    pub fn diff(&self, other: &Vault) -> Result<Diff> {
        self.root.diff(&other.root)
    }

    /// Apply a diff to the working tree; on error nothing changes
    pub fn patch(&mut self, diff: &Diff) -> Result<()> {
        self.root.patch(diff)
    }

    /// Merge the changes each of `others` made since the common ancestor
    ///
    /// Deltas are applied in the order given. With `without_conflict`, a path
    /// changed by more than one vault ends up as the last one left it;
    /// otherwise such a path fails the merge with [`Error::Conflict`]. The
    /// working tree is only replaced once every delta has applied. Merged
    /// heads other than the base become extra parents of the next commit.
    pub fn merge(&mut self, others: &[&Vault], without_conflict: bool) -> Result<MergeReport> {
        let mut roots = vec![self.head.ok_or(Error::NoCommonAncestor)?];
        for other in others {
            roots.push(other.head.ok_or(Error::NoCommonAncestor)?);
        }

        let base_commit = common_ancestor(self.store.as_ref(), &roots)?;
        let base_tree = self.store.get_commit(&base_commit)?.tree;
        let base = SubVault::load(self.store.clone(), "", &base_tree)?;

        let incoming: Vec<&SubVault> = others.iter().map(|o| &o.root).collect();
        let (merged, overridden) =
            merge::merge_into(&self.root, &base, &incoming, without_conflict)?;
        self.root = merged;

        let merged_heads = roots.split_off(1);
        // A head equal to the base is already an ancestor of our own head
        for head in &merged_heads {
            if *head != base_commit
                && Some(*head) != self.head
                && !self.merge_heads.contains(head)
            {
                self.merge_heads.push(*head);
            }
        }

        info!(
            base = %base_commit.short(),
            heads = merged_heads.len(),
            overridden = overridden.len(),
            "merged"
        );
        Ok(MergeReport {
            base: base_commit,
            merged: merged_heads,
            overridden,
        })
    }

    /// First-parent history from the current head, newest first
    pub fn log(&self, limit: Option<usize>) -> Result<Vec<(Hash, Commit)>> {
        self.branches_manager().log(self.head, limit)
    }

    /// All refs, sorted by name
    pub fn branches(&self) -> Result<Vec<(String, Hash)>> {
        self.branches_manager().list_branches()
    }

    /// Bind a new branch at the current commit
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let head = self.head.ok_or_else(|| {
            Error::RefNotFound(self.branch.clone().unwrap_or_else(|| "HEAD".to_string()))
        })?;
        self.branches_manager().create_branch(name, head)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.branches_manager().delete_branch(name)
    }

    fn branches_manager(&self) -> BranchManager<'_> {
        BranchManager::new(self.store.as_ref(), self.refs.as_ref())
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("branch", &self.branch)
            .field("head", &self.head)
            .field("root", &self.root)
            .finish()
    }
}
