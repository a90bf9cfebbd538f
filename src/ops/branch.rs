//! Branch operations over a ref table

use crate::model::{Commit, Hash};
use crate::store::{ObjectStore, RefTable};
use crate::{Error, Result};
use tracing::{info, warn};

/// Manages branches and walks their history
pub struct BranchManager<'a> {
    store: &'a dyn ObjectStore,
    refs: &'a dyn RefTable,
}

impl<'a> BranchManager<'a> {
    pub fn new(store: &'a dyn ObjectStore, refs: &'a dyn RefTable) -> Self {
        BranchManager { store, refs }
    }

    /// The commit a branch points at
    pub fn resolve(&self, name: &str) -> Result<Hash> {
        self.refs
            .read(name)?
            .ok_or_else(|| Error::RefNotFound(name.to_string()))
    }

    /// List all branches, sorted by name
    pub fn list_branches(&self) -> Result<Vec<(String, Hash)>> {
        self.refs.list()
    }

    /// Create a new branch at `commit`; fails if the branch already exists
    pub fn create_branch(&self, name: &str, commit: Hash) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidKey(name.to_string()));
        }
        if !self.store.contains(&commit)? {
            return Err(Error::ObjectNotFound(commit));
        }
        self.advance(name, None, commit)
    }

    /// Delete a branch. Commits stay in the store.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        if !self.refs.delete(name)? {
            return Err(Error::RefNotFound(name.to_string()));
        }
        info!(branch = name, "deleted branch");
        Ok(())
    }

    /// Move `name` from `expected` to `new`, or report who got there first
    pub fn advance(&self, name: &str, expected: Option<Hash>, new: Hash) -> Result<()> {
        if self.refs.compare_and_swap(name, expected, new)? {
            info!(
                branch = name,
                from = ?expected.map(|h| h.short()),
                to = %new.short(),
                "advanced ref"
            );
            return Ok(());
        }

        let actual = self.refs.read(name)?;
        warn!(
            branch = name,
            expected = ?expected.map(|h| h.short()),
            actual = ?actual.map(|h| h.short()),
            "ref moved underneath us"
        );
        Err(Error::RefConflict {
            name: name.to_string(),
            expected,
            actual,
        })
    }

    /// First-parent history starting at `from`, newest first
    pub fn log(&self, from: Option<Hash>, limit: Option<usize>) -> Result<Vec<(Hash, Commit)>> {
        let mut result = Vec::new();
        let mut current = from;
        let limit = limit.unwrap_or(usize::MAX);

        while let Some(hash) = current {
            if result.len() >= limit {
                break;
            }

            let commit = self.store.get_commit(&hash)?;
            let parent = commit.parents.first().copied();
            result.push((hash, commit));
            current = parent;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Object;
    use crate::store::{MemoryRefTable, MemoryStore};

    fn commit(store: &MemoryStore, parents: &[Hash], message: &str) -> Hash {
        let commit = Commit::new(Hash::digest(b"tree"), parents.to_vec(), message, "t", "t", 0);
        store.put(&Object::Commit(commit)).unwrap()
    }

    #[test]
    fn test_branch_operations() {
        let store = MemoryStore::new();
        let refs = MemoryRefTable::new();
        let manager = BranchManager::new(&store, &refs);

        let c1 = commit(&store, &[], "first");
        manager.create_branch("main", c1).unwrap();
        manager.create_branch("feature", c1).unwrap();

        let branches = manager.list_branches().unwrap();
        assert_eq!(
            branches,
            vec![("feature".to_string(), c1), ("main".to_string(), c1)]
        );

        assert!(matches!(
            manager.create_branch("main", c1),
            Err(Error::RefConflict { .. })
        ));

        manager.delete_branch("feature").unwrap();
        assert!(matches!(manager.resolve("feature"), Err(Error::RefNotFound(_))));
        assert!(matches!(
            manager.delete_branch("feature"),
            Err(Error::RefNotFound(_))
        ));
    }

    #[test]
    fn test_create_branch_needs_existing_commit() {
        let store = MemoryStore::new();
        let refs = MemoryRefTable::new();
        let manager = BranchManager::new(&store, &refs);
        assert!(matches!(
            manager.create_branch("main", Hash::digest(b"nothing")),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_advance_detects_conflict() {
        let store = MemoryStore::new();
        let refs = MemoryRefTable::new();
        let manager = BranchManager::new(&store, &refs);

        let x = commit(&store, &[], "x");
        let y = commit(&store, &[x], "y");
        let z = commit(&store, &[x], "z");

        manager.advance("main", None, x).unwrap();
        manager.advance("main", Some(x), y).unwrap();

        match manager.advance("main", Some(x), z) {
            Err(Error::RefConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Some(x));
                assert_eq!(actual, Some(y));
            }
            other => panic!("expected RefConflict, got {:?}", other),
        }
        assert_eq!(manager.resolve("main").unwrap(), y);
    }

    #[test]
    fn test_log() {
        let store = MemoryStore::new();
        let refs = MemoryRefTable::new();
        let manager = BranchManager::new(&store, &refs);

        let c1 = commit(&store, &[], "First commit");
        let c2 = commit(&store, &[c1], "Second commit");

        let log = manager.log(Some(c2), None).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, c2);
        assert_eq!(log[1].0, c1);

        assert_eq!(manager.log(Some(c2), Some(1)).unwrap().len(), 1);
        assert!(manager.log(None, None).unwrap().is_empty());
    }
}
