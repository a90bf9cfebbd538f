//! End-to-end vault scenarios: commit, diff/patch, ancestor search, merge
//!
//! Run with:
//! ```bash
//! cargo test --test vault_scenarios
//! ```

use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;
use vaultdb::{
    common_ancestor, reachable_closure, Diff, Error, FileStore, MemoryRefTable, MemoryStore,
    ObjectStore, RefTable, Vault,
};

struct Repo {
    store: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefTable>,
}

impl Repo {
    fn new() -> Self {
        Repo {
            store: Arc::new(MemoryStore::new()),
            refs: Arc::new(MemoryRefTable::new()),
        }
    }

    fn checkout(&self, branch: &str) -> Vault {
        let mut vault = Vault::open(self.store.clone(), self.refs.clone()).unwrap();
        vault.checkout(branch, true).unwrap();
        vault
    }
}

fn commit(vault: &mut Vault, message: &str) -> vaultdb::Hash {
    vault.commit(message, "tester", "tester", 0).unwrap()
}

/// Ancestor on `main` with `{"x": [1, 2]}`, plus branches `b` and `c` forked
/// from it
fn forked() -> (Repo, Vault) {
    let repo = Repo::new();
    let mut main = repo.checkout("main");
    main.set("x", vec![json!(1), json!(2)]).unwrap();
    commit(&mut main, "ancestor");
    main.create_branch("b").unwrap();
    main.create_branch("c").unwrap();
    (repo, main)
}

fn values(vault: &mut Vault, key: &str) -> Vec<serde_json::Value> {
    vault.list(key).unwrap().values().cloned().collect()
}

// ============================================================================
// Commits and refs
// ============================================================================

#[test]
fn test_two_commits_on_unchanged_vault() {
    let repo = Repo::new();
    let mut vault = repo.checkout("main");
    vault.set("x", vec![json!(1)]).unwrap();

    let first = commit(&mut vault, "first");
    let second = commit(&mut vault, "second");
    assert_ne!(first, second);

    let c1 = repo.store.get_commit(&first).unwrap();
    let c2 = repo.store.get_commit(&second).unwrap();
    assert_eq!(c1.tree, c2.tree);
    assert_eq!(c2.parents, vec![first]);
    assert!(c1.is_root());
}

#[test]
fn test_ref_conflict_leaves_ref_alone() {
    let repo = Repo::new();
    let mut setup = repo.checkout("main");
    let x = commit(&mut setup, "x");

    let mut h1 = repo.checkout("main");
    let mut h2 = repo.checkout("main");
    assert_eq!(h1.head_commit(), Some(x));
    assert_eq!(h2.head_commit(), Some(x));

    h1.set("a", vec![json!("one")]).unwrap();
    let y = commit(&mut h1, "y");

    h2.set("a", vec![json!("two")]).unwrap();
    match h2.commit("z", "tester", "tester", 0) {
        Err(Error::RefConflict {
            name,
            expected,
            actual,
        }) => {
            assert_eq!(name, "main");
            assert_eq!(expected, Some(x));
            assert_eq!(actual, Some(y));
        }
        other => panic!("expected RefConflict, got {:?}", other),
    }

    assert_eq!(repo.refs.read("main").unwrap(), Some(y));
    assert_eq!(h2.head_commit(), Some(x));

    // Re-checkout and retry succeeds
    let mut h2 = repo.checkout("main");
    h2.set("a", vec![json!("two")]).unwrap();
    let z = commit(&mut h2, "z");
    assert_eq!(repo.store.get_commit(&z).unwrap().parents, vec![y]);
}

#[test]
fn test_first_commit_creates_ref() {
    let repo = Repo::new();
    let mut vault = repo.checkout("fresh");
    assert_eq!(repo.refs.read("fresh").unwrap(), None);
    let c = commit(&mut vault, "init");
    assert_eq!(repo.refs.read("fresh").unwrap(), Some(c));
}

// ============================================================================
// Diff and patch
// ============================================================================

#[test]
fn test_diff_of_self_is_empty() {
    let (repo, main) = forked();
    let again = repo.checkout("main");
    assert!(main.diff(&main).unwrap().is_empty());
    assert!(main.diff(&again).unwrap().is_empty());

    let mut patched = repo.checkout("main");
    let before = patched.hash();
    patched.patch(&Diff::default()).unwrap();
    assert_eq!(patched.hash(), before);
}

#[test]
fn test_inverse_law() {
    let (repo, _) = forked();
    let mut a = repo.checkout("b");
    a.set("x", vec![json!(2), json!(1), json!(3)]).unwrap();
    a.set_records("people", vec![("ann", json!({"age": 30}))])
        .unwrap();
    a.set_vault("team")
        .unwrap()
        .set("members", vec![json!("ann")])
        .unwrap();

    let mut b = repo.checkout("c");
    b.set("old", vec![json!(true)]).unwrap();

    let diff = a.diff(&b).unwrap();
    assert!(!diff.is_empty());
    b.patch(&diff).unwrap();
    assert_eq!(b.hash(), a.hash());
    assert!(a.diff(&b).unwrap().is_empty());
}

#[test]
fn test_failed_patch_changes_nothing() {
    let (repo, _) = forked();
    let mut a = repo.checkout("b");
    a.delete("x").unwrap();
    let diff = a.diff(&repo.checkout("main")).unwrap();

    let mut target = repo.checkout("c");
    target.delete("x").unwrap();
    target.set("y", vec![json!(1)]).unwrap();
    let before = target.hash();

    assert!(matches!(target.patch(&diff), Err(Error::KeyNotFound(_))));
    assert_eq!(target.hash(), before);
}

#[test]
fn test_diff_survives_json_round_trip() {
    let (repo, _) = forked();
    let mut a = repo.checkout("b");
    a.set("y", vec![json!({"deep": [1, 2]})]).unwrap();
    let b = repo.checkout("c");

    let diff = a.diff(&b).unwrap();
    let wire = serde_json::to_string(&diff).unwrap();
    let back: Diff = serde_json::from_str(&wire).unwrap();

    let mut target = repo.checkout("c");
    target.patch(&back).unwrap();
    assert_eq!(target.hash(), a.hash());
}

// ============================================================================
// Ancestor search
// ============================================================================

#[test]
fn test_ancestor_is_reachable_from_every_root() {
    let (repo, main) = forked();
    let ancestor = main.head_commit().unwrap();

    let mut b = repo.checkout("b");
    for i in 0..5 {
        b.set("x", vec![json!(i)]).unwrap();
        commit(&mut b, "b step");
    }
    let mut c = repo.checkout("c");
    c.set("y", vec![]).unwrap();
    commit(&mut c, "c step");

    let found = common_ancestor(
        repo.store.as_ref(),
        &[b.head_commit().unwrap(), c.head_commit().unwrap()],
    )
    .unwrap();
    assert_eq!(found, ancestor);
}

#[test]
fn test_unrelated_histories_have_no_common_ancestor() {
    let repo = Repo::new();
    let mut a = repo.checkout("a");
    a.set("x", vec![json!(1)]).unwrap();
    commit(&mut a, "a");
    let mut b = repo.checkout("b");
    b.set("y", vec![json!(2)]).unwrap();
    commit(&mut b, "b");

    let before = a.hash();
    assert!(matches!(a.merge(&[&b], true), Err(Error::NoCommonAncestor)));
    assert_eq!(a.hash(), before);
}

// ============================================================================
// Merge
// ============================================================================

#[test]
fn test_merge_disjoint_changes_strict() {
    let (repo, mut main) = forked();

    let mut b = repo.checkout("b");
    b.set("x", vec![json!(1), json!(2), json!(3)]).unwrap();
    commit(&mut b, "b");

    let mut c = repo.checkout("c");
    c.set("y", vec![json!(9)]).unwrap();
    commit(&mut c, "c");

    let report = main.merge(&[&b, &c], false).unwrap();
    assert!(report.overridden.is_empty());
    assert_eq!(values(&mut main, "x"), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(values(&mut main, "y"), vec![json!(9)]);
    assert_eq!(main.keys().count(), 2);
}

fn conflicting() -> (Repo, Vault, Vault, Vault) {
    let (repo, main) = forked();

    let mut b = repo.checkout("b");
    b.set("x", vec![json!(1), json!(2), json!(3)]).unwrap();
    commit(&mut b, "b");

    let mut c = repo.checkout("c");
    c.set("x", vec![json!("c")]).unwrap();
    commit(&mut c, "c");

    (repo, main, b, c)
}

#[test]
fn test_merge_conflict_names_the_key() {
    let (_repo, mut main, b, c) = conflicting();
    let before = main.hash();

    match main.merge(&[&b, &c], false) {
        Err(Error::Conflict(key)) => assert_eq!(key, "x"),
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert_eq!(main.hash(), before);
}

#[test]
fn test_merge_last_write_wins() {
    let (_repo, mut main, b, c) = conflicting();

    let report = main.merge(&[&b, &c], true).unwrap();
    assert_eq!(report.overridden, vec!["x"]);
    assert_eq!(values(&mut main, "x"), vec![json!("c")]);
}

#[test]
fn test_merge_without_conflict_is_commutative() {
    let (repo, _) = forked();

    let mut b = repo.checkout("b");
    b.set("x", vec![json!(1), json!(2), json!(3)]).unwrap();
    b.set_vault("nested")
        .unwrap()
        .set("n", vec![json!("b")])
        .unwrap();
    commit(&mut b, "b");

    let mut c = repo.checkout("c");
    c.set("y", vec![json!(9)]).unwrap();
    commit(&mut c, "c");

    let mut first = repo.checkout("main");
    first.merge(&[&b, &c], true).unwrap();
    let mut second = repo.checkout("main");
    second.merge(&[&c, &b], true).unwrap();

    assert_eq!(first.hash(), second.hash());
}

#[test]
fn test_merge_commit_has_all_parents() {
    let (_repo, mut main, b, c) = conflicting();
    let head = main.head_commit().unwrap();

    main.merge(&[&b, &c], true).unwrap();
    let merged = commit(&mut main, "merge");

    let parents = main.store().get_commit(&merged).unwrap().parents;
    assert_eq!(
        parents,
        vec![head, b.head_commit().unwrap(), c.head_commit().unwrap()]
    );
}

// ============================================================================
// Persistence and transport
// ============================================================================

#[test]
fn test_file_store_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let committed = {
        let store = Arc::new(FileStore::create(&path).unwrap());
        let mut vault = Vault::open(store.clone(), store.clone()).unwrap();
        vault.checkout("main", true).unwrap();
        vault
            .set_records("people", vec![("ann", json!(1)), ("bob", json!(2))])
            .unwrap();
        let hash = vault.commit("people", "t", "t", 0).unwrap();
        store.sync().unwrap();
        hash
    };

    let store = Arc::new(FileStore::open(&path).unwrap());
    let mut vault = Vault::open(store.clone(), store).unwrap();
    vault.checkout("main", false).unwrap();
    assert_eq!(vault.head_commit(), Some(committed));
    assert_eq!(vault.list("people").unwrap().get("bob").unwrap(), &json!(2));
}

#[test]
fn test_file_store_serializes_writers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let store = Arc::new(FileStore::create(&path).unwrap());
    let mut setup = Vault::open(store.clone(), store.clone()).unwrap();
    setup.checkout("main", true).unwrap();
    setup.set("x", vec![json!(1)]).unwrap();
    let x = setup.commit("x", "t", "t", 0).unwrap();
    store.sync().unwrap();

    // A second handle on the same file cannot get in while this one lives
    assert!(matches!(
        FileStore::open(&path),
        Err(Error::StoreLocked(_))
    ));

    // Writers sharing the handle race through the ref table
    let mut h1 = Vault::open(store.clone(), store.clone()).unwrap();
    h1.checkout("main", false).unwrap();
    let mut h2 = Vault::open(store.clone(), store.clone()).unwrap();
    h2.checkout("main", false).unwrap();

    h1.set("a", vec![json!("one")]).unwrap();
    let y = h1.commit("y", "t", "t", 1).unwrap();
    h2.set("a", vec![json!("two")]).unwrap();
    assert!(matches!(
        h2.commit("z", "t", "t", 2),
        Err(Error::RefConflict { .. })
    ));
    store.sync().unwrap();
    drop((setup, h1, h2, store));

    let store = Arc::new(FileStore::open(&path).unwrap());
    let mut vault = Vault::open(store.clone(), store.clone()).unwrap();
    vault.checkout("main", false).unwrap();
    assert_eq!(vault.head_commit(), Some(y));
    assert_eq!(store.get_commit(&y).unwrap().parents, vec![x]);
    assert_eq!(values(&mut vault, "a"), vec![json!("one")]);
}

#[test]
fn test_open_on_missing_file_is_unavailable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gone.db");

    let store = Arc::new(FileStore::create(&path).unwrap());
    std::fs::remove_file(&path).unwrap();

    let err = Vault::open(store.clone(), store).unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_reachable_closure_ships_only_new_objects() {
    let (repo, main) = forked();
    let old = main.head_commit().unwrap();

    let mut b = repo.checkout("b");
    b.set("fresh", vec![json!("payload")]).unwrap();
    let new = commit(&mut b, "b");

    let shipped: Vec<_> = reachable_closure(repo.store.as_ref(), new, &[old])
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();

    assert_eq!(shipped[0], new);
    assert!(!shipped.contains(&old));
    for hash in &shipped {
        assert!(repo.store.contains(hash).unwrap());
    }
}
