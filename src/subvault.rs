//! SubVault - a key-space of lists and nested vaults
//!
//! Entries are loaded from the store on first access. Until then an entry is
//! just a `(mode, hash)` pair from the parent tree, which is also all the diff
//! needs to skip it when nothing changed underneath.

use crate::list::List;
use crate::model::{sentinel_entry, validate_name, EntryMode, Hash, Object, Tree, TreeEntry, TreeKind};
use crate::ops::diff::{self, Change, Diff, Diffable, Snapshot};
use crate::ops::patch::{self, kind_mismatch, PatchMode, Patchable};
use crate::store::ObjectStore;
use crate::{Error, Result};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
enum Slot {
    /// Not yet loaded
    Stored { mode: EntryMode, hash: Hash },
    List(List),
    Vault(SubVault),
}

impl Slot {
    fn mode(&self) -> EntryMode {
        match self {
            Slot::Stored { mode, .. } => *mode,
            Slot::List(_) => EntryMode::List,
            Slot::Vault(_) => EntryMode::Vault,
        }
    }

    fn hash(&self) -> Hash {
        match self {
            Slot::Stored { hash, .. } => *hash,
            Slot::List(list) => list.hash(),
            Slot::Vault(vault) => vault.hash(),
        }
    }
}

/// A borrowed view of an entry, loading it if needed
enum Loaded<'a> {
    List(Cow<'a, List>),
    Vault(Cow<'a, SubVault>),
}

impl Loaded<'_> {
    fn snapshot(&self) -> Result<Snapshot> {
        match self {
            Loaded::List(list) => Ok(list.snapshot()),
            Loaded::Vault(vault) => vault.to_snapshot(),
        }
    }
}

/// A handle on one entry of a vault
pub enum Entry<'a> {
    List(&'a mut List),
    Vault(&'a mut SubVault),
}

/// A named mapping from key to list or nested vault
#[derive(Clone)]
pub struct SubVault {
    store: Arc<dyn ObjectStore>,
    /// Qualified name; empty for the root
    path: String,
    /// Keys in insertion order
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

impl SubVault {
    pub(crate) fn empty(store: Arc<dyn ObjectStore>, path: impl Into<String>) -> Self {
        SubVault {
            store,
            path: path.into(),
            order: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Read a vault tree; children stay unloaded
    pub(crate) fn load(
        store: Arc<dyn ObjectStore>,
        path: impl Into<String>,
        hash: &Hash,
    ) -> Result<Self> {
        let path = path.into();
        let tree = store.get_tree(hash)?;
        if tree.kind != TreeKind::Vault {
            return Err(Error::CorruptObject(format!(
                "{} is a {:?} tree, expected a vault",
                hash.short(),
                tree.kind
            )));
        }

        let mut vault = SubVault::empty(store, path);
        for entry in tree.user_entries() {
            if entry.mode == EntryMode::Record {
                return Err(Error::CorruptObject(format!(
                    "vault {:?} holds a bare record {:?}",
                    vault.path, entry.name
                )));
            }
            vault.put_slot(
                &entry.name,
                Slot::Stored {
                    mode: entry.mode,
                    hash: entry.hash,
                },
            );
        }
        Ok(vault)
    }

    pub(crate) fn from_snapshot(
        store: Arc<dyn ObjectStore>,
        path: impl Into<String>,
        entries: &[(String, Snapshot)],
    ) -> Result<Self> {
        let mut vault = SubVault::empty(store, path);
        for (key, snapshot) in entries {
            vault.put_snapshot(key, snapshot)?;
        }
        Ok(vault)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Keys in insertion order (loaded vaults start in name order)
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Resolve an entry, loading it from the store on first access
    pub fn get(&mut self, key: &str) -> Result<Entry<'_>> {
        self.materialize(key)
    }

    pub fn list(&mut self, key: &str) -> Result<&mut List> {
        let qualified = self.qualified(key);
        match self.get(key)? {
            Entry::List(list) => Ok(list),
            Entry::Vault(_) => Err(Error::EntryKindMismatch(qualified)),
        }
    }

    pub fn vault(&mut self, key: &str) -> Result<&mut SubVault> {
        let qualified = self.qualified(key);
        match self.get(key)? {
            Entry::Vault(vault) => Ok(vault),
            Entry::List(_) => Err(Error::EntryKindMismatch(qualified)),
        }
    }

    /// Create or replace `key` with a list of positional records
    pub fn set(&mut self, key: &str, values: impl IntoIterator<Item = Value>) -> Result<()> {
        validate_name(key)?;
        let list = List::from_values(self.qualified(key), values)?;
        self.put_slot(key, Slot::List(list));
        Ok(())
    }

    /// Create or replace `key` with a list of keyed records
    pub fn set_records<K: Into<String>>(
        &mut self,
        key: &str,
        records: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<()> {
        validate_name(key)?;
        let list = List::from_records(self.qualified(key), records)?;
        self.put_slot(key, Slot::List(list));
        Ok(())
    }

    /// Create or replace `key` with an empty nested vault
    pub fn set_vault(&mut self, key: &str) -> Result<&mut SubVault> {
        validate_name(key)?;
        let vault = SubVault::empty(self.store.clone(), self.qualified(key));
        self.put_slot(key, Slot::Vault(vault));
        self.vault(key)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        if !self.contains_key(key) {
            return Err(Error::KeyNotFound(self.qualified(key)));
        }
        self.remove_entry(key);
        Ok(())
    }

    /// A self-contained copy of one entry
    pub fn snapshot(&self, key: &str) -> Result<Snapshot> {
        self.load_slot(key)?.snapshot()
    }

    /// A self-contained copy of the whole vault
    pub fn to_snapshot(&self) -> Result<Snapshot> {
        let entries = self
            .order
            .iter()
            .map(|key| Ok((key.clone(), self.snapshot(key)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Snapshot::Vault(entries))
    }

    /// The tree this vault would be written as
    pub fn tree(&self) -> Tree {
        let (sentinel, _) = sentinel_entry();
        let mut entries = vec![sentinel];
        for key in &self.order {
            let slot = &self.slots[key];
            entries.push(TreeEntry::new(key.clone(), slot.mode(), slot.hash()));
        }
        Tree::vault(entries)
    }

    pub fn hash(&self) -> Hash {
        self.tree().hash()
    }

    /// Write every loaded child, the sentinel and this vault's tree
    pub fn write(&self) -> Result<Hash> {
        let (_, sentinel_blob) = sentinel_entry();
        self.store.put(&sentinel_blob)?;

        for slot in self.slots.values() {
            match slot {
                // Already in the store: it came from a stored tree
                Slot::Stored { .. } => {}
                Slot::List(list) => {
                    list.write(self.store.as_ref())?;
                }
                Slot::Vault(vault) => {
                    vault.write()?;
                }
            }
        }

        self.store.put(&Object::Tree(self.tree()))
    }

    /// Changes that turn `other` into this vault
    pub fn diff(&self, other: &SubVault) -> Result<Diff> {
        diff::diff(self, other)
    }

    /// Apply a diff; on error the vault is left untouched
    pub fn patch(&mut self, diff: &Diff) -> Result<()> {
        let mut next = self.clone();
        next.apply(diff, PatchMode::Strict)?;
        *self = next;
        Ok(())
    }

    pub(crate) fn apply(&mut self, diff: &Diff, mode: PatchMode) -> Result<()> {
        patch::apply(self, diff, mode)
    }

    /// Snapshot of the entry at a `/`-separated path, if it exists
    pub(crate) fn snapshot_at(&self, path: &str) -> Result<Option<Snapshot>> {
        let (head, rest) = split_path(path);
        if !self.contains_key(head) {
            return Ok(None);
        }
        match rest {
            None => Ok(Some(self.snapshot(head)?)),
            Some(rest) => match self.load_slot(head)? {
                Loaded::Vault(vault) => vault.snapshot_at(rest),
                Loaded::List(_) => Ok(None),
            },
        }
    }

    /// Make the entry at a path equal `snapshot`, or remove it for `None`,
    /// creating intermediate vaults as needed
    pub(crate) fn replace_at(&mut self, path: &str, snapshot: Option<&Snapshot>) -> Result<()> {
        let (head, rest) = split_path(path);
        match (rest, snapshot) {
            (None, Some(snapshot)) => self.put_snapshot(head, snapshot),
            (None, None) => {
                self.remove_entry(head);
                Ok(())
            }
            (Some(rest), snapshot) => {
                let is_vault = self.slots.get(head).map(Slot::mode) == Some(EntryMode::Vault);
                if !is_vault {
                    if snapshot.is_none() {
                        return Ok(());
                    }
                    self.set_vault(head)?;
                }
                self.vault(head)?.replace_at(rest, snapshot)
            }
        }
    }

    fn put_slot(&mut self, key: &str, slot: Slot) {
        if self.slots.insert(key.to_string(), slot).is_none() {
            self.order.push(key.to_string());
        }
    }

    fn materialize(&mut self, key: &str) -> Result<Entry<'_>> {
        let qualified = self.qualified(key);
        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| Error::KeyNotFound(qualified.clone()))?;

        if let Slot::Stored { mode, hash } = *slot {
            *slot = match mode {
                EntryMode::List => Slot::List(List::load(self.store.as_ref(), qualified, &hash)?),
                EntryMode::Vault => Slot::Vault(SubVault::load(self.store.clone(), qualified, &hash)?),
                EntryMode::Record => {
                    return Err(Error::CorruptObject(format!("bare record at {}", qualified)))
                }
            };
        }

        match slot {
            Slot::List(list) => Ok(Entry::List(list)),
            Slot::Vault(vault) => Ok(Entry::Vault(vault)),
            Slot::Stored { hash, .. } => Err(Error::CorruptObject(format!(
                "entry {} still unloaded ({})",
                key,
                hash.short()
            ))),
        }
    }

    fn load_slot(&self, key: &str) -> Result<Loaded<'_>> {
        let qualified = self.qualified(key);
        match self.slots.get(key) {
            None => Err(Error::KeyNotFound(qualified)),
            Some(Slot::List(list)) => Ok(Loaded::List(Cow::Borrowed(list))),
            Some(Slot::Vault(vault)) => Ok(Loaded::Vault(Cow::Borrowed(vault))),
            Some(Slot::Stored { mode, hash }) => match mode {
                EntryMode::List => Ok(Loaded::List(Cow::Owned(List::load(
                    self.store.as_ref(),
                    qualified,
                    hash,
                )?))),
                EntryMode::Vault => Ok(Loaded::Vault(Cow::Owned(SubVault::load(
                    self.store.clone(),
                    qualified,
                    hash,
                )?))),
                EntryMode::Record => Err(Error::CorruptObject(format!("bare record at {}", qualified))),
            },
        }
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

impl fmt::Debug for SubVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubVault")
            .field("path", &self.path)
            .field("keys", &self.order)
            .finish()
    }
}

impl Diffable for SubVault {
    fn content_hash(&self) -> Hash {
        self.hash()
    }

    fn entry_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn entry_hash(&self, key: &str) -> Option<Hash> {
        self.slots.get(key).map(Slot::hash)
    }

    fn snapshot_entry(&self, key: &str) -> Result<Snapshot> {
        self.snapshot(key)
    }

    fn diff_entry(&self, other: &Self, key: &str) -> Result<Change> {
        let mine = self.load_slot(key)?;
        let theirs = other.load_slot(key)?;
        Ok(match (&mine, &theirs) {
            (Loaded::List(a), Loaded::List(b)) => Change::List(a.diff(b)?),
            (Loaded::Vault(a), Loaded::Vault(b)) => Change::Vault(a.diff(b)?),
            // Kind changed: replace the whole entry
            _ => Change::Replaced(mine.snapshot()?),
        })
    }
}

impl Patchable for SubVault {
    fn qualified(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.path, key)
        }
    }

    fn has_entry(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn remove_entry(&mut self, key: &str) {
        if self.slots.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn put_snapshot(&mut self, key: &str, snapshot: &Snapshot) -> Result<()> {
        validate_name(key)?;
        let qualified = self.qualified(key);
        let slot = match snapshot {
            Snapshot::List(records) => {
                Slot::List(List::from_records(qualified, records.iter().cloned())?)
            }
            Snapshot::Vault(entries) => {
                Slot::Vault(SubVault::from_snapshot(self.store.clone(), qualified, entries)?)
            }
            Snapshot::Record(_) => return Err(Error::EntryKindMismatch(qualified)),
        };
        self.put_slot(key, slot);
        Ok(())
    }

    fn patch_entry(&mut self, key: &str, change: &Change, mode: PatchMode) -> Result<()> {
        match change {
            Change::Replaced(snapshot) => self.put_snapshot(key, snapshot),
            Change::List(nested) => match self.materialize(key)? {
                Entry::List(list) => list.apply(nested, mode),
                Entry::Vault(_) => kind_mismatch(self, key, mode),
            },
            Change::Vault(nested) => match self.materialize(key)? {
                Entry::Vault(vault) => vault.apply(nested, mode),
                Entry::List(_) => kind_mismatch(self, key, mode),
            },
        }
    }

    /// Vault trees are unordered
    fn reorder(&mut self, _order: &[String]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::diff::DiffEntry;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn vault() -> SubVault {
        SubVault::empty(Arc::new(MemoryStore::new()), "")
    }

    #[test]
    fn test_set_get_delete() {
        let mut v = vault();
        v.set("x", vec![json!(1), json!(2)]).unwrap();
        assert_eq!(v.list("x").unwrap().len(), 2);

        v.delete("x").unwrap();
        assert!(matches!(v.delete("x"), Err(Error::KeyNotFound(_))));
        assert!(matches!(v.get("x"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_keys_in_insertion_order() {
        let mut v = vault();
        v.set("b", vec![]).unwrap();
        v.set("a", vec![]).unwrap();
        v.set_vault("c").unwrap();
        v.set("b", vec![json!(1)]).unwrap();
        assert_eq!(v.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_sentinel_is_reserved() {
        let mut v = vault();
        assert!(matches!(v.set(".vault", vec![]), Err(Error::InvalidKey(_))));
        assert!(v.tree().get(".vault").is_some());
        assert_eq!(v.keys().count(), 0);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut v = vault();
        v.set("x", vec![]).unwrap();
        assert!(matches!(v.vault("x"), Err(Error::EntryKindMismatch(k)) if k == "x"));
    }

    #[test]
    fn test_write_then_lazy_load() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let mut v = SubVault::empty(store.clone(), "");
        v.set("x", vec![json!(1)]).unwrap();
        v.set_vault("team")
            .unwrap()
            .set_records("people", vec![("ann", json!({"age": 30}))])
            .unwrap();

        let hash = v.write().unwrap();
        assert_eq!(hash, v.hash());

        let mut loaded = SubVault::load(store, "", &hash).unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["team", "x"]);
        assert_eq!(loaded.hash(), hash);

        let people = loaded.vault("team").unwrap().list("people").unwrap();
        assert_eq!(people.name(), "team/people");
        assert_eq!(people.get("ann").unwrap(), &json!({"age": 30}));
        assert_eq!(loaded.hash(), hash);
    }

    #[test]
    fn test_diff_added_removed_modified() {
        let mut a = vault();
        a.set("x", vec![json!(1), json!(2), json!(3)]).unwrap();
        a.set("y", vec![json!(9)]).unwrap();

        let mut b = vault();
        b.set("x", vec![json!(1), json!(2)]).unwrap();
        b.set("z", vec![]).unwrap();

        let d = a.diff(&b).unwrap();
        assert_eq!(d.entries.len(), 3);
        assert_eq!(d.entries[0], DiffEntry::Removed(vec!["z".into()]));
        assert!(matches!(&d.entries[1], DiffEntry::Added(items) if items[0].0 == "y"));
        assert!(matches!(&d.entries[2], DiffEntry::Modified(k, Change::List(_)) if k == "x"));

        b.patch(&d).unwrap();
        assert_eq!(b.hash(), a.hash());
    }

    #[test]
    fn test_kind_change_is_a_replace() {
        let mut a = vault();
        a.set_vault("x").unwrap().set("inner", vec![json!(1)]).unwrap();
        let mut b = vault();
        b.set("x", vec![json!(1)]).unwrap();

        let d = a.diff(&b).unwrap();
        assert!(matches!(
            &d.entries[..],
            [DiffEntry::Modified(k, Change::Replaced(Snapshot::Vault(_)))] if k == "x"
        ));

        b.patch(&d).unwrap();
        assert_eq!(b.hash(), a.hash());
    }

    #[test]
    fn test_strict_patch_reports_missing_and_duplicate() {
        let mut b = vault();
        b.set("x", vec![]).unwrap();

        let remove_missing = Diff::new(vec![DiffEntry::Removed(vec!["nope".into()])]);
        assert!(matches!(b.patch(&remove_missing), Err(Error::KeyNotFound(_))));

        let add_existing = Diff::new(vec![DiffEntry::Added(vec![(
            "x".into(),
            Snapshot::List(vec![]),
        )])]);
        assert!(matches!(b.patch(&add_existing), Err(Error::DuplicateEntryKey(_))));
    }

    #[test]
    fn test_replace_at_creates_intermediate_vaults() {
        let mut v = vault();
        v.replace_at("a/b/c", Some(&Snapshot::List(vec![("k".into(), json!(1))])))
            .unwrap();
        assert_eq!(
            v.snapshot_at("a/b/c").unwrap(),
            Some(Snapshot::List(vec![("k".into(), json!(1))]))
        );

        v.replace_at("a/b/c", None).unwrap();
        assert_eq!(v.snapshot_at("a/b/c").unwrap(), None);
        assert!(v.vault("a").unwrap().contains_key("b"));
    }
}
