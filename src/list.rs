//! List - an ordered, named sequence of keyed records
//!
//! A list is persisted as a list tree whose entries point at one blob per
//! record. Each record blob holds the record's JSON value. Edits only touch
//! the in-memory list; nothing is written until the owning vault commits.

use crate::model::{
    content_hash, validate_name, EntryMode, Hash, Object, ObjectKind, Tree, TreeEntry, TreeKind,
};
use crate::ops::diff::{self, Change, Diff, Diffable, Snapshot};
use crate::ops::patch::{self, kind_mismatch, PatchMode, Patchable};
use crate::store::ObjectStore;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Key given to the `n`th positional record
pub fn positional_key(n: usize) -> String {
    format!("{:08}", n)
}

/// One record of a list, with the hash of its blob
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    key: String,
    value: Value,
    hash: Hash,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Value) -> Result<Self> {
        let key = key.into();
        validate_name(&key)?;
        let hash = content_hash(ObjectKind::Blob, &serde_json::to_vec(&value)?);
        Ok(Record { key, value, hash })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }
}

/// An ordered collection of records with unique keys
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    /// Qualified name within the vault, e.g. `team/people`
    name: String,
    records: Vec<Record>,
}

impl List {
    pub fn new(name: impl Into<String>) -> Self {
        List {
            name: name.into(),
            records: Vec::new(),
        }
    }

    /// Build a list of positional records
    pub fn from_values(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Self> {
        let records = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Record::new(positional_key(i), value))
            .collect::<Result<Vec<_>>>()?;
        Ok(List {
            name: name.into(),
            records,
        })
    }

    /// Build a list of keyed records, rejecting repeated keys
    pub fn from_records<K: Into<String>>(
        name: impl Into<String>,
        records: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Self> {
        let mut list = List::new(name);
        for (key, value) in records {
            list.insert(key, value)?;
        }
        Ok(list)
    }

    /// Load a list tree and all its record blobs
    pub fn load(store: &dyn ObjectStore, name: impl Into<String>, hash: &Hash) -> Result<Self> {
        let name = name.into();
        let tree = store.get_tree(hash)?;
        if tree.kind != TreeKind::List {
            return Err(Error::CorruptObject(format!(
                "{} is a {:?} tree, expected a list",
                hash.short(),
                tree.kind
            )));
        }

        let mut records = Vec::with_capacity(tree.entries.len());
        for entry in tree.entries {
            if entry.mode != EntryMode::Record {
                return Err(Error::CorruptObject(format!(
                    "list {} holds a {:?} entry",
                    name, entry.mode
                )));
            }
            let value = serde_json::from_slice(&store.get_blob(&entry.hash)?)?;
            records.push(Record {
                key: entry.name,
                value,
                hash: entry.hash,
            });
        }

        Ok(List { name, records })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|r| r.key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.records.iter().map(|r| &r.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.position(key)
            .map(|i| &self.records[i].value)
            .ok_or_else(|| Error::KeyNotFound(self.qualified(key)))
    }

    /// Append a new record; the key must not exist yet
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let record = Record::new(key, value)?;
        if self.contains_key(&record.key) {
            return Err(Error::DuplicateEntryKey(self.qualified(&record.key)));
        }
        self.records.push(record);
        Ok(())
    }

    /// Replace a record's value in place, or append it if the key is new
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let record = Record::new(key, value)?;
        match self.position(&record.key) {
            Some(i) => self.records[i] = record,
            None => self.records.push(record),
        }
        Ok(())
    }

    /// Append a record under the next free positional key
    pub fn push(&mut self, value: Value) -> Result<String> {
        let mut n = self.records.len();
        while self.contains_key(&positional_key(n)) {
            n += 1;
        }
        let key = positional_key(n);
        self.records.push(Record::new(key.clone(), value)?);
        Ok(key)
    }

    pub fn delete(&mut self, key: &str) -> Result<Value> {
        let i = self
            .position(key)
            .ok_or_else(|| Error::KeyNotFound(self.qualified(key)))?;
        Ok(self.records.remove(i).value)
    }

    pub fn tree(&self) -> Tree {
        Tree::list(
            self.records
                .iter()
                .map(|r| TreeEntry::new(r.key.clone(), EntryMode::Record, r.hash))
                .collect(),
        )
    }

    pub fn hash(&self) -> Hash {
        self.tree().hash()
    }

    /// Write every record blob and the list tree
    pub fn write(&self, store: &dyn ObjectStore) -> Result<Hash> {
        for record in &self.records {
            store.put(&Object::Blob(serde_json::to_vec(&record.value)?))?;
        }
        store.put(&Object::Tree(self.tree()))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::List(
            self.records
                .iter()
                .map(|r| (r.key.clone(), r.value.clone()))
                .collect(),
        )
    }

    /// Changes that turn `other` into this list
    pub fn diff(&self, other: &List) -> Result<Diff> {
        diff::diff(self, other)
    }

    /// Apply a diff; on error the list is left untouched
    pub fn patch(&mut self, diff: &Diff) -> Result<()> {
        let mut next = self.clone();
        next.apply(diff, PatchMode::Strict)?;
        *self = next;
        Ok(())
    }

    pub(crate) fn apply(&mut self, diff: &Diff, mode: PatchMode) -> Result<()> {
        patch::apply(self, diff, mode)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }
}

impl Diffable for List {
    fn content_hash(&self) -> Hash {
        self.hash()
    }

    fn entry_names(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }

    fn entry_hash(&self, key: &str) -> Option<Hash> {
        self.position(key).map(|i| self.records[i].hash)
    }

    fn snapshot_entry(&self, key: &str) -> Result<Snapshot> {
        Ok(Snapshot::Record(self.get(key)?.clone()))
    }

    fn diff_entry(&self, _other: &Self, key: &str) -> Result<Change> {
        Ok(Change::Replaced(self.snapshot_entry(key)?))
    }

    fn reordering(&self, other: &Self, removed: &[String], added: &[String]) -> Option<Vec<String>> {
        let expected = other
            .keys()
            .filter(|k| !removed.iter().any(|r| r.as_str() == *k))
            .chain(added.iter().map(String::as_str));
        if expected.eq(self.keys()) {
            None
        } else {
            Some(self.entry_names())
        }
    }
}

impl Patchable for List {
    fn qualified(&self, key: &str) -> String {
        format!("{}[{}]", self.name, key)
    }

    fn has_entry(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn remove_entry(&mut self, key: &str) {
        self.records.retain(|r| r.key != key);
    }

    fn put_snapshot(&mut self, key: &str, snapshot: &Snapshot) -> Result<()> {
        match snapshot {
            Snapshot::Record(value) => self.set(key, value.clone()),
            Snapshot::List(_) | Snapshot::Vault(_) => {
                Err(Error::EntryKindMismatch(self.qualified(key)))
            }
        }
    }

    fn patch_entry(&mut self, key: &str, change: &Change, mode: PatchMode) -> Result<()> {
        match change {
            Change::Replaced(Snapshot::Record(value)) => self.set(key, value.clone()),
            Change::Replaced(_) | Change::List(_) | Change::Vault(_) => {
                kind_mismatch(self, key, mode)
            }
        }
    }

    /// Stable sort by position in `order`; keys it does not mention keep
    /// their relative order after the ones it does
    fn reorder(&mut self, order: &[String]) {
        let rank: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();
        self.records
            .sort_by_key(|r| rank.get(r.key.as_str()).copied().unwrap_or(usize::MAX));
    }
}
