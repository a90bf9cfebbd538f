//! Structural diff between two vault or list states
//!
//! One algorithm serves both container kinds. It is parameterized by the
//! [`Diffable`] trait, which a vault implements over its keys and a list
//! implements over its records.

use crate::model::Hash;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// A full, self-contained copy of an entry
///
/// Embedded in diffs so a patch can recreate the entry without access to the
/// state the diff was taken from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snapshot {
    /// One list record
    Record(Value),
    /// A list: records in order, with their keys
    List(Vec<(String, Value)>),
    /// A vault: entries in vault order
    Vault(Vec<(String, Snapshot)>),
}

impl Snapshot {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Snapshot::Record(_) => "record",
            Snapshot::List(_) => "list",
            Snapshot::Vault(_) => "vault",
        }
    }
}

/// How an entry present on both sides changed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Both sides hold a list; the nested diff is over its records
    List(Diff),
    /// Both sides hold a nested vault; the nested diff is over its keys
    Vault(Diff),
    /// The entry is replaced wholesale: a record's new value, or an entry
    /// whose kind changed (list to vault or back)
    Replaced(Snapshot),
}

/// One step of a diff
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffEntry {
    Removed(Vec<String>),
    Added(Vec<(String, Snapshot)>),
    Modified(String, Change),
    /// Final key order of a list whose order changed
    Reordered(Vec<String>),
}

/// A diff: at most one `Removed`, at most one `Added`, then `Modified`
/// entries in key order, then (lists only) at most one `Reordered`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn new(entries: Vec<DiffEntry>) -> Self {
        Diff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiffEntry> {
        self.entries.iter()
    }

    /// Number of keys removed at this level
    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                DiffEntry::Removed(keys) => keys.len(),
                _ => 0,
            })
            .sum()
    }

    /// Number of keys added at this level
    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                DiffEntry::Added(items) => items.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified(..)))
            .count()
    }

    /// Vault key paths this diff writes to, with lists treated as atomic
    ///
    /// Paths are `/`-joined from the vault the diff applies to. A change
    /// anywhere inside a list reports the list's own path.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(self, "", &mut paths);
        paths
    }
}

fn collect_paths(diff: &Diff, prefix: &str, out: &mut Vec<String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    };

    for entry in &diff.entries {
        match entry {
            DiffEntry::Removed(keys) => out.extend(keys.iter().map(|k| join(k.as_str()))),
            DiffEntry::Added(items) => out.extend(items.iter().map(|(k, _)| join(k.as_str()))),
            DiffEntry::Modified(key, Change::Vault(nested)) => {
                collect_paths(nested, &join(key.as_str()), out)
            }
            DiffEntry::Modified(key, Change::List(_) | Change::Replaced(_)) => {
                out.push(join(key.as_str()))
            }
            // Vault trees are unordered; a reorder can only come from a list,
            // whose path the parent already reported
            DiffEntry::Reordered(_) => {}
        }
    }
}

impl IntoIterator for Diff {
    type Item = DiffEntry;
    type IntoIter = std::vec::IntoIter<DiffEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diff {
    type Item = &'a DiffEntry;
    type IntoIter = std::slice::Iter<'a, DiffEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A container the diff algorithm can walk
pub(crate) trait Diffable {
    /// Hash of the container's tree as it would be written now
    fn content_hash(&self) -> Hash;

    /// Entry names in container order
    fn entry_names(&self) -> Vec<String>;

    fn entry_hash(&self, key: &str) -> Option<Hash>;

    fn snapshot_entry(&self, key: &str) -> Result<Snapshot>;

    /// Describe how `key` differs; only called when the hashes differ
    fn diff_entry(&self, other: &Self, key: &str) -> Result<Change>;

    /// The order to restore when removing `removed` from `other` and then
    /// appending `added` does not reproduce this container's order
    fn reordering(&self, _other: &Self, _removed: &[String], _added: &[String]) -> Option<Vec<String>> {
        None
    }
}

/// Compute the changes that turn `other` into `this`
pub(crate) fn diff<T: Diffable>(this: &T, other: &T) -> Result<Diff> {
    if this.content_hash() == other.content_hash() {
        return Ok(Diff::default());
    }

    let mine = this.entry_names();
    let theirs = other.entry_names();
    let mine_set: HashSet<&str> = mine.iter().map(String::as_str).collect();
    let theirs_set: HashSet<&str> = theirs.iter().map(String::as_str).collect();

    let removed: Vec<String> = theirs
        .iter()
        .filter(|k| !mine_set.contains(k.as_str()))
        .cloned()
        .collect();
    let added: Vec<String> = mine
        .iter()
        .filter(|k| !theirs_set.contains(k.as_str()))
        .cloned()
        .collect();

    let mut entries = Vec::new();

    if !removed.is_empty() {
        entries.push(DiffEntry::Removed(removed.clone()));
    }

    if !added.is_empty() {
        let items = added
            .iter()
            .map(|key| Ok((key.clone(), this.snapshot_entry(key)?)))
            .collect::<Result<Vec<_>>>()?;
        entries.push(DiffEntry::Added(items));
    }

    for key in mine.iter().filter(|k| theirs_set.contains(k.as_str())) {
        if this.entry_hash(key) == other.entry_hash(key) {
            continue;
        }
        entries.push(DiffEntry::Modified(key.clone(), this.diff_entry(other, key)?));
    }

    if let Some(order) = this.reordering(other, &removed, &added) {
        entries.push(DiffEntry::Reordered(order));
    }

    debug!(
        removed = removed.len(),
        added = added.len(),
        steps = entries.len(),
        "computed diff"
    );

    Ok(Diff::new(entries))
}
