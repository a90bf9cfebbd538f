//! Applying a diff to a vault or list

use super::diff::{Change, Diff, DiffEntry, Snapshot};
use crate::{Error, Result};
use tracing::debug;

/// How a patch treats a target that is not in the diff's expected prior state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchMode {
    /// Missing keys, existing keys and kind mismatches are errors
    Strict,
    /// Later writes win: additions overwrite, removals of absent keys and
    /// nested changes to absent or re-kinded entries are skipped
    Overwrite,
}

/// A container a diff can be applied to
pub(crate) trait Patchable {
    /// Qualified name of `key`, for error messages
    fn qualified(&self, key: &str) -> String;

    fn has_entry(&self, key: &str) -> bool;

    fn remove_entry(&mut self, key: &str);

    /// Create or replace `key` from a snapshot, keeping its position if it
    /// already exists
    fn put_snapshot(&mut self, key: &str, snapshot: &Snapshot) -> Result<()>;

    /// Apply a same-kind nested change to an existing entry
    fn patch_entry(&mut self, key: &str, change: &Change, mode: PatchMode) -> Result<()>;

    fn reorder(&mut self, order: &[String]);
}

pub(crate) fn apply<T: Patchable>(target: &mut T, diff: &Diff, mode: PatchMode) -> Result<()> {
    for entry in diff {
        match entry {
            DiffEntry::Removed(keys) => {
                for key in keys {
                    if !target.has_entry(key) {
                        if mode == PatchMode::Strict {
                            return Err(Error::KeyNotFound(target.qualified(key)));
                        }
                        continue;
                    }
                    target.remove_entry(key);
                }
            }
            DiffEntry::Added(items) => {
                for (key, snapshot) in items {
                    if mode == PatchMode::Strict && target.has_entry(key) {
                        return Err(Error::DuplicateEntryKey(target.qualified(key)));
                    }
                    target.put_snapshot(key, snapshot)?;
                }
            }
            DiffEntry::Modified(key, change) => {
                if target.has_entry(key) {
                    target.patch_entry(key, change, mode)?;
                    continue;
                }
                match (mode, change) {
                    (PatchMode::Strict, _) => {
                        return Err(Error::KeyNotFound(target.qualified(key)));
                    }
                    (PatchMode::Overwrite, Change::Replaced(snapshot)) => {
                        target.put_snapshot(key, snapshot)?;
                    }
                    (PatchMode::Overwrite, Change::List(_) | Change::Vault(_)) => {
                        debug!(key = %target.qualified(key), "skipped nested change to absent entry");
                    }
                }
            }
            DiffEntry::Reordered(order) => target.reorder(order),
        }
    }
    Ok(())
}

/// The error for a change whose kind does not match the target entry
pub(crate) fn kind_mismatch<T: Patchable + ?Sized>(
    target: &T,
    key: &str,
    mode: PatchMode,
) -> Result<()> {
    match mode {
        PatchMode::Strict => Err(Error::EntryKindMismatch(target.qualified(key))),
        PatchMode::Overwrite => {
            debug!(key = %target.qualified(key), "skipped change to re-kinded entry");
            Ok(())
        }
    }
}
