//! Three-way merge of vault states against a common base

use crate::model::Hash;
use crate::ops::patch::PatchMode;
use crate::subvault::SubVault;
use crate::{Error, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// Outcome of a successful merge
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// The common ancestor commit the deltas were taken against
    pub base: Hash,
    /// Heads whose changes were applied, in merge order
    pub merged: Vec<Hash>,
    /// Paths written by more than one incoming vault, resolved in favor of
    /// the later one
    pub overridden: Vec<String>,
}

/// Whether two touched paths overlap
///
/// Lists are merged as a unit, so paths overlap when they are equal or one
/// names a vault that contains the other.
pub(crate) fn paths_collide(a: &str, b: &str) -> bool {
    fn contains(outer: &str, inner: &str) -> bool {
        inner.len() > outer.len()
            && inner.starts_with(outer)
            && inner.as_bytes()[outer.len()] == b'/'
    }
    a == b || contains(a, b) || contains(b, a)
}

/// Apply each incoming vault's changes since `base` on top of `target`
///
/// Returns the merged vault and the overridden paths. `target` itself is
/// never modified, so a failure leaves the caller's state as it was.
pub(crate) fn merge_into(
    target: &SubVault,
    base: &SubVault,
    incoming: &[&SubVault],
    without_conflict: bool,
) -> Result<(SubVault, Vec<String>)> {
    let mode = if without_conflict {
        PatchMode::Overwrite
    } else {
        PatchMode::Strict
    };

    let mut result = target.clone();
    let mut written: Vec<String> = Vec::new();
    let mut overridden = Vec::new();

    for other in incoming {
        let delta = other.diff(base)?;
        let touched = delta.touched_paths();
        debug!(steps = delta.len(), touched = touched.len(), "applying merge delta");

        let collisions: Vec<String> = touched
            .iter()
            .filter(|path| written.iter().any(|w| paths_collide(path, w)))
            .cloned()
            .collect();

        if let Some(first) = collisions.first() {
            if !without_conflict {
                return Err(Error::Conflict(first.clone()));
            }
        }

        result.apply(&delta, mode)?;

        // The delta may have been merged into an earlier writer's entry;
        // make colliding paths match this vault exactly
        for path in &collisions {
            let snapshot = other.snapshot_at(path)?;
            result.replace_at(path, snapshot.as_ref())?;
            warn!(path = %path, "merge overrode an earlier change");
        }

        overridden.extend(collisions);
        written.extend(touched);
    }

    Ok((result, overridden))
}
