//! Object closure for transport
//!
//! A push or fetch only has to ship the objects a peer is missing: those
//! reachable from the new commit but not from any commit the peer already
//! has.

use crate::model::{Hash, Object};
use crate::store::ObjectStore;
use crate::Result;
use std::collections::HashSet;
use tracing::debug;

/// Objects reachable from `from` but not from any of `excluding`
///
/// The excluded side is walked up front, visiting each distinct object once;
/// the result is then produced lazily, each commit before its tree and each
/// tree before its entries. The walk covers the whole excluded history: an
/// object an older excluded commit dropped and `from` brought back is still
/// known to the peer.
pub fn reachable_closure<'a>(
    store: &'a dyn ObjectStore,
    from: Hash,
    excluding: &[Hash],
) -> Result<ReachableObjects<'a>> {
    let mut seen = HashSet::new();
    let mut stack = excluding.to_vec();
    while let Some(hash) = stack.pop() {
        if !seen.insert(hash) {
            continue;
        }
        stack.extend(children(&store.get(&hash)?));
    }
    debug!(
        from = %from.short(),
        excluded = seen.len(),
        "walked excluded history"
    );

    Ok(ReachableObjects {
        store,
        seen,
        pending: vec![from],
    })
}

/// Lazy iterator returned by [`reachable_closure`]
pub struct ReachableObjects<'a> {
    store: &'a dyn ObjectStore,
    seen: HashSet<Hash>,
    pending: Vec<Hash>,
}

impl Iterator for ReachableObjects<'_> {
    type Item = Result<(Hash, Object)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(hash) = self.pending.pop() {
            if !self.seen.insert(hash) {
                continue;
            }
            return Some(match self.store.get(&hash) {
                Ok(object) => {
                    self.pending.extend(children(&object).into_iter().rev());
                    Ok((hash, object))
                }
                Err(e) => {
                    self.pending.clear();
                    Err(e)
                }
            });
        }
        None
    }
}

fn children(object: &Object) -> Vec<Hash> {
    match object {
        Object::Blob(_) => Vec::new(),
        Object::Tree(tree) => tree.entries.iter().map(|e| e.hash).collect(),
        Object::Commit(commit) => std::iter::once(commit.tree)
            .chain(commit.parents.iter().copied())
            .collect(),
    }
}
