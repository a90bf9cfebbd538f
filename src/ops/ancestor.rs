//! Nearest common ancestor of several commits
//!
//! Every root gets its own breadth-first frontier over the parent relation.
//! The frontiers advance in lock-step, one parent hop per round, and the walk
//! ends as soon as some commit has been visited from every root. A frontier
//! that runs out of parents is stopped; when all of them are stopped without
//! meeting, there is no common ancestor.

use crate::model::Hash;
use crate::store::ObjectStore;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

struct Frontier {
    visited: HashSet<Hash>,
    /// Commits reached in the last hop
    layer: Vec<Hash>,
    stopped: bool,
}

impl Frontier {
    fn new(root: Hash) -> Self {
        Frontier {
            visited: HashSet::from([root]),
            layer: vec![root],
            stopped: false,
        }
    }

    fn advance(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let mut next = Vec::new();
        for hash in &self.layer {
            for parent in store.get_commit(hash)?.parents {
                if self.visited.insert(parent) {
                    next.push(parent);
                }
            }
        }
        self.stopped = next.is_empty();
        self.layer = next;
        Ok(())
    }
}

/// Find the nearest commit reachable from every root
///
/// When several commits are found in the same round, the smallest hash wins
/// so the result does not depend on the order of `roots`.
pub fn common_ancestor(store: &dyn ObjectStore, roots: &[Hash]) -> Result<Hash> {
    if roots.is_empty() {
        return Err(Error::NoCommonAncestor);
    }

    let mut frontiers: Vec<Frontier> = roots.iter().copied().map(Frontier::new).collect();
    let mut hops = 0usize;

    loop {
        if let Some(found) = meeting_point(&frontiers) {
            debug!(ancestor = %found.short(), hops, "found common ancestor");
            return Ok(found);
        }

        if frontiers.iter().all(|f| f.stopped) {
            debug!(hops, "frontiers exhausted");
            return Err(Error::NoCommonAncestor);
        }

        for frontier in frontiers.iter_mut().filter(|f| !f.stopped) {
            frontier.advance(store)?;
        }
        hops += 1;
    }
}

fn meeting_point(frontiers: &[Frontier]) -> Option<Hash> {
    let (first, rest) = frontiers.split_first()?;
    first
        .visited
        .iter()
        .filter(|hash| rest.iter().all(|f| f.visited.contains(*hash)))
        .min()
        .copied()
}
