//! Git-like operations: diff, patch, branch, ancestor search, merge

mod ancestor;
mod branch;
pub(crate) mod diff;
pub(crate) mod merge;
pub(crate) mod patch;
mod reachable;

pub use ancestor::common_ancestor;
pub use branch::BranchManager;
pub use diff::{Change, Diff, DiffEntry, Snapshot};
pub use merge::MergeReport;
pub use patch::PatchMode;
pub use reachable::{reachable_closure, ReachableObjects};
