use smallvec::SmallVec;

use super::ChangeId;
use crate::svn::{NodeKind, Rev};

/// Lower bound of every recorded revision range.
pub(crate) const SINCE_EVER: Rev = 0;
/// First revision of a repository.
pub(crate) const FIRST: Rev = 1;
/// Upper bound of a node that is still alive.
pub(crate) const HEAD: Rev = Rev::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct NodeId(pub(super) u32);

impl NodeId {
    #[inline]
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Life-span of one path between its creation and its deletion.
///
/// Nodes of the same path form a chain through `before` and `later`, with
/// strictly increasing, non-overlapping revision ranges.
#[derive(Debug)]
pub(crate) struct Node {
    pub(super) kind: NodeKind,
    pub(super) path: String,
    pub(super) rev_min: Rev,
    pub(super) rev_max: Rev,
    pub(super) changes: SmallVec<[ChangeId; 4]>,
    pub(super) before: Option<NodeId>,
    pub(super) later: Option<NodeId>,
    pub(super) copy_from: Option<(NodeId, Rev)>,
}

impl Node {
    pub(super) fn new(kind: NodeKind, path: String, rev_min: Rev, rev_max: Rev) -> Self {
        Self {
            kind,
            path,
            rev_min,
            rev_max,
            changes: SmallVec::new(),
            before: None,
            later: None,
            copy_from: None,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    #[inline]
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn rev_min(&self) -> Rev {
        self.rev_min
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn rev_max(&self) -> Rev {
        self.rev_max
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.rev_max == HEAD
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn contains(&self, rev: Rev) -> bool {
        self.rev_min <= rev && rev <= self.rev_max
    }

    /// Changes recorded directly on this node, without the ones inherited
    /// through `copy_from`.
    #[cfg(test)]
    pub(crate) fn own_changes(&self) -> &[ChangeId] {
        &self.changes
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn before(&self) -> Option<NodeId> {
        self.before
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn later(&self) -> Option<NodeId> {
        self.later
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn copy_from(&self) -> Option<(NodeId, Rev)> {
        self.copy_from
    }

    /// Path prefix shared by every descendant of this node.
    pub(crate) fn dir_prefix(&self) -> String {
        dir_prefix(&self.path)
    }
}

pub(super) fn dir_prefix(path: &str) -> String {
    format!("{path}/")
}
