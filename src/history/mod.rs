use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::FHashMap;
use crate::svn::{NodeKind, Rev};

mod builder;
mod change;
mod dependency;
mod node;
pub(crate) mod report;

pub(crate) use builder::{Direction, HistoryBuilder, KeyExtractor};
pub(crate) use change::{Change, ChangeId};
pub(crate) use dependency::{Dependency, DependencyBuilder};
pub(crate) use node::{FIRST, HEAD, Node, NodeId, SINCE_EVER};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HistoryError {
    DuplicateRevision {
        rev: Rev,
    },
    UnknownRevision {
        rev: Rev,
    },
    OutOfOrder {
        previous: Rev,
        rev: Rev,
    },
    OverlappingNodes {
        path: String,
        earlier: (Rev, Rev),
        later: (Rev, Rev),
    },
    MissingCopySource {
        path: String,
        rev: Rev,
    },
    DeadNodeChanged {
        path: String,
        rev: Rev,
    },
    #[cfg(test)]
    ConflictingRename {
        from: String,
        to: String,
        other: String,
    },
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn range(f: &mut std::fmt::Formatter<'_>, (min, max): (Rev, Rev)) -> std::fmt::Result {
            if max == HEAD {
                write!(f, "[r{min}, HEAD]")
            } else {
                write!(f, "[r{min}, r{max}]")
            }
        }

        match self {
            Self::DuplicateRevision { rev } => write!(f, "revision r{rev} recorded twice"),
            Self::UnknownRevision { rev } => write!(f, "no such revision: r{rev}"),
            Self::OutOfOrder { previous, rev } => {
                write!(f, "revision r{rev} received after r{previous}")
            }
            Self::OverlappingNodes {
                path,
                earlier,
                later,
            } => {
                write!(f, "overlapping histories of {path:?}: ")?;
                range(f, *earlier)?;
                write!(f, " and ")?;
                range(f, *later)
            }
            Self::MissingCopySource { path, rev } => {
                write!(f, "copy source not found: {path:?} in r{rev}")
            }
            Self::DeadNodeChanged { path, rev } => {
                write!(f, "{path:?} changed in r{rev} after being deleted")
            }
            #[cfg(test)]
            Self::ConflictingRename { from, to, other } => write!(
                f,
                "{from:?} renamed to both {to:?} and {other:?}",
            ),
        }
    }
}

/// Timeline of every path seen in a revision log, with the changes applied
/// to it and the copies it derives from.
pub(crate) struct History {
    start_revision: Rev,
    changes: Vec<Change>,
    change_by_rev: FHashMap<Rev, ChangeId>,
    nodes: Vec<Node>,
    // Head of the node chain of each path. Ordered so that all
    // descendants of a directory follow its `dir/` prefix.
    latest: BTreeMap<String, NodeId>,
}

impl History {
    /// `start_revision` is the oldest revision the log covers. Copy sources
    /// that cannot be found are only tolerated when it is above [`FIRST`].
    pub(crate) fn new(start_revision: Rev) -> Self {
        Self {
            start_revision,
            changes: Vec::new(),
            change_by_rev: FHashMap::default(),
            nodes: Vec::new(),
            latest: BTreeMap::new(),
        }
    }

    pub(crate) fn create_change(
        &mut self,
        revision: Rev,
        author: &str,
        message: &str,
        key: Option<String>,
    ) -> Result<ChangeId, HistoryError> {
        if self.change_by_rev.contains_key(&revision) {
            return Err(HistoryError::DuplicateRevision { rev: revision });
        }

        let id = ChangeId(u32::try_from(self.changes.len()).expect("too many changes"));
        self.changes.push(Change {
            revision,
            author: author.into(),
            message: message.into(),
            key,
        });
        self.change_by_rev.insert(revision, id);
        Ok(id)
    }

    #[inline]
    pub(crate) fn change(&self, id: ChangeId) -> &Change {
        &self.changes[id.0 as usize]
    }

    #[inline]
    pub(crate) fn change_id(&self, rev: Rev) -> Option<ChangeId> {
        self.change_by_rev.get(&rev).copied()
    }

    pub(crate) fn get_change(&self, rev: Rev) -> Result<&Change, HistoryError> {
        self.change_id(rev)
            .map(|id| self.change(id))
            .ok_or(HistoryError::UnknownRevision { rev })
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Most recent node recorded for `path`, alive or not.
    pub(crate) fn get_node(&self, path: &str) -> Option<NodeId> {
        self.latest.get(path).copied()
    }

    pub(crate) fn added_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        change: ChangeId,
        copy_from: Option<(&str, Rev)>,
    ) -> Result<NodeId, HistoryError> {
        let rev = self.change(change).revision;

        if let Some(existing) = self.get_node(path) {
            if self.node(existing).is_alive() {
                // A filtered log may contain the creation of a path without
                // its preceding deletion.
                tracing::debug!("{path:?} added in r{rev} while still alive");
                self.mark_deleted(existing, change)?;
            }
        }

        let node = self.create_node(kind, path, rev, HEAD)?;
        self.node_mut(node).changes.push(change);

        if let Some((copy_path, copy_rev)) = copy_from {
            let copy_node = self.mk_node(kind, copy_path, copy_rev)?;
            self.node_mut(node).copy_from = Some((copy_node, copy_rev));
        }

        Ok(node)
    }

    pub(crate) fn modified_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        change: ChangeId,
    ) -> Result<NodeId, HistoryError> {
        let node = self.mk_node(kind, path, HEAD)?;
        self.modify(node, change)?;
        Ok(node)
    }

    pub(crate) fn deleted_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        change: ChangeId,
    ) -> Result<NodeId, HistoryError> {
        let rev = self.change(change).revision;
        if let Some(existing) = self.get_node(path) {
            let existing_node = self.node(existing);
            if existing_node.rev_max == rev - 1 && existing_node.changes.last() == Some(&change) {
                // Already deleted along with its parent in this revision
                return Ok(existing);
            }
        }

        let node = self.mk_node(kind, path, HEAD)?;
        self.mark_deleted(node, change)?;
        Ok(node)
    }

    /// Attaches `change` to the node of `path`, creating one that spans the
    /// whole history if there is none. Used when the changes are collected
    /// without tracking node life-spans.
    #[cfg(test)]
    pub(crate) fn touch_node(&mut self, kind: NodeKind, path: &str, change: ChangeId) -> NodeId {
        let node = match self.get_node(path) {
            Some(node) => node,
            None => {
                let id = self.push_node(Node::new(kind, path.into(), SINCE_EVER, HEAD));
                self.latest.insert(path.into(), id);
                id
            }
        };

        let node_data = self.node_mut(node);
        if node_data.kind == NodeKind::Unknown {
            node_data.kind = kind;
        }
        node_data.changes.push(change);
        node
    }

    fn modify(&mut self, node: NodeId, change: ChangeId) -> Result<(), HistoryError> {
        let node_data = &self.nodes[node.index()];
        if !node_data.is_alive() {
            return Err(HistoryError::DeadNodeChanged {
                path: node_data.path.clone(),
                rev: self.change(change).revision,
            });
        }
        self.node_mut(node).changes.push(change);
        Ok(())
    }

    fn kill(&mut self, node: NodeId, change: ChangeId) -> Result<(), HistoryError> {
        self.modify(node, change)?;
        let rev = self.change(change).revision;
        self.node_mut(node).rev_max = rev - 1;
        Ok(())
    }

    fn mark_deleted(&mut self, node: NodeId, change: ChangeId) -> Result<(), HistoryError> {
        self.kill(node, change)?;

        if self.node(node).kind != NodeKind::File {
            let prefix = self.node(node).dir_prefix();
            let children: Vec<NodeId> = self
                .latest
                .range::<str, _>((Bound::Excluded(prefix.as_str()), Bound::Unbounded))
                .take_while(|(child_path, _)| child_path.starts_with(&prefix))
                .map(|(_, &child)| child)
                .filter(|&child| self.node(child).is_alive())
                .collect();
            for child in children {
                self.kill(child, change)?;
            }
        }

        Ok(())
    }

    fn mk_node(&mut self, kind: NodeKind, path: &str, rev: Rev) -> Result<NodeId, HistoryError> {
        match self.lookup_node(kind, path, rev)? {
            Some(node) => Ok(node),
            None => self.create_phantom_node(kind, path, rev),
        }
    }

    /// Bridges a gap in a partial log with a node that existed for as long
    /// as its neighbours in the chain allow.
    fn create_phantom_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        rev: Rev,
    ) -> Result<NodeId, HistoryError> {
        if self.start_revision <= FIRST {
            return Err(HistoryError::MissingCopySource {
                path: path.into(),
                rev,
            });
        }

        tracing::warn!("history of {path:?} in r{rev} not recorded, assuming it existed");
        let phantom = self.mk_historic_node(kind, path, rev, rev)?;

        let rev_max = match self.node(phantom).later {
            Some(later) => self.node(later).rev_min - 1,
            None => HEAD,
        };
        let rev_min = match self.node(phantom).before {
            Some(before) => self.node(before).rev_max + 1,
            None => SINCE_EVER,
        };
        let phantom_node = self.node_mut(phantom);
        phantom_node.rev_min = rev_min;
        phantom_node.rev_max = rev_max;

        Ok(phantom)
    }

    /// Resolves the live node of `path`, including paths that only exist
    /// implicitly as part of a copied directory.
    pub(crate) fn get_current_node(
        &mut self,
        kind: NodeKind,
        path: &str,
    ) -> Result<Option<NodeId>, HistoryError> {
        self.lookup_node(kind, path, HEAD)
    }

    pub(crate) fn lookup_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        rev: Rev,
    ) -> Result<Option<NodeId>, HistoryError> {
        let node = self.get_node(path);
        if let Some(in_rev) = node.and_then(|node| self.back_to_revision(node, rev)) {
            return Ok(Some(in_rev));
        }

        let Some(sep) = path.rfind('/') else {
            return Ok(None);
        };
        let parent_path = &path[..sep];
        let Some(parent) = self.lookup_node(NodeKind::Dir, parent_path, rev)? else {
            return Ok(None);
        };

        if rev == SINCE_EVER {
            return Ok(None);
        }

        let (parent_min, parent_max, parent_copy) = {
            let parent = self.node(parent);
            (parent.rev_min, parent.rev_max, parent.copy_from)
        };
        if node.is_some_and(|node| self.in_range(node, parent_min, parent_max).is_some()) {
            // An explicit node exists within the parent's life-span, so no
            // implicit one may be created next to it.
            return Ok(None);
        }

        let copy_from = match parent_copy {
            Some((parent_copy_node, parent_copy_rev)) => {
                let copy_path = format!("{}{}", self.node(parent_copy_node).path, &path[sep..]);
                self.lookup_node(kind, &copy_path, parent_copy_rev)?
                    .map(|copy_node| (copy_node, parent_copy_rev))
            }
            None => None,
        };
        if copy_from.is_none() && self.start_revision <= FIRST {
            // With a complete log, a path without a node of its own only
            // exists through the copy of its parent.
            return Ok(None);
        }

        let child = self.mk_historic_node(kind, path, parent_min, parent_max)?;
        self.node_mut(child).copy_from = copy_from;
        Ok(Some(child))
    }

    fn back_to_revision(&self, node: NodeId, rev: Rev) -> Option<NodeId> {
        self.in_range(node, rev, rev)
    }

    /// Walks the chain back from `node` to the most recent node starting
    /// no later than `rev_max`, if it also reaches `rev_min`.
    fn in_range(&self, mut node: NodeId, rev_min: Rev, rev_max: Rev) -> Option<NodeId> {
        while self.node(node).rev_min > rev_max {
            node = self.node(node).before?;
        }
        if self.node(node).rev_max < rev_min {
            return None;
        }
        Some(node)
    }

    fn mk_historic_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        rev_min: Rev,
        rev_max: Rev,
    ) -> Result<NodeId, HistoryError> {
        if rev_min == SINCE_EVER {
            if let Some(phantom) = self.lookup_node(kind, path, SINCE_EVER)? {
                self.node_mut(phantom).rev_max = rev_max;
                if let Some(later) = self.node(phantom).later {
                    self.check_before(phantom, later)?;
                }
                return Ok(phantom);
            }
        }
        self.create_node(kind, path, rev_min, rev_max)
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("too many nodes"));
        self.nodes.push(node);
        id
    }

    fn create_node(
        &mut self,
        kind: NodeKind,
        path: &str,
        rev_min: Rev,
        rev_max: Rev,
    ) -> Result<NodeId, HistoryError> {
        let node = self.push_node(Node::new(kind, path.into(), rev_min, rev_max));
        self.enter_node(node)?;
        Ok(node)
    }

    /// Links a new node into the chain of its path, keeping it ordered.
    fn enter_node(&mut self, node: NodeId) -> Result<(), HistoryError> {
        let path = self.node(node).path.clone();
        let Some(mut current) = self.get_node(&path) else {
            self.latest.insert(path, node);
            return Ok(());
        };

        let rev_min = self.node(node).rev_min;
        while rev_min < self.node(current).rev_min {
            match self.node(current).before {
                Some(before) => current = before,
                None => {
                    self.check_before(node, current)?;
                    self.link(node, current);
                    return Ok(());
                }
            }
        }

        let later = self.node(current).later;
        self.check_before(current, node)?;
        if let Some(later) = later {
            self.check_before(node, later)?;
        }

        self.link(current, node);
        match later {
            None => {
                self.latest.insert(path, node);
            }
            Some(later) => self.link(node, later),
        }
        Ok(())
    }

    fn link(&mut self, before: NodeId, later: NodeId) {
        self.node_mut(later).before = Some(before);
        self.node_mut(before).later = Some(later);
    }

    fn check_before(&self, before: NodeId, later: NodeId) -> Result<(), HistoryError> {
        let before = self.node(before);
        let later = self.node(later);
        if before.rev_max < later.rev_min {
            Ok(())
        } else {
            Err(HistoryError::OverlappingNodes {
                path: later.path.clone(),
                earlier: (before.rev_min, before.rev_max),
                later: (later.rev_min, later.rev_max),
            })
        }
    }

    /// All nodes of `path` and its descendants, in chain order from the
    /// oldest to the latest, for each path.
    pub(crate) fn chain(&self, path: &str) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.get_node(path);
        while let Some(node) = current {
            result.push(node);
            current = self.node(node).before;
        }
        result.reverse();
        result
    }

    /// Latest nodes of `path` and of every path below it.
    pub(crate) fn get_nodes(&self, path: &str) -> Vec<NodeId> {
        let prefix = node::dir_prefix(path.trim_end_matches('/'));
        self.get_node(path)
            .into_iter()
            .chain(
                self.latest
                    .range::<str, _>((Bound::Excluded(prefix.as_str()), Bound::Unbounded))
                    .take_while(|(child_path, _)| child_path.starts_with(&prefix))
                    .map(|(_, &child)| child),
            )
            .collect()
    }

    /// Every node that has at least one change of its own, ordered by path
    /// and then by time.
    pub(crate) fn touched_nodes(&self) -> Vec<NodeId> {
        let mut result = Vec::new();
        for path in self.latest.keys() {
            result.extend(
                self.chain(path)
                    .into_iter()
                    .filter(|&node| !self.node(node).changes.is_empty()),
            );
        }
        result
    }

    /// Changes of `node` including the ones inherited from the nodes it was
    /// copied from, up to the copy revision. Oldest first when the history
    /// was built oldest first.
    pub(crate) fn node_changes(&self, node: NodeId) -> Vec<ChangeId> {
        let mut result = Vec::new();
        self.collect_changes(node, HEAD, &mut result);
        result
    }

    fn collect_changes(&self, node: NodeId, up_to: Rev, out: &mut Vec<ChangeId>) {
        let node_data = self.node(node);
        if let Some((copy_node, copy_rev)) = node_data.copy_from {
            // Copies always refer to the past
            if copy_rev < node_data.rev_min {
                self.collect_changes(copy_node, copy_rev.min(up_to), out);
            }
        }
        out.extend(
            node_data
                .changes
                .iter()
                .copied()
                .filter(|&change| self.change(change).revision <= up_to),
        );
    }

    /// Nodes making up the contents of `path` at `rev`, including the ones
    /// that only exist as part of a copied directory.
    pub(crate) fn expand_contents(
        &mut self,
        path: &str,
        rev: Rev,
    ) -> Result<BTreeSet<NodeId>, HistoryError> {
        let mut result = BTreeSet::new();
        let mut current_nodes = self.get_nodes(path);
        current_nodes.reverse();

        for current in current_nodes {
            let Some(in_rev) = self.back_to_revision(current, rev) else {
                continue;
            };
            result.insert(in_rev);

            let node = self.node(in_rev);
            if node.kind == NodeKind::File {
                continue;
            }
            let Some((copy_node, copy_rev)) = node.copy_from else {
                continue;
            };
            let node_path = node.path.clone();
            let copy_path = self.node(copy_node).path.clone();

            for expanded in self.expand_contents(&copy_path, copy_rev)? {
                let expanded = self.node(expanded);
                if expanded.path.len() <= copy_path.len() {
                    continue;
                }
                let kind = expanded.kind;
                let transformed = format!("{node_path}{}", &expanded.path[copy_path.len()..]);
                if let Some(content) = self.lookup_node(kind, &transformed, rev)? {
                    result.insert(content);
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests;
