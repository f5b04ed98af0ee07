use std::collections::BTreeSet;
use std::rc::Rc;

use crate::path_pattern::PathFilter;
use crate::svn::log::{is_child, parent_path};
use crate::svn::{ChangeType, LogEntry, Rev};
use crate::{FHashMap, FHashSet};

mod mapping;
mod operation;
mod path;
mod vfs;


pub(crate) use mapping::ResourceMapping;
pub(crate) use operation::{
    CopySource, Depth, Merge, MergeOperation, Operation, TreeConflictAction,
};
pub(crate) use path::{BranchLayout, ChangedPath, Location, PathParser};
pub(crate) use vfs::{Snapshot, VirtualFs, WorkingCopy, Workspace};

/// Read access to the revision log of the repository merged from.
pub(crate) trait Repository {
    /// Prefix of every repository path in operation URLs.
    fn url(&self) -> &str;

    fn log_entry(&self, rev: Rev) -> Option<LogEntry>;

    /// Revisions in `[start, end]` that touch `path` or something below it,
    /// oldest first.
    fn log_range(&self, path: &str, start: Rev, end: Rev) -> Vec<LogEntry>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MergeError {
    OutsideBranch { path: String },
    NotABranch { path: String },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutsideBranch { path } => {
                write!(f, "path {path:?} does not match any branch directory")
            }
            Self::NotABranch { path } => write!(f, "path {path:?} is not a branch"),
        }
    }
}

#[derive(Default)]
pub(crate) struct MergeConfig {
    /// Replay copies and moves instead of merging whole modules.
    pub(crate) semantic_moves: bool,
    pub(crate) revert: bool,
    /// Applied to branch-relative resources.
    pub(crate) filter: PathFilter,
    /// Revisions that are only merged partially, with the resources to merge.
    pub(crate) include_paths: FHashMap<Rev, BTreeSet<String>>,
}

/// A changed path together with the revision changing it and the suffixes
/// (relative to the changed path) of the other paths that revision changed
/// below it.
struct ResourceChange {
    revision: Rev,
    change: ChangedPath,
    content: Vec<String>,
}

enum ChangeSetBuilder {
    /// One merge per touched module.
    CompleteModule { merged_modules: FHashSet<String> },
    /// Only the listed resources, each on its own.
    Partial { include: BTreeSet<String> },
}

/// Builds the operations replaying a revision of another branch in the
/// working copy of the target branch.
pub(crate) struct MergeHandler<'a> {
    config: MergeConfig,
    paths: PathParser,
    modules: BTreeSet<String>,
    mapping: ResourceMapping,
    repository: &'a dyn Repository,
    revisions: FHashMap<Rev, Option<Rc<LogEntry>>>,

    operations: Vec<Operation>,
    vfs: VirtualFs,
    cross_merged: FHashSet<String>,
    touched: BTreeSet<String>,
}

impl<'a> MergeHandler<'a> {
    pub(crate) fn new(
        config: MergeConfig,
        paths: PathParser,
        modules: BTreeSet<String>,
        mapping: ResourceMapping,
        repository: &'a dyn Repository,
    ) -> Self {
        Self {
            config,
            paths,
            modules,
            mapping,
            repository,
            revisions: FHashMap::default(),
            operations: Vec::new(),
            vfs: VirtualFs::default(),
            cross_merged: FHashSet::default(),
            touched: BTreeSet::new(),
        }
    }

    pub(crate) fn parse_merge(&mut self, entry: &LogEntry, wc: &dyn WorkingCopy) -> MergeOperation {
        self.operations.clear();
        self.vfs.clear();
        self.cross_merged.clear();
        self.touched.clear();
        // Copy chains rarely share revisions across changes
        self.revisions.clear();

        self.build_operations(entry, wc);

        MergeOperation {
            revision: entry.revision,
            operations: std::mem::take(&mut self.operations),
            touched: std::mem::take(&mut self.touched),
        }
    }

    fn build_operations(&mut self, entry: &LogEntry, wc: &dyn WorkingCopy) {
        match self.config.include_paths.get(&entry.revision).cloned() {
            Some(include) => {
                self.create_merges(entry, &mut ChangeSetBuilder::Partial { include }, false, wc);
            }
            None => {
                let has_moves = self.config.semantic_moves && self.handle_copies(entry, wc);
                let mut builder = ChangeSetBuilder::CompleteModule {
                    merged_modules: FHashSet::default(),
                };
                // Contents already arrived with the replayed copies, only
                // record the merge.
                self.create_merges(entry, &mut builder, has_moves, wc);
            }
        }
    }

    fn map_path(&self, original: &ChangedPath) -> Option<ChangedPath> {
        self.mapping
            .map(original.resource())
            .map(|resource| original.with_location(original.location.with_resource(resource)))
    }

    fn has_no_copies(&self, entry: &LogEntry) -> bool {
        entry.changed_paths.values().all(|path_entry| {
            path_entry.copy_from.is_none()
                && self.mapping.map(&self.paths.location(&path_entry.path).resource).is_none()
        })
    }

    /// Queues the copies and moves of `entry` together with the direct
    /// merges of the other changed paths.
    ///
    /// Returns whether there was anything to replay. Otherwise nothing is
    /// queued and the whole modules are merged instead.
    fn handle_copies(&mut self, entry: &LogEntry, wc: &dyn WorkingCopy) -> bool {
        if self.has_no_copies(entry) {
            return false;
        }

        let mut has_moves = false;

        let changes: Vec<ChangedPath> = entry
            .changed_paths
            .values()
            .map(|path_entry| self.paths.parse(path_entry))
            .collect();
        for (index, original) in changes.iter().enumerate() {
            if !original.location.is_branched() || !self.config.filter.accepts(original.resource())
            {
                continue;
            }

            let mapped = self.map_path(original);
            let target = mapped.as_ref().unwrap_or(original);
            if mapped.is_some() {
                has_moves = true;
            } else if !self.modules.contains(target.module()) {
                continue;
            }

            if self.ancestor_cross_merged(target.resource()) {
                // Came along with the copy of an ancestor
                continue;
            }

            let Some(copy_from) = original.copy_from.clone() else {
                let created = matches!(target.change_type, ChangeType::Added | ChangeType::Replaced);
                if target.is_dir() && created {
                    // Copied children are replayed on their own, so the
                    // directory must not come along with its contents.
                    let has_copied_children = changes[index + 1..].iter().any(|child| {
                        is_child(&child.location.path, &original.location.path)
                            && child.copy_from.is_some()
                    });
                    if has_copied_children {
                        if target.change_type == ChangeType::Replaced {
                            self.add_remove(target.resource());
                        }
                        self.add_operation(
                            target.resource(),
                            Operation::MkDir {
                                target: target.resource().into(),
                            },
                        );
                        self.vfs.mkdir(target.resource());
                        continue;
                    }
                }

                self.direct_merge(entry.revision, original, target, wc);
                continue;
            };

            has_moves = true;
            self.replay_copy(entry, original, target, copy_from, wc);
        }

        if !has_moves {
            self.operations.clear();
            self.touched.clear();
            self.vfs.clear();
            self.cross_merged.clear();
        }
        has_moves
    }

    fn replay_copy(
        &mut self,
        entry: &LogEntry,
        original: &ChangedPath,
        target: &ChangedPath,
        copy_from: (Location, Rev),
        wc: &dyn WorkingCopy,
    ) {
        let (chain, (src_orig, copied_revision)) =
            self.merge_sources(entry, original, copy_from, &target.location.branch);
        let Some(innermost) = chain.last() else {
            return;
        };
        let src_revision = innermost.revision;
        let intra_branch_copy = innermost.change.location.branch == src_orig.branch;

        let src_resource = self
            .mapping
            .map(&src_orig.resource)
            .unwrap_or_else(|| src_orig.resource.clone());
        let target_resource = target.resource().to_string();

        // Copies from modules outside the merge are taken from the
        // repository.
        let src_exists_before = intra_branch_copy
            && self.modules.contains(src_orig.module())
            && self.vfs.exists(&src_resource, wc);

        let intermediate_changes = if src_exists_before && copied_revision + 1 < src_revision {
            // The copy potentially is a revert
            self.repository
                .log_range(&src_orig.path, copied_revision + 1, src_revision - 1)
        } else {
            Vec::new()
        };

        let remove_before = target.change_type == ChangeType::Replaced
            && self.vfs.exists(&target_resource, wc);

        let no_op_copy = src_exists_before && src_resource == target_resource;
        if !no_op_copy {
            if remove_before {
                self.add_remove(&target_resource);
            }

            let source = if src_exists_before {
                CopySource::Local {
                    resource: src_resource.clone(),
                }
            } else {
                CopySource::Url {
                    url: self.url(&src_orig.path),
                    rev: copied_revision,
                }
            };
            // The deletion of a move source is replayed where it happened
            self.add_operation(
                &target_resource,
                Operation::Copy {
                    target: target_resource.clone(),
                    source,
                },
            );
            self.vfs.add_copy(&target_resource);
        }

        if !intermediate_changes.is_empty() {
            // The copy restores a version that is not alive anymore. There
            // is no way to tell which version of the working copy that
            // corresponds to, so the changes in between are reverted.
            tracing::warn!(
                "r{}: {:?} copied from r{copied_revision}, but changed until r{}, reverting in between",
                entry.revision,
                src_orig.path,
                src_revision - 1,
            );

            let start = src_revision - 1;
            let source_url = self.url(&src_orig.path);
            self.add_operation(
                &target_resource,
                Operation::Merge(Merge {
                    target: target_resource.clone(),
                    source_url,
                    peg: start,
                    start,
                    end: copied_revision,
                    ignore_ancestry: true,
                    record_only: false,
                    depth: Depth::Infinity,
                }),
            );

            for change in intermediate_changes.iter() {
                for path in change.changed_paths.keys() {
                    if is_child(path, &src_orig.path) {
                        let rewritten =
                            format!("{}{}", target.location.path, &path[src_orig.path.len()..]);
                        let resource = self.paths.location(&rewritten).resource;
                        self.touched.insert(resource);
                    }
                }
            }
        }

        // Content changes along the copy chain, starting at the original
        // intra-branch copy.
        for (n, change) in chain.iter().enumerate().rev() {
            let mut merge = self.merge_content_changes(&target_resource, change);
            if n == 0 {
                merge.depth = Depth::Empty;
            }
            self.add_operation(&target_resource, Operation::Merge(merge));
        }
    }

    /// Follows the copy of `original` back through other branches until it
    /// reaches a copy within a single branch.
    ///
    /// Returns the changes of the chain, the merged one first, together
    /// with the copy source of the last of them.
    fn merge_sources(
        &mut self,
        entry: &LogEntry,
        original: &ChangedPath,
        copy_from: (Location, Rev),
        branch: &str,
    ) -> (Vec<ResourceChange>, (Location, Rev)) {
        let mut chain = vec![resource_change(entry, original.clone())];
        let mut origin = copy_from;
        if origin.0.branch == branch {
            return (chain, origin);
        }

        loop {
            let (copy_location, copy_rev) = &origin;
            let Some(origin_entry) = self.load_revision(*copy_rev) else {
                tracing::warn!(
                    "r{}: copy source revision r{copy_rev} of {:?} not available",
                    entry.revision,
                    original.location.path,
                );
                break;
            };
            let Some(path_entry) = origin_entry.changed_paths.get(&copy_location.path) else {
                // Not created in that revision
                break;
            };
            let change = self.paths.parse(path_entry);
            let Some(next_origin) = change.copy_from.clone() else {
                // A plain add, nothing to replay
                break;
            };

            let intra_branch = next_origin.0.branch == copy_location.branch;
            chain.push(resource_change(&origin_entry, change));
            origin = next_origin;
            if intra_branch {
                break;
            }
        }

        (chain, origin)
    }

    fn load_revision(&mut self, rev: Rev) -> Option<Rc<LogEntry>> {
        let repository = self.repository;
        self.revisions
            .entry(rev)
            .or_insert_with(|| repository.log_entry(rev).map(Rc::new))
            .clone()
    }

    fn merge_content_changes(&mut self, target: &str, change: &ResourceChange) -> Merge {
        if change.change.is_dir() {
            for suffix in change.content.iter() {
                let resource = join_resource(target, suffix);
                self.touched.insert(resource);
            }
        }

        let revision = change.revision;
        let (start, end) = self.range(revision);
        Merge {
            target: target.into(),
            source_url: self.url(&change.change.location.path),
            peg: revision,
            start,
            end,
            ignore_ancestry: true,
            record_only: false,
            depth: Depth::Infinity,
        }
    }

    fn direct_merge(
        &mut self,
        revision: Rev,
        source: &ChangedPath,
        target: &ChangedPath,
        wc: &dyn WorkingCopy,
    ) {
        let created = matches!(target.change_type, ChangeType::Added | ChangeType::Replaced);
        if created && target.is_dir() {
            self.cross_merged.insert(target.resource().into());
        }

        // A merge of the whole module would conflict with the replayed
        // copies.
        if !self.modules.contains(target.resource()) {
            self.build_resource_merge(revision, source, target.resource(), false, true, wc);
        }
    }

    fn build_resource_merge(
        &mut self,
        revision: Rev,
        source: &ChangedPath,
        target: &str,
        record_only: bool,
        ignore_ancestry: bool,
        wc: &dyn WorkingCopy,
    ) {
        if source.is_dir() && source.change_type == ChangeType::Modified {
            // Property changes of the directory itself
            let operation = self.create_modification(
                revision,
                &source.location,
                target,
                record_only,
                ignore_ancestry,
                true,
                wc,
            );
            self.add_operation(target, operation);
        } else {
            self.add_merge_operations(revision, source, target, record_only, ignore_ancestry, wc);
        }
    }

    fn add_merge_operations(
        &mut self,
        revision: Rev,
        source: &ChangedPath,
        target: &str,
        record_only: bool,
        ignore_ancestry: bool,
        wc: &dyn WorkingCopy,
    ) {
        match source.change_type {
            ChangeType::Deleted => {
                if !record_only {
                    self.add_remove(target);
                }
                return;
            }
            ChangeType::Added | ChangeType::Replaced => {
                if !record_only {
                    if source.change_type == ChangeType::Replaced {
                        self.add_remove(target);
                    }
                    let operation = self.create_remote_add(revision, source, target, wc);
                    self.add_operation(target, operation);
                }
            }
            ChangeType::Modified => {}
        }

        let operation = self.create_modification(
            revision,
            &source.location,
            target,
            record_only,
            ignore_ancestry,
            false,
            wc,
        );
        self.add_operation(target, operation);
    }

    fn create_remote_add(
        &mut self,
        revision: Rev,
        source: &ChangedPath,
        target: &str,
        wc: &dyn WorkingCopy,
    ) -> Operation {
        if !self.vfs.exists(parent_path(target).unwrap_or(""), wc) {
            return Operation::TreeConflict {
                target: target.into(),
                action: TreeConflictAction::Added,
            };
        }

        self.vfs.add_copy(target);

        let source = match source.copy_from {
            None => CopySource::Url {
                url: self.url(&source.location.path),
                rev: revision,
            },
            Some((ref copy_location, copy_rev)) => CopySource::Url {
                url: self.url(&copy_location.path),
                rev: copy_rev,
            },
        };
        Operation::Copy {
            target: target.into(),
            source,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_modification(
        &self,
        revision: Rev,
        source: &Location,
        target: &str,
        record_only: bool,
        ignore_ancestry: bool,
        empty: bool,
        wc: &dyn WorkingCopy,
    ) -> Operation {
        if !self.vfs.exists(target, wc) {
            return Operation::TreeConflict {
                target: target.into(),
                action: TreeConflictAction::Edited,
            };
        }

        let (start, end) = self.range(revision);
        Operation::Merge(Merge {
            target: target.into(),
            source_url: self.url(&source.path),
            peg: end,
            start,
            end,
            ignore_ancestry: self.config.revert || ignore_ancestry,
            record_only,
            // Keeps merge info off the files below
            depth: if empty || record_only {
                Depth::Empty
            } else {
                Depth::Infinity
            },
        })
    }

    fn add_remove(&mut self, target: &str) {
        self.add_operation(
            target,
            Operation::Remove {
                target: target.into(),
            },
        );
        self.vfs.delete(target);
    }

    fn add_operation(&mut self, target: &str, operation: Operation) {
        self.operations.push(operation);
        self.touched.insert(target.into());
    }

    fn ancestor_cross_merged(&self, resource: &str) -> bool {
        if self.cross_merged.is_empty() {
            return false;
        }

        let mut resource = resource;
        loop {
            if self.cross_merged.contains(resource) {
                return true;
            }
            match parent_path(resource) {
                Some(parent) => resource = parent,
                None => return false,
            }
        }
    }

    fn create_merges(
        &mut self,
        entry: &LogEntry,
        builder: &mut ChangeSetBuilder,
        record_only: bool,
        wc: &dyn WorkingCopy,
    ) {
        for path_entry in entry.changed_paths.values() {
            let changed = self.paths.parse(path_entry);
            if !changed.location.is_branched() {
                let error = MergeError::OutsideBranch {
                    path: path_entry.path.clone(),
                };
                tracing::warn!("r{}: {error}, skipped", entry.revision);
                continue;
            }
            if !self.config.filter.accepts(changed.resource()) {
                continue;
            }

            self.build_merge(builder, entry.revision, &changed, record_only, wc);
        }
    }

    fn build_merge(
        &mut self,
        builder: &mut ChangeSetBuilder,
        revision: Rev,
        changed: &ChangedPath,
        record_only: bool,
        wc: &dyn WorkingCopy,
    ) {
        match builder {
            ChangeSetBuilder::CompleteModule { merged_modules } => {
                let module = changed.module();
                if !self.modules.contains(module) {
                    return;
                }
                if !record_only {
                    self.touched.insert(changed.resource().into());
                }
                if !merged_modules.insert(module.into()) {
                    return;
                }

                let location = changed.location.with_resource(module.into());
                let operation =
                    self.create_modification(revision, &location, module, record_only, false, false, wc);
                self.add_operation(module, operation);
            }
            ChangeSetBuilder::Partial { include } => {
                if !include.contains(changed.resource()) {
                    return;
                }
                self.add_merge_operations(revision, changed, changed.resource(), record_only, true, wc);
            }
        }
    }

    /// Revision range merging `revision`, or reverting it.
    fn range(&self, revision: Rev) -> (Rev, Rev) {
        if self.config.revert {
            (revision, revision - 1)
        } else {
            (revision - 1, revision)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.repository.url())
    }
}

fn resource_change(entry: &LogEntry, change: ChangedPath) -> ResourceChange {
    let mut content = Vec::new();
    if change.is_dir() {
        let dir = change.location.path.as_str();
        for path in entry.changed_paths.keys() {
            if is_child(path, dir) {
                content.push(path[dir.len()..].to_string());
            }
        }
    }
    ResourceChange {
        revision: entry.revision,
        change,
        content,
    }
}

fn join_resource(dir: &str, suffix: &str) -> String {
    if dir.is_empty() {
        suffix.trim_start_matches('/').into()
    } else {
        format!("{dir}{suffix}")
    }
}
