use std::collections::{BTreeMap, BTreeSet};

use super::{ChangeId, History, HistoryError, NodeId};
use crate::FHashSet;
use crate::svn::{LogEntry, NodeKind};

/// Changes that must be ported before `change` to avoid conflicts.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Dependency {
    change: ChangeId,
    /// Missing change, mapped to the files where it is expected to conflict.
    required: BTreeMap<ChangeId, BTreeSet<NodeId>>,
}

impl Dependency {
    fn new(change: ChangeId) -> Self {
        Self {
            change,
            required: BTreeMap::new(),
        }
    }

    #[inline]
    pub(crate) fn change(&self) -> ChangeId {
        self.change
    }

    #[inline]
    pub(crate) fn required(&self) -> &BTreeMap<ChangeId, BTreeSet<NodeId>> {
        &self.required
    }

    fn add(&mut self, required: &[ChangeId], on_node: NodeId) {
        for &change in required {
            self.required.entry(change).or_default().insert(on_node);
        }
    }
}

/// Finds changes on the source branch that were not merged, are not present
/// on the target branch and precede a merged change on the same file.
pub(crate) struct DependencyBuilder<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    dependencies: BTreeMap<ChangeId, Dependency>,
}

impl<'a> DependencyBuilder<'a> {
    pub(crate) fn new(source_branch: &'a str, target_branch: &'a str) -> Self {
        Self {
            source_branch,
            target_branch,
            dependencies: BTreeMap::new(),
        }
    }

    pub(crate) fn analyze_conflicts(
        &mut self,
        history: &mut History,
        merged: &[&LogEntry],
    ) -> Result<(), HistoryError> {
        let mut merged_changes = FHashSet::default();
        let mut merged_paths = FHashSet::<&str>::default();
        for entry in merged.iter() {
            merged_paths.extend(entry.changed_paths.keys().map(String::as_str));
            history.get_change(entry.revision)?;
            merged_changes.insert(entry.revision);
        }

        for node in history.touched_nodes() {
            let node_data = history.node(node);
            // Only files are checked: directories only conflict in their
            // properties, mostly in mergeinfo, which resolves automatically.
            if node_data.kind() != NodeKind::File || !node_data.is_alive() {
                continue;
            }
            if !merged_paths.contains(node_data.path()) {
                continue;
            }
            let Some(rest) = node_data
                .path()
                .strip_prefix(self.source_branch)
                .filter(|rest| rest.starts_with('/'))
            else {
                continue;
            };

            let target_path = format!("{}{rest}", self.target_branch);
            let target_keys: FHashSet<String> =
                match history.get_current_node(NodeKind::File, &target_path)? {
                    // Not present on the target branch, every change that has
                    // not been ported is missing.
                    None => FHashSet::default(),
                    Some(target_node) => history
                        .node_changes(target_node)
                        .into_iter()
                        .filter_map(|change| history.change(change).key.clone())
                        .collect(),
                };

            let mut changes = history.node_changes(node);
            changes.sort_by_key(|&change| history.change(change).revision);

            let mut pending = Vec::new();
            for change in changes {
                let change_data = history.change(change);
                if merged_changes.contains(&change_data.revision) {
                    if !pending.is_empty() {
                        self.dependencies
                            .entry(change)
                            .or_insert_with(|| Dependency::new(change))
                            .add(&pending, node);
                    }
                } else if !change_data
                    .key
                    .as_ref()
                    .is_some_and(|key| target_keys.contains(key))
                {
                    pending.push(change);
                }
            }
        }

        Ok(())
    }

    pub(crate) fn finish(self) -> BTreeMap<ChangeId, Dependency> {
        self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::DependencyBuilder;
    use crate::history::{Direction, FIRST, History, HistoryBuilder};
    use crate::svn::log::CopyFrom;
    use crate::svn::{ChangeType, LogEntry, LogEntryPath, NodeKind, Rev};

    /// Ports carry the revision they were ported from as `port of N`.
    fn port_key(entry: &LogEntry) -> Option<String> {
        Some(match entry.message.strip_prefix("port of ") {
            Some(origin) => origin.to_string(),
            None => entry.revision.to_string(),
        })
    }

    fn entry(rev: Rev, message: &str, paths: &[(&str, ChangeType, NodeKind, Option<(&str, Rev)>)]) -> LogEntry {
        let mut entry = LogEntry::new(rev);
        entry.message = message.into();
        for &(path, change_type, kind, copy_from) in paths {
            entry.changed_paths.insert(
                path.into(),
                LogEntryPath {
                    path: path.into(),
                    change_type,
                    kind,
                    copy_from: copy_from.map(|(path, rev)| CopyFrom {
                        path: path.into(),
                        rev,
                    }),
                },
            );
        }
        entry
    }

    fn modify(rev: Rev, message: &str, path: &str) -> LogEntry {
        entry(rev, message, &[(path, ChangeType::Modified, NodeKind::File, None)])
    }

    fn log() -> Vec<LogEntry> {
        use ChangeType::Added;
        use NodeKind::{Dir, File};

        vec![
            entry(
                1,
                "initial",
                &[
                    ("/trunk", Added, Dir, None),
                    ("/trunk/mod", Added, Dir, None),
                    ("/trunk/mod/f", Added, File, None),
                    ("/trunk/mod/g", Added, File, None),
                ],
            ),
            entry(
                2,
                "branch",
                &[
                    ("/branches", Added, Dir, None),
                    ("/branches/b1", Added, Dir, Some(("/trunk", 1))),
                ],
            ),
            modify(3, "refactoring", "/trunk/mod/f"),
            modify(4, "fix f", "/trunk/mod/f"),
            modify(5, "fix g", "/trunk/mod/g"),
            modify(6, "already ported", "/trunk/mod/f"),
            modify(7, "port of 6", "/branches/b1/mod/f"),
            modify(8, "fix f again", "/trunk/mod/f"),
            entry(9, "new file", &[("/trunk/mod/h", Added, File, None)]),
            modify(10, "fix h", "/trunk/mod/h"),
        ]
    }

    #[test]
    fn test_missing_changes() {
        let log = log();
        let mut builder = HistoryBuilder::new(FIRST, Direction::Forward, &port_key);
        for entry in log.iter() {
            builder.handle_log_entry(entry).unwrap();
        }
        let mut history = builder.finish();

        let merged: Vec<&LogEntry> = log
            .iter()
            .filter(|entry| [4, 5, 8, 10].contains(&entry.revision))
            .collect();
        let mut dependencies = DependencyBuilder::new("/trunk", "/branches/b1");
        dependencies.analyze_conflicts(&mut history, &merged).unwrap();
        let dependencies = dependencies.finish();

        let rev = |history: &History, change| history.change(change).revision;
        let summary: Vec<(u64, Vec<(u64, BTreeSet<String>)>)> = dependencies
            .values()
            .map(|dependency| {
                (
                    rev(&history, dependency.change()),
                    dependency
                        .required()
                        .iter()
                        .map(|(&change, nodes)| {
                            (
                                rev(&history, change),
                                nodes
                                    .iter()
                                    .map(|&node| history.node(node).path().to_string())
                                    .collect(),
                            )
                        })
                        .collect(),
                )
            })
            .collect();

        let f = BTreeSet::from(["/trunk/mod/f".to_string()]);
        let h = BTreeSet::from(["/trunk/mod/h".to_string()]);
        assert_eq!(
            summary,
            [
                (4, vec![(3, f.clone())]),
                (8, vec![(3, f)]),
                (10, vec![(9, h)]),
            ],
        );
    }

    #[test]
    fn test_nothing_missing() {
        let log = log();
        let mut builder = HistoryBuilder::new(FIRST, Direction::Forward, &port_key);
        for entry in log.iter() {
            builder.handle_log_entry(entry).unwrap();
        }
        let mut history = builder.finish();

        // Every change of the merged files is merged or already ported
        let merged: Vec<&LogEntry> = log
            .iter()
            .filter(|entry| [3, 4, 5, 8].contains(&entry.revision))
            .collect();
        let mut dependencies = DependencyBuilder::new("/trunk", "/branches/b1");
        dependencies.analyze_conflicts(&mut history, &merged).unwrap();
        assert!(dependencies.finish().is_empty());
    }

    #[test]
    fn test_unknown_merged_revision() {
        let log = log();
        let mut builder = HistoryBuilder::new(FIRST, Direction::Forward, &port_key);
        for entry in log.iter().take(3) {
            builder.handle_log_entry(entry).unwrap();
        }
        let mut history = builder.finish();

        let mut dependencies = DependencyBuilder::new("/trunk", "/branches/b1");
        assert!(
            dependencies
                .analyze_conflicts(&mut history, &[&log[5]])
                .is_err()
        );
    }
}
