use std::collections::BTreeSet;

use super::{Direction, FIRST, HEAD, History, HistoryBuilder, HistoryError, SINCE_EVER};
use crate::svn::log::CopyFrom;
use crate::svn::{ChangeType, LogEntry, LogEntryPath, NodeKind, Rev};

fn no_keys(_: &LogEntry) -> Option<String> {
    None
}

fn path_entry(
    path: &str,
    change_type: ChangeType,
    kind: NodeKind,
    copy_from: Option<(&str, Rev)>,
) -> LogEntryPath {
    LogEntryPath {
        path: path.into(),
        change_type,
        kind,
        copy_from: copy_from.map(|(path, rev)| CopyFrom {
            path: path.into(),
            rev,
        }),
    }
}

fn entry(rev: Rev, paths: Vec<LogEntryPath>) -> LogEntry {
    let mut entry = LogEntry::new(rev);
    entry.author = "tester".into();
    entry.message = format!("change {rev}");
    for path in paths {
        entry.changed_paths.insert(path.path.clone(), path);
    }
    entry
}

fn revisions(history: &History, changes: &[super::ChangeId]) -> Vec<Rev> {
    changes
        .iter()
        .map(|&change| history.change(change).revision)
        .collect()
}

fn own_revisions(history: &History, path: &str) -> Option<Vec<Rev>> {
    let node = history.get_node(path)?;
    Some(revisions(history, history.node(node).own_changes()))
}

/// Log of a repository where paths are renamed, read newest first.
struct BackwardLog {
    entries: Vec<LogEntry>,
}

impl BackwardLog {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn modify(&mut self, rev: Rev, path: &str) -> &mut Self {
        self.entries.push(entry(
            rev,
            vec![path_entry(path, ChangeType::Modified, NodeKind::File, None)],
        ));
        self
    }

    fn create(&mut self, rev: Rev, path: &str) -> &mut Self {
        self.entries.push(entry(
            rev,
            vec![path_entry(path, ChangeType::Added, NodeKind::File, None)],
        ));
        self
    }

    fn relocate(&mut self, rev: Rev, from: &str, to: &str, change_type: ChangeType) -> &mut Self {
        self.entries.push(entry(
            rev,
            vec![
                path_entry(to, change_type, NodeKind::Dir, Some((from, rev - 1))),
                path_entry(from, ChangeType::Deleted, NodeKind::Unknown, None),
            ],
        ));
        self
    }

    fn mv(&mut self, rev: Rev, from: &str, to: &str) -> &mut Self {
        self.relocate(rev, from, to, ChangeType::Added)
    }

    fn replace(&mut self, rev: Rev, from: &str, to: &str) -> &mut Self {
        self.relocate(rev, from, to, ChangeType::Replaced)
    }

    fn build(&self) -> History {
        let mut builder = HistoryBuilder::new(FIRST, Direction::Backward, &no_keys);
        for entry in self.entries.iter() {
            builder.handle_log_entry(entry).unwrap();
        }
        builder.finish()
    }
}

#[test]
fn test_branch_rename() {
    let history = BackwardLog::new()
        .modify(100, "/trunk/module/file-1")
        .mv(90, "/branches/stable", "/trunk")
        .modify(80, "/branches/stable/module/file-1")
        .mv(70, "/branches/unstable", "/branches/stable")
        .modify(60, "/branches/unstable/module/file-1")
        .create(50, "/branches/unstable/module/file-1")
        .build();

    assert_eq!(
        own_revisions(&history, "/trunk/module/file-1"),
        Some(vec![100, 80, 60, 50]),
    );
    assert_eq!(own_revisions(&history, "/trunk"), Some(vec![90, 70]));
    for path in [
        "/branches/stable",
        "/branches/stable/module/file-1",
        "/branches/unstable",
        "/branches/unstable/module/file-1",
    ] {
        assert_eq!(own_revisions(&history, path), None, "{path}");
    }
}

#[test]
fn test_replace_cuts_history() {
    let history = BackwardLog::new()
        .replace(100, "/b2", "/b1")
        .modify(90, "/b1/file")
        .modify(80, "/b2/file")
        .create(70, "/b2/file")
        .create(60, "/b1/file")
        .build();

    assert_eq!(own_revisions(&history, "/b1/file"), Some(vec![80, 70]));
    assert_eq!(own_revisions(&history, "/b2/file"), None);
}

#[test]
fn test_swap_branches() {
    let history = BackwardLog::new()
        .modify(200, "/b2/file")
        .modify(190, "/b1/file")
        .mv(180, "/tmp", "/b1")
        .mv(170, "/b1", "/b2")
        .mv(160, "/b2", "/tmp")
        .modify(150, "/b1/file")
        .modify(140, "/b2/file")
        .mv(130, "/tmp", "/b2")
        .mv(120, "/b2", "/b1")
        .mv(110, "/b1", "/tmp")
        .create(100, "/b2/file")
        .create(90, "/b1/file")
        .build();

    assert_eq!(own_revisions(&history, "/b1/file"), Some(vec![190, 140, 90]));
    assert_eq!(own_revisions(&history, "/b2/file"), Some(vec![200, 150, 100]));
    assert_eq!(own_revisions(&history, "/tmp/file"), None);
}

#[test]
fn test_backward_requires_descending_revisions() {
    let mut builder = HistoryBuilder::new(FIRST, Direction::Backward, &no_keys);
    builder
        .handle_log_entry(&entry(10, vec![path_entry("/f", ChangeType::Modified, NodeKind::File, None)]))
        .unwrap();
    assert_eq!(
        builder.handle_log_entry(&entry(11, Vec::new())),
        Err(HistoryError::OutOfOrder {
            previous: 10,
            rev: 11
        }),
    );
}

fn build_forward(start: Rev, entries: &[LogEntry]) -> Result<History, HistoryError> {
    let mut builder = HistoryBuilder::new(start, Direction::Forward, &no_keys);
    for entry in entries {
        builder.handle_log_entry(entry)?;
    }
    Ok(builder.finish())
}

fn branching_log() -> Vec<LogEntry> {
    use ChangeType::{Added, Modified};
    use NodeKind::{Dir, File};

    vec![
        entry(
            1,
            vec![
                path_entry("/trunk", Added, Dir, None),
                path_entry("/trunk/mod", Added, Dir, None),
                path_entry("/trunk/mod/f", Added, File, None),
            ],
        ),
        entry(2, vec![path_entry("/trunk/mod/f", Modified, File, None)]),
        entry(
            3,
            vec![
                path_entry("/branches", Added, Dir, None),
                path_entry("/branches/b1", Added, Dir, Some(("/trunk", 2))),
            ],
        ),
        entry(4, vec![path_entry("/trunk/mod/f", Modified, File, None)]),
        entry(5, vec![path_entry("/branches/b1/mod/f", Modified, File, None)]),
        entry(6, vec![path_entry("/trunk/mod/g", Added, File, None)]),
        entry(
            7,
            vec![path_entry("/branches/b2", Added, Dir, Some(("/trunk", 6)))],
        ),
    ]
}

#[test]
fn test_changes_follow_copies() {
    let mut history = build_forward(FIRST, &branching_log()).unwrap();

    let trunk_file = history.get_node("/trunk/mod/f").unwrap();
    assert_eq!(
        revisions(&history, &history.node_changes(trunk_file)),
        [1, 2, 4],
    );

    let branch_file = history
        .get_current_node(NodeKind::File, "/branches/b1/mod/f")
        .unwrap()
        .unwrap();
    let node = history.node(branch_file);
    assert_eq!(node.rev_min(), 3);
    assert!(node.is_alive());
    assert_eq!(node.copy_from().map(|(_, rev)| rev), Some(2));
    assert_eq!(
        revisions(&history, &history.node_changes(branch_file)),
        [1, 2, 5],
    );

    // Never touched on the branch, only present through the copy
    let implicit = history
        .get_current_node(NodeKind::File, "/branches/b2/mod/f")
        .unwrap()
        .unwrap();
    assert_eq!(
        revisions(&history, &history.node_changes(implicit)),
        [1, 2, 4],
    );
    assert!(
        history
            .get_current_node(NodeKind::File, "/branches/b1/mod/g")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_expand_contents() {
    let mut history = build_forward(FIRST, &branching_log()).unwrap();

    let paths = |history: &History, nodes: BTreeSet<super::NodeId>| -> BTreeSet<String> {
        nodes
            .into_iter()
            .map(|node| history.node(node).path().to_string())
            .collect()
    };

    let b2 = history.expand_contents("/branches/b2", HEAD).unwrap();
    assert_eq!(
        paths(&history, b2),
        BTreeSet::from([
            "/branches/b2".to_string(),
            "/branches/b2/mod".to_string(),
            "/branches/b2/mod/f".to_string(),
            "/branches/b2/mod/g".to_string(),
        ]),
    );

    let trunk_before = history.expand_contents("/trunk", 3).unwrap();
    assert_eq!(
        paths(&history, trunk_before),
        BTreeSet::from([
            "/trunk".to_string(),
            "/trunk/mod".to_string(),
            "/trunk/mod/f".to_string(),
        ]),
    );
}

#[test]
fn test_delete_propagates_to_descendants() {
    use ChangeType::{Added, Deleted};
    use NodeKind::{Dir, File};

    let mut history = build_forward(
        FIRST,
        &[
            entry(
                1,
                vec![
                    path_entry("/a", Added, Dir, None),
                    path_entry("/a/b", Added, Dir, None),
                    path_entry("/a/b/c", Added, Dir, None),
                    path_entry("/a/b/c/f", Added, File, None),
                    path_entry("/a/x", Added, File, None),
                    path_entry("/z", Added, File, None),
                ],
            ),
            entry(
                2,
                vec![
                    path_entry("/a", Deleted, NodeKind::Unknown, None),
                    path_entry("/a/x", Deleted, NodeKind::Unknown, None),
                ],
            ),
            entry(3, vec![path_entry("/a", Added, Dir, None)]),
        ],
    )
    .unwrap();

    for path in ["/a/b", "/a/b/c", "/a/b/c/f", "/a/x"] {
        let node = history.node(history.get_node(path).unwrap());
        assert_eq!(node.rev_max(), 1, "{path}");
        assert_eq!(own_revisions(&history, path), Some(vec![1, 2]), "{path}");
    }
    assert!(history.node(history.get_node("/z").unwrap()).is_alive());

    let chain = history.chain("/a");
    assert_eq!(chain.len(), 2);
    assert_eq!(history.node(chain[0]).rev_max(), 1);
    assert_eq!(history.node(chain[1]).rev_min(), 3);
    assert!(
        history
            .get_current_node(File, "/a/b/c/f")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_phantom_copy_source() {
    let log = [entry(
        100,
        vec![path_entry(
            "/branches/b2",
            ChangeType::Added,
            NodeKind::Dir,
            Some(("/trunk", 50)),
        )],
    )];

    let history = build_forward(90, &log).unwrap();
    let branch = history.node(history.get_node("/branches/b2").unwrap());
    let (copy_node, copy_rev) = branch.copy_from().unwrap();
    assert_eq!(copy_rev, 50);
    let phantom = history.node(copy_node);
    assert_eq!(phantom.path(), "/trunk");
    assert_eq!(phantom.rev_min(), SINCE_EVER);
    assert_eq!(phantom.rev_max(), HEAD);
    assert!(phantom.own_changes().is_empty());

    assert_eq!(
        build_forward(FIRST, &log).err(),
        Some(HistoryError::MissingCopySource {
            path: "/trunk".into(),
            rev: 50,
        }),
    );
}

#[test]
fn test_modify_after_delete_is_inconsistent() {
    use ChangeType::{Added, Deleted, Modified};

    let result = build_forward(
        FIRST,
        &[
            entry(1, vec![path_entry("/f", Added, NodeKind::File, None)]),
            entry(2, vec![path_entry("/f", Deleted, NodeKind::Unknown, None)]),
            entry(3, vec![path_entry("/f", Modified, NodeKind::File, None)]),
        ],
    );
    assert!(matches!(
        result,
        Err(HistoryError::MissingCopySource { rev: HEAD, .. })
    ));
}

#[test]
fn test_duplicate_revision() {
    let mut history = History::new(FIRST);
    history.create_change(5, "a", "first", None).unwrap();
    assert_eq!(
        history.create_change(5, "b", "second", None),
        Err(HistoryError::DuplicateRevision { rev: 5 }),
    );
    assert_eq!(history.get_change(5).unwrap().message, "first");
    assert!(history.get_change(6).is_err());
}

#[test]
fn test_touched_nodes() {
    let mut history = build_forward(FIRST, &branching_log()).unwrap();
    // Lookups create implicit nodes, which have no changes of their own
    history
        .get_current_node(NodeKind::File, "/branches/b2/mod/f")
        .unwrap();

    let touched: Vec<_> = history
        .touched_nodes()
        .into_iter()
        .map(|node| history.node(node).path().to_string())
        .collect();
    assert_eq!(
        touched,
        [
            "/branches",
            "/branches/b1",
            "/branches/b1/mod/f",
            "/branches/b2",
            "/trunk",
            "/trunk/mod",
            "/trunk/mod/f",
            "/trunk/mod/g",
        ],
    );
}

/// Random adds, copies, modifications and deletions never produce
/// overlapping life-spans.
#[test]
fn test_no_overlapping_nodes() {
    use rand::{RngExt as _, SeedableRng as _};

    const DIRS: [&str; 3] = ["/a", "/b", "/c"];
    const FILES: [&str; 2] = ["x", "y"];

    for seed in 0..20 {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut alive = BTreeSet::<String>::new();
        let mut builder = HistoryBuilder::new(FIRST, Direction::Forward, &no_keys);

        for rev in 1..=150 {
            let dir = DIRS[rng.random::<u32>() as usize % DIRS.len()];
            let target = if rng.random::<u32>() % 3 == 0 {
                dir.to_string()
            } else {
                format!("{dir}/{}", FILES[rng.random::<u32>() as usize % FILES.len()])
            };
            let is_dir = target == dir;
            let kind = if is_dir { NodeKind::Dir } else { NodeKind::File };

            let path = if !alive.contains(&target) {
                if !is_dir && !alive.contains(dir) {
                    continue;
                }
                let sources: Vec<&str> = DIRS
                    .iter()
                    .copied()
                    .filter(|&source| source != dir && alive.contains(source))
                    .collect();
                let copy_source = (is_dir && !sources.is_empty() && rng.random::<u32>() % 2 == 0)
                    .then(|| sources[rng.random::<u32>() as usize % sources.len()]);
                if let Some(source) = copy_source {
                    let copied: Vec<String> = alive
                        .iter()
                        .filter_map(|path| path.strip_prefix(source))
                        .map(|rest| format!("{dir}{rest}"))
                        .collect();
                    alive.extend(copied);
                }
                alive.insert(target.clone());
                path_entry(
                    &target,
                    ChangeType::Added,
                    kind,
                    copy_source.map(|source| (source, rev - 1)),
                )
            } else if rng.random::<u32>() % 2 == 0 {
                path_entry(&target, ChangeType::Modified, kind, None)
            } else {
                alive.retain(|path| !crate::svn::log::is_same_or_child(path, &target));
                path_entry(&target, ChangeType::Deleted, NodeKind::Unknown, None)
            };

            builder
                .handle_log_entry(&entry(rev, vec![path]))
                .unwrap_or_else(|e| panic!("seed {seed}, r{rev}: {e}"));
        }

        let history = builder.finish();
        for dir in DIRS {
            let mut paths = vec![dir.to_string()];
            paths.extend(FILES.iter().map(|file| format!("{dir}/{file}")));
            for path in paths {
                let chain = history.chain(&path);
                for node in chain.iter() {
                    let node = history.node(*node);
                    assert!(node.rev_min() <= node.rev_max(), "seed {seed}: {path}");
                }
                for pair in chain.windows(2) {
                    let earlier = history.node(pair[0]);
                    let later = history.node(pair[1]);
                    assert!(
                        earlier.rev_max() < later.rev_min(),
                        "seed {seed}: {path} overlaps",
                    );
                    assert_eq!(earlier.later(), Some(pair[1]));
                    assert_eq!(later.before(), Some(pair[0]));
                }
                let alive_nodes = chain
                    .iter()
                    .filter(|&&node| history.node(node).is_alive())
                    .count();
                assert!(alive_nodes <= 1, "seed {seed}: {path}");
            }
        }
    }
}
