use std::collections::BTreeMap;

/// Subversion revision number.
pub(crate) type Rev = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum NodeKind {
    File,
    Dir,
    Unknown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ChangeType {
    Added,
    Modified,
    Deleted,
    Replaced,
}

impl ChangeType {
    pub(crate) fn letter(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Replaced => 'R',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CopyFrom {
    pub(crate) path: String,
    pub(crate) rev: Rev,
}

/// One changed path of a revision, as `svn log -v` would list it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LogEntryPath {
    pub(crate) path: String,
    pub(crate) change_type: ChangeType,
    pub(crate) kind: NodeKind,
    pub(crate) copy_from: Option<CopyFrom>,
}

#[derive(Clone, Debug)]
pub(crate) struct LogEntry {
    pub(crate) revision: Rev,
    pub(crate) author: String,
    pub(crate) date: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) message: String,
    /// Keyed by path, so iteration visits parents before their children.
    pub(crate) changed_paths: BTreeMap<String, LogEntryPath>,
}

impl LogEntry {
    pub(crate) fn new(revision: Rev) -> Self {
        Self {
            revision,
            author: String::new(),
            date: None,
            message: String::new(),
            changed_paths: BTreeMap::new(),
        }
    }

    pub(crate) fn touches(&self, dir: &str) -> bool {
        self.changed_paths
            .keys()
            .any(|path| is_same_or_child(path, dir))
    }
}

/// Returns whether `path` is `dir` itself or lies somewhere below it.
pub(crate) fn is_same_or_child(path: &str, dir: &str) -> bool {
    match path.strip_prefix(dir) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || dir.ends_with('/'),
        None => false,
    }
}

pub(crate) fn is_child(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && is_same_or_child(path, dir)
}

pub(crate) fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

/// Every revision read from a dump, kept in memory and queried by the
/// merge planner.
pub(crate) struct LogIndex {
    url: String,
    entries: BTreeMap<Rev, LogEntry>,
}

impl LogIndex {
    pub(crate) fn new(url: String) -> Self {
        Self {
            url,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, entry: LogEntry) {
        self.entries.insert(entry.revision, entry);
    }

    pub(crate) fn first_rev(&self) -> Option<Rev> {
        self.entries.keys().next().copied()
    }

    pub(crate) fn last_rev(&self) -> Option<Rev> {
        self.entries.keys().next_back().copied()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub(crate) fn get(&self, rev: Rev) -> Option<&LogEntry> {
        self.entries.get(&rev)
    }
}

impl crate::merge::Repository for LogIndex {
    fn url(&self) -> &str {
        &self.url
    }

    fn log_entry(&self, rev: Rev) -> Option<LogEntry> {
        self.entries.get(&rev).cloned()
    }

    fn log_range(&self, path: &str, start: Rev, end: Rev) -> Vec<LogEntry> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range(start..=end)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.touches(path))
            .cloned()
            .collect()
    }
}
