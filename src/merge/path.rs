use super::MergeError;
use crate::FHashMap;
use crate::svn::{ChangeType, LogEntryPath, NodeKind, Rev};

enum DirSpecNode {
    Branch,
    Container(ContainerDirSpecNode),
}

#[derive(Default)]
struct ContainerDirSpecNode {
    wildcard: bool,
    subdirs: FHashMap<String, DirSpecNode>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LayoutError {
    InvalidSpec,
    /// Overlaps with the given, already added directory.
    Conflict(String),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSpec => write!(f, "invalid branch directory"),
            Self::Conflict(other) => write!(f, "conflicts with branch directory {other:?}"),
        }
    }
}

/// Directories of the repository that hold branches, such as `trunk` or
/// `branches/*`.
#[derive(Default)]
pub(crate) struct BranchLayout {
    root: ContainerDirSpecNode,
}

impl BranchLayout {
    pub(crate) fn add_branch_dir(&mut self, spec: &str) -> Result<(), LayoutError> {
        if spec.is_empty() || spec.starts_with('/') || spec.ends_with('/') {
            return Err(LayoutError::InvalidSpec);
        }

        let mut current_len = 0;
        let mut current_dir_node = &mut self.root;
        let mut components = spec.split('/');
        let last_component = components.next_back().ok_or(LayoutError::InvalidSpec)?;
        for component in components {
            if component.is_empty() || component == "*" {
                return Err(LayoutError::InvalidSpec);
            }
            if current_len != 0 {
                // count '/'
                current_len += 1;
            }
            current_len += component.len();

            let node = current_dir_node
                .subdirs
                .entry(component.to_string())
                .or_insert_with(|| DirSpecNode::Container(ContainerDirSpecNode::default()));
            match node {
                DirSpecNode::Branch => {
                    return Err(LayoutError::Conflict(spec[..current_len].to_string()));
                }
                DirSpecNode::Container(container) => current_dir_node = container,
            }
        }

        if last_component == "*" {
            if current_dir_node.wildcard {
                return Err(LayoutError::Conflict(spec.to_string()));
            }
            current_dir_node.wildcard = true;
        } else {
            if last_component.is_empty() || current_dir_node.subdirs.contains_key(last_component) {
                return Err(LayoutError::Conflict(spec.to_string()));
            }
            current_dir_node
                .subdirs
                .insert(last_component.to_string(), DirSpecNode::Branch);
        }

        Ok(())
    }

    /// Splits a repository path (with leading `/`) into its branch and the
    /// resource within the branch.
    pub(crate) fn classify<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let relative = path.strip_prefix('/').unwrap_or(path);
        let offset = path.len() - relative.len();
        let split_at = |len: usize| {
            let branch = &path[..offset + len];
            let resource = relative.get(len + 1..).unwrap_or("");
            (branch, resource)
        };

        let mut current_len = 0;
        let mut current_dir_node = &self.root;
        for component in relative.split('/') {
            if current_len != 0 {
                current_len += 1;
            }
            current_len += component.len();

            match current_dir_node.subdirs.get(component) {
                Some(DirSpecNode::Branch) => return Some(split_at(current_len)),
                Some(DirSpecNode::Container(container)) => current_dir_node = container,
                None if current_dir_node.wildcard && !component.is_empty() => {
                    return Some(split_at(current_len));
                }
                None => return None,
            }
        }
        None
    }
}

/// A repository path split at its branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) path: String,
    /// Empty for paths outside any branch.
    pub(crate) branch: String,
    pub(crate) resource: String,
}

impl Location {
    /// First component of the resource.
    pub(crate) fn module(&self) -> &str {
        self.resource.split('/').next().unwrap_or("")
    }

    pub(crate) fn is_branched(&self) -> bool {
        !self.branch.is_empty()
    }

    /// The same resource moved to `resource` within the branch.
    pub(crate) fn with_resource(&self, resource: String) -> Self {
        let path = if resource.is_empty() {
            self.branch.clone()
        } else {
            format!("{}/{resource}", self.branch)
        };
        Self {
            path,
            branch: self.branch.clone(),
            resource,
        }
    }
}

/// One entry of a revision's changed paths, resolved against the branch
/// layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChangedPath {
    pub(crate) location: Location,
    pub(crate) change_type: ChangeType,
    pub(crate) kind: NodeKind,
    pub(crate) copy_from: Option<(Location, Rev)>,
}

impl ChangedPath {
    #[inline]
    pub(crate) fn resource(&self) -> &str {
        &self.location.resource
    }

    #[inline]
    pub(crate) fn module(&self) -> &str {
        self.location.module()
    }

    #[inline]
    pub(crate) fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub(crate) fn with_location(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }
}

pub(crate) struct PathParser {
    layout: BranchLayout,
}

impl PathParser {
    pub(crate) fn new(layout: BranchLayout) -> Self {
        Self { layout }
    }

    pub(crate) fn location(&self, path: &str) -> Location {
        match self.layout.classify(path) {
            Some((branch, resource)) => Location {
                path: path.to_string(),
                branch: branch.to_string(),
                resource: resource.to_string(),
            },
            None => Location {
                path: path.to_string(),
                branch: String::new(),
                resource: path.trim_start_matches('/').to_string(),
            },
        }
    }

    /// Fails for paths outside any branch.
    pub(crate) fn branch_location(&self, path: &str) -> Result<Location, MergeError> {
        let location = self.location(path);
        if location.is_branched() {
            Ok(location)
        } else {
            Err(MergeError::OutsideBranch { path: path.into() })
        }
    }

    /// Branch directory `path` is, if it is one.
    pub(crate) fn branch(&self, path: &str) -> Result<String, MergeError> {
        let location = self.branch_location(path)?;
        if location.resource.is_empty() {
            Ok(location.branch)
        } else {
            Err(MergeError::NotABranch { path: path.into() })
        }
    }

    pub(crate) fn parse(&self, entry: &LogEntryPath) -> ChangedPath {
        ChangedPath {
            location: self.location(&entry.path),
            change_type: entry.change_type,
            kind: entry.kind,
            copy_from: entry
                .copy_from
                .as_ref()
                .map(|copy| (self.location(&copy.path), copy.rev)),
        }
    }
}
