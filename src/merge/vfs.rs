use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::svn::log::is_child;

/// State of the target branch before the operations of a plan are applied.
pub(crate) trait WorkingCopy {
    /// `resource` is relative to the branch root. The root itself always
    /// exists.
    fn exists(&self, resource: &str) -> bool;
}

/// A checked out working copy of the target branch.
pub(crate) struct Workspace {
    root: std::path::PathBuf,
}

impl Workspace {
    pub(crate) fn new(root: std::path::PathBuf) -> Self {
        Self { root }
    }

    pub(crate) fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl WorkingCopy for Workspace {
    fn exists(&self, resource: &str) -> bool {
        resource.is_empty() || self.root.join(resource).exists()
    }
}

/// Resources of the target branch as recorded in the history, updated as
/// plans are applied without a real working copy.
#[derive(Default)]
pub(crate) struct Snapshot {
    resources: BTreeSet<String>,
}

impl Snapshot {
    pub(crate) fn new(resources: impl IntoIterator<Item = String>) -> Self {
        Self {
            resources: resources.into_iter().collect(),
        }
    }

    pub(crate) fn insert(&mut self, resource: &str) {
        self.resources.insert(resource.to_string());
    }

    /// Removes `resource` and everything below it.
    pub(crate) fn remove(&mut self, resource: &str) {
        let below: Vec<String> = self
            .resources
            .range::<str, _>((Bound::Included(resource), Bound::Unbounded))
            .take_while(|path| path.starts_with(resource))
            .filter(|path| path.as_str() == resource || is_child(path, resource))
            .cloned()
            .collect();
        for path in below {
            self.resources.remove(&path);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }
}

impl WorkingCopy for Snapshot {
    fn exists(&self, resource: &str) -> bool {
        resource.is_empty() || self.resources.contains(resource)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Entry {
    /// Deleted along with everything below.
    Removed,
    /// Created empty.
    Created,
    /// Copied with its contents.
    Copied,
    /// Exists, but says nothing about its contents.
    Present,
}

/// Tracks what the operations planned so far add and remove, on top of a
/// [`WorkingCopy`].
#[derive(Default)]
pub(crate) struct VirtualFs {
    entries: BTreeMap<String, Entry>,
}

impl VirtualFs {
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn add_copy(&mut self, resource: &str) {
        self.set(resource, Entry::Copied);
    }

    pub(crate) fn mkdir(&mut self, resource: &str) {
        self.set(resource, Entry::Created);
    }

    pub(crate) fn delete(&mut self, resource: &str) {
        self.set(resource, Entry::Removed);
    }

    fn set(&mut self, resource: &str, entry: Entry) {
        let prefix = format!("{resource}/");
        let below: Vec<String> = self
            .entries
            .range::<str, _>((Bound::Excluded(prefix.as_str()), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect();
        for path in below {
            self.entries.remove(&path);
        }
        self.entries.remove(&prefix);

        if entry != Entry::Removed {
            // Parents are created as needed
            let mut ancestor = resource;
            while let Some(sep) = ancestor.rfind('/') {
                ancestor = &ancestor[..sep];
                match self.entries.get(ancestor) {
                    None => {
                        self.entries.insert(ancestor.to_string(), Entry::Present);
                    }
                    Some(Entry::Removed) => {
                        self.entries.insert(ancestor.to_string(), Entry::Created);
                    }
                    Some(_) => break,
                }
            }
        }

        self.entries.insert(resource.to_string(), entry);
    }

    pub(crate) fn exists(&self, resource: &str, working_copy: &dyn WorkingCopy) -> bool {
        if resource.is_empty() {
            return true;
        }
        if let Some(&entry) = self.entries.get(resource) {
            return entry != Entry::Removed;
        }

        let mut ancestor = resource;
        while let Some(sep) = ancestor.rfind('/') {
            ancestor = &ancestor[..sep];
            match self.entries.get(ancestor) {
                Some(Entry::Removed | Entry::Created) => return false,
                Some(Entry::Copied) => return true,
                Some(Entry::Present) | None => {}
            }
        }

        working_copy.exists(resource)
    }
}
