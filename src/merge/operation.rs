use std::collections::BTreeSet;

use crate::svn::Rev;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Depth {
    Empty,
    Infinity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CopySource {
    Url { url: String, rev: Rev },
    /// A resource of the working copy, in its checked out revision.
    Local { resource: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TreeConflictAction {
    Added,
    Edited,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Merge {
    pub(crate) target: String,
    pub(crate) source_url: String,
    pub(crate) peg: Rev,
    pub(crate) start: Rev,
    pub(crate) end: Rev,
    pub(crate) ignore_ancestry: bool,
    pub(crate) record_only: bool,
    pub(crate) depth: Depth,
}

/// One step of a merge plan. Targets are resources relative to the root of
/// the working copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Parents of the target are created as needed.
    Copy { target: String, source: CopySource },
    Remove { target: String },
    MkDir { target: String },
    Merge(Merge),
    /// The change cannot be applied because the target (or its parent) is
    /// missing. Left for the operator to resolve.
    TreeConflict {
        target: String,
        action: TreeConflictAction,
    },
}

fn wc_path(resource: &str) -> String {
    if resource.is_empty() {
        ".".into()
    } else {
        resource.into()
    }
}

impl Operation {
    pub(crate) fn target(&self) -> &str {
        match self {
            Self::Copy { target, .. }
            | Self::Remove { target }
            | Self::MkDir { target }
            | Self::TreeConflict { target, .. } => target,
            Self::Merge(merge) => &merge.target,
        }
    }

    /// Arguments of the `svn` invocation performing this operation, `None`
    /// for tree conflicts.
    pub(crate) fn svn_args(&self) -> Option<Vec<String>> {
        let args = match self {
            Self::Copy { target, source } => {
                let source = match source {
                    CopySource::Url { url, rev } => format!("{url}@{rev}"),
                    CopySource::Local { resource } => format!("{}@BASE", wc_path(resource)),
                };
                vec!["copy".into(), "--parents".into(), source, wc_path(target)]
            }
            Self::Remove { target } => vec!["delete".into(), "--force".into(), wc_path(target)],
            Self::MkDir { target } => vec!["mkdir".into(), "--parents".into(), wc_path(target)],
            Self::Merge(merge) => {
                let mut args = vec!["merge".to_string()];
                if merge.record_only {
                    args.push("--record-only".into());
                }
                if merge.ignore_ancestry {
                    args.push("--ignore-ancestry".into());
                }
                if merge.depth == Depth::Empty {
                    args.push("--depth".into());
                    args.push("empty".into());
                }
                args.push("--allow-mixed-revisions".into());
                args.push("-r".into());
                args.push(format!("{}:{}", merge.start, merge.end));
                args.push(format!("{}@{}", merge.source_url, merge.peg));
                args.push(wc_path(&merge.target));
                args
            }
            Self::TreeConflict { .. } => return None,
        };
        Some(args)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Self::TreeConflict { target, action } = self {
            let action = match action {
                TreeConflictAction::Added => "added",
                TreeConflictAction::Edited => "edited",
            };
            return write!(f, "# tree conflict ({action}): {}", wc_path(target));
        }

        f.write_str("svn")?;
        for arg in self.svn_args().unwrap_or_default() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The plan replaying one revision on the target branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MergeOperation {
    pub(crate) revision: Rev,
    pub(crate) operations: Vec<Operation>,
    /// Resources to commit afterwards.
    pub(crate) touched: BTreeSet<String>,
}

impl MergeOperation {
    pub(crate) fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn tree_conflicts(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().filter_map(|operation| match operation {
            Operation::TreeConflict { target, .. } => Some(target.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CopySource, Depth, Merge, Operation, TreeConflictAction};

    #[test]
    fn test_command_lines() {
        let copy = Operation::Copy {
            target: "core/new.txt".into(),
            source: CopySource::Url {
                url: "^/trunk/core/old.txt".into(),
                rev: 7,
            },
        };
        assert_eq!(
            copy.to_string(),
            "svn copy --parents ^/trunk/core/old.txt@7 core/new.txt",
        );

        let merge = Operation::Merge(Merge {
            target: String::new(),
            source_url: "^/trunk".into(),
            peg: 9,
            start: 10,
            end: 9,
            ignore_ancestry: true,
            record_only: true,
            depth: Depth::Empty,
        });
        assert_eq!(
            merge.to_string(),
            "svn merge --record-only --ignore-ancestry --depth empty --allow-mixed-revisions -r 10:9 ^/trunk@9 .",
        );

        let conflict = Operation::TreeConflict {
            target: "web/x".into(),
            action: TreeConflictAction::Edited,
        };
        assert_eq!(conflict.svn_args(), None);
        assert_eq!(conflict.to_string(), "# tree conflict (edited): web/x");
        assert_eq!(conflict.target(), "web/x");
    }
}
