use std::collections::BTreeSet;
use std::io::Write;

use crate::merge::{MergeOperation, Operation, Snapshot, WorkingCopy, Workspace};

pub(crate) enum ExecError {
    Io(std::io::Error),
    Spawn {
        command: String,
        error: std::io::Error,
    },
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

impl From<std::io::Error> for ExecError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Spawn { command, error } => write!(f, "failed to spawn {command:?}: {error}"),
            Self::Failed {
                command,
                status,
                stderr,
            } => {
                write!(f, "{command:?} exited with {status}")?;
                let stderr = stderr.trim_end();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// Performs merge plans and commits on the target branch.
pub(crate) trait Executor {
    /// State of the target branch plans are built against.
    fn working_copy(&self) -> &dyn WorkingCopy;

    /// Runs the operations of `plan` in order and returns the conflicting
    /// resources.
    fn apply(&mut self, plan: &MergeOperation) -> Result<Vec<String>, ExecError>;

    fn commit(&mut self, message: &str, resources: &BTreeSet<String>) -> Result<(), ExecError>;
}

fn wc_path(resource: &str) -> &str {
    if resource.is_empty() { "." } else { resource }
}

/// Prints the `svn` commands that would be run, tracking the resources of
/// the target branch in a [`Snapshot`].
///
/// Files added by content merges are not known to the snapshot.
pub(crate) struct DryRunExecutor<W: Write> {
    out: W,
    snapshot: Snapshot,
}

impl<W: Write> DryRunExecutor<W> {
    pub(crate) fn new(out: W, snapshot: Snapshot) -> Self {
        Self { out, snapshot }
    }

    #[cfg(test)]
    pub(crate) fn into_output(self) -> W {
        self.out
    }

    fn insert_with_parents(&mut self, resource: &str) {
        let mut end = 0;
        for component in resource.split('/') {
            end += component.len();
            self.snapshot.insert(&resource[..end]);
            end += 1;
        }
    }
}

impl<W: Write> Executor for DryRunExecutor<W> {
    fn working_copy(&self) -> &dyn WorkingCopy {
        &self.snapshot
    }

    fn apply(&mut self, plan: &MergeOperation) -> Result<Vec<String>, ExecError> {
        for operation in plan.operations.iter() {
            writeln!(self.out, "{operation}")?;
            match operation {
                Operation::Copy { target, .. } | Operation::MkDir { target } => {
                    self.insert_with_parents(target);
                }
                Operation::Remove { target } => self.snapshot.remove(target),
                Operation::Merge(_) | Operation::TreeConflict { .. } => {}
            }
        }
        self.out.flush()?;
        Ok(plan.tree_conflicts().map(String::from).collect())
    }

    fn commit(&mut self, message: &str, resources: &BTreeSet<String>) -> Result<(), ExecError> {
        write!(self.out, "svn commit --depth empty -m {message:?}")?;
        for resource in resources.iter() {
            write!(self.out, " {}", wc_path(resource))?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Runs the `svn` command line client in a working copy of the target
/// branch.
pub(crate) struct SvnExecutor {
    workspace: Workspace,
}

impl SvnExecutor {
    pub(crate) fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn run<I, S>(&self, args: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = std::process::Command::new("svn");
        command
            .args(args)
            .arg("--non-interactive")
            .current_dir(self.workspace.root())
            .stdin(std::process::Stdio::null());

        let command_line = format!("{command:?}");
        tracing::debug!("running {command_line}");

        let output = command.output().map_err(|error| ExecError::Spawn {
            command: command_line.clone(),
            error,
        })?;
        if !output.status.success() {
            return Err(ExecError::Failed {
                command: command_line,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Paths with a text, property or tree conflict in `svn status` output.
fn parse_conflicts(status: &str) -> Vec<String> {
    status
        .lines()
        .filter(|line| {
            let columns = line.as_bytes();
            [0, 1, 6]
                .into_iter()
                .any(|column| columns.get(column) == Some(&b'C'))
        })
        .filter_map(|line| line.get(8..))
        .map(|path| path.trim().to_string())
        .collect()
}

impl Executor for SvnExecutor {
    fn working_copy(&self) -> &dyn WorkingCopy {
        &self.workspace
    }

    fn apply(&mut self, plan: &MergeOperation) -> Result<Vec<String>, ExecError> {
        let mut conflicts = Vec::new();
        for operation in plan.operations.iter() {
            match operation.svn_args() {
                Some(args) => {
                    tracing::info!("{operation}");
                    self.run(args)?;
                }
                None => {
                    tracing::warn!("r{}: {operation}", plan.revision);
                    conflicts.push(wc_path(operation.target()).to_string());
                }
            }
        }

        let status = self.run(["status"])?;
        conflicts.extend(parse_conflicts(&status));
        Ok(conflicts)
    }

    fn commit(&mut self, message: &str, resources: &BTreeSet<String>) -> Result<(), ExecError> {
        let mut args = vec!["commit", "--depth", "empty", "-m", message];
        args.extend(resources.iter().map(|resource| wc_path(resource)));
        self.run(args)?;
        // Avoids mixed revisions in the next merge
        self.run(["update"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{DryRunExecutor, Executor as _, parse_conflicts};
    use crate::merge::{
        CopySource, Depth, Merge, MergeOperation, Operation, Snapshot, TreeConflictAction,
    };

    #[test]
    fn test_dry_run() {
        let mut executor = DryRunExecutor::new(Vec::new(), Snapshot::new(["old".to_string()]));
        let plan = MergeOperation {
            revision: 8,
            operations: vec![
                Operation::Copy {
                    target: "core/sub/new.txt".into(),
                    source: CopySource::Url {
                        url: "^/trunk/core/a.txt".into(),
                        rev: 7,
                    },
                },
                Operation::Remove {
                    target: "old".into(),
                },
                Operation::Merge(Merge {
                    target: "core/sub/new.txt".into(),
                    source_url: "^/trunk/core/a.txt".into(),
                    peg: 8,
                    start: 7,
                    end: 8,
                    ignore_ancestry: false,
                    record_only: false,
                    depth: Depth::Empty,
                }),
                Operation::TreeConflict {
                    target: "web/x.txt".into(),
                    action: TreeConflictAction::Edited,
                },
            ],
            touched: BTreeSet::new(),
        };

        let conflicts = executor.apply(&plan).unwrap();
        assert_eq!(conflicts, ["web/x.txt"]);
        {
            let wc = executor.working_copy();
            assert!(wc.exists("core"));
            assert!(wc.exists("core/sub"));
            assert!(wc.exists("core/sub/new.txt"));
            assert!(!wc.exists("old"));
        }

        let resources = ["", "core/sub/new.txt"].into_iter().map(String::from).collect();
        executor.commit("Ticket #1: \"x\"\ny", &resources).unwrap();

        let output = String::from_utf8(executor.into_output()).unwrap();
        assert_eq!(
            output.lines().collect::<Vec<_>>(),
            [
                "svn copy --parents ^/trunk/core/a.txt@7 core/sub/new.txt",
                "svn delete --force old",
                "svn merge --depth empty --allow-mixed-revisions -r 7:8 ^/trunk/core/a.txt@8 core/sub/new.txt",
                "# tree conflict (edited): web/x.txt",
                r#"svn commit --depth empty -m "Ticket #1: \"x\"\ny" . core/sub/new.txt"#,
            ],
        );
    }

    #[test]
    fn test_parse_conflicts() {
        let status = "\
M       core/a.txt
C       core/b.txt
 C      core
      C web/gone.txt
      >   local file edit, incoming file delete upon merge
A  +    core/new.txt
";
        assert_eq!(parse_conflicts(status), ["core/b.txt", "core", "web/gone.txt"]);
    }
}
