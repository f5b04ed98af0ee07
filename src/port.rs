use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::commit::{
    self, Commit, CommitSet, ConsoleDecisions, DecisionProvider, MergeCommitHandler,
    MessageError, MessageMaker, TicketParser, Unattended,
};
use crate::exec::{DryRunExecutor, Executor, SvnExecutor};
use crate::history::report::{DependencyReport, ReportFilter};
use crate::history::{DependencyBuilder, Direction, History, HistoryBuilder, HistoryError};
use crate::merge::{
    BranchLayout, MergeConfig, MergeHandler, PathParser, ResourceMapping, Snapshot, Workspace,
};
use crate::path_pattern::PathFilter;
use crate::svn::log::is_same_or_child;
use crate::svn::{LogEntry, LogIndex, NodeKind, Rev};
use crate::term_out::ProgressPrint;
use crate::{FHashMap, FHashSet};

pub(crate) struct PortError;

pub(crate) struct Options<'a> {
    pub(crate) source_branch: String,
    pub(crate) target_branch: String,
    pub(crate) layout: BranchLayout,
    /// Detected when empty.
    pub(crate) modules: BTreeSet<String>,
    pub(crate) detect_common_modules: bool,
    pub(crate) repository_url: String,
    pub(crate) start_revision: Option<Rev>,
    pub(crate) end_revision: Option<Rev>,
    pub(crate) ignore_revisions: FHashSet<Rev>,
    /// Revisions ported besides the selected range, with the resources to
    /// merge (all when empty).
    pub(crate) additional_revisions: Vec<(Rev, BTreeSet<String>)>,
    pub(crate) revert: bool,
    pub(crate) semantic_moves: bool,
    pub(crate) skip_dependencies: bool,
    pub(crate) reorder_commits: bool,
    pub(crate) auto_commit: bool,
    pub(crate) no_commit: bool,
    pub(crate) filter: PathFilter,
    pub(crate) mapping: ResourceMapping,
    pub(crate) tickets: TicketParser,
    pub(crate) messages: MessageMaker<'a>,
    pub(crate) report_filter: ReportFilter,
    /// Working copy of the target branch, used with `execute`.
    pub(crate) workspace: Option<PathBuf>,
    pub(crate) execute: bool,
    pub(crate) yes: bool,
}

pub(crate) fn run(
    progress_print: &ProgressPrint,
    options: Options<'_>,
    src_path: &Path,
    remote: bool,
) -> Result<(), PortError> {
    let mut options = options;

    tracing::info!("reading revision log");
    let (index, svn_uuid) = read_log(progress_print, src_path, remote, &options.repository_url)?;
    options.messages.set_svn_uuid(svn_uuid);

    let (Some(first_rev), Some(last_rev)) = (index.first_rev(), index.last_rev()) else {
        tracing::error!("the revision log is empty");
        return Err(PortError);
    };
    tracing::info!("read {} revisions (r{first_rev} to r{last_rev})", index.entries().count());

    let paths = PathParser::new(std::mem::take(&mut options.layout));
    for branch in [&options.source_branch, &options.target_branch] {
        paths.branch(branch).map_err(|e| {
            tracing::error!("invalid branch: {e}");
            PortError
        })?;
    }
    let source_branch = options.source_branch.as_str();
    let target_branch = options.target_branch.as_str();

    tracing::info!("analyzing history");
    let mut history = build_history(progress_print, &index, first_rev, &options.tickets)?;

    let mut modules = std::mem::take(&mut options.modules);
    if modules.is_empty() || options.detect_common_modules {
        let detected = detect_modules(&mut history, source_branch, target_branch, last_rev)
            .map_err(|e| {
                tracing::error!("failed to detect modules: {e}");
                PortError
            })?;
        tracing::info!("common modules: {detected:?}");
        modules.extend(detected);
    }
    if modules.is_empty() {
        tracing::error!("no modules to merge");
        return Err(PortError);
    }

    let (selected, include_paths) = select_revisions(&index, &options);
    tracing::info!("{} revision(s) selected", selected.len());
    if selected.is_empty() {
        return Ok(());
    }

    if !options.skip_dependencies && !options.revert {
        let proceed = check_dependencies(progress_print, &mut history, &selected, &options)?;
        if !proceed {
            tracing::info!("stopped after dependency check");
            return Ok(());
        }
    }

    let mut sets = Vec::new();
    for entry in selected.iter() {
        match Commit::new((*entry).clone(), &options.tickets, &options.messages) {
            Ok(commit) => sets.push(CommitSet::new(commit)),
            Err(e @ MessageError::NoTicket { .. }) => tracing::warn!("{e}, skipped"),
            Err(e) => {
                tracing::error!("r{}: {e}", entry.revision);
                return Err(PortError);
            }
        }
    }
    if options.reorder_commits {
        if options.revert {
            tracing::warn!("commits are not reordered when reverting");
        } else {
            sets = commit::reorder(sets);
        }
    }

    let target_snapshot = branch_snapshot(&mut history, target_branch, last_rev).map_err(|e| {
        tracing::error!("failed to list {target_branch}: {e}");
        PortError
    })?;
    drop(history);

    let config = MergeConfig {
        semantic_moves: options.semantic_moves,
        revert: options.revert,
        filter: std::mem::take(&mut options.filter),
        include_paths,
    };
    let mapping = std::mem::take(&mut options.mapping);
    let merges = MergeHandler::new(config, paths, modules, mapping, &index);

    let mut unattended;
    let mut console;
    let decisions: &mut dyn DecisionProvider = if options.yes {
        unattended = Unattended { yes: true };
        &mut unattended
    } else {
        console = ConsoleDecisions::new(std::io::stdin().lock(), std::io::stdout());
        &mut console
    };

    let mut svn_executor;
    let mut dry_run_executor;
    let executor: &mut dyn Executor = match options.workspace {
        Some(ref workspace) if options.execute => {
            svn_executor = SvnExecutor::new(Workspace::new(workspace.clone()));
            &mut svn_executor
        }
        _ => {
            dry_run_executor = DryRunExecutor::new(std::io::stdout(), target_snapshot);
            &mut dry_run_executor
        }
    };

    progress_print.freeze_progress();
    let summary = MergeCommitHandler::new(
        merges,
        executor,
        decisions,
        options.auto_commit,
        options.no_commit,
    )
    .run(sets)
    .map_err(|e| {
        tracing::error!("{e}");
        PortError
    })?;

    tracing::info!(
        "{} revision(s) committed, {} applied, {} skipped",
        summary.committed.len(),
        summary.applied.len(),
        summary.skipped.len(),
    );
    if summary.stopped {
        tracing::warn!("stopped before all revisions were ported");
    }

    Ok(())
}

fn read_log(
    progress_print: &ProgressPrint,
    src_path: &Path,
    remote: bool,
    repository_url: &str,
) -> Result<(LogIndex, Option<uuid::Uuid>), PortError> {
    let mut source = crate::svn::source::LogSource::open(src_path, remote).map_err(|e| {
        tracing::error!("failed to open SVN dump source: {e}");
        PortError
    })?;

    let mut index = LogIndex::new(repository_url.into());
    let svn_uuid = {
        let mut reader = crate::svn::dump::LogReader::new(source.stream()).map_err(|e| {
            tracing::error!("failed to read SVN dump: {e}");
            PortError
        })?;

        while let Some(entry) = reader.next_entry().map_err(|e| {
            tracing::error!("failed to read SVN dump: {e}");
            PortError
        })? {
            progress_print.set_progress(format!("reading r{}", entry.revision));
            if entry.revision == 0 || entry.changed_paths.is_empty() {
                continue;
            }
            match entry.date {
                Some(date) => tracing::debug!(
                    "r{} by {} at {}",
                    entry.revision,
                    entry.author,
                    date.format("%Y-%m-%d %H:%M:%S"),
                ),
                None => tracing::debug!("r{} by {}", entry.revision, entry.author),
            }
            for path in entry.changed_paths.values() {
                tracing::trace!(
                    "r{}: {} {}",
                    entry.revision,
                    path.change_type.letter(),
                    path.path,
                );
            }
            index.insert(entry);
        }
        reader.uuid().copied()
    };

    if let Err(e) = source.close() {
        tracing::error!("SVN dump error: {e}");
        return Err(PortError);
    }

    Ok((index, svn_uuid))
}

fn build_history(
    progress_print: &ProgressPrint,
    index: &LogIndex,
    first_rev: Rev,
    tickets: &TicketParser,
) -> Result<History, PortError> {
    let mut builder = HistoryBuilder::new(first_rev, Direction::Forward, tickets);
    for entry in index.entries() {
        progress_print.set_progress(format!("analyzing r{}", entry.revision));
        builder.handle_log_entry(entry).map_err(|e| {
            tracing::error!("r{}: {e}", entry.revision);
            PortError
        })?;
    }
    Ok(builder.finish())
}

/// Directories directly below `branch` alive at `rev`.
fn top_level_dirs(
    history: &mut History,
    branch: &str,
    rev: Rev,
) -> Result<BTreeSet<String>, HistoryError> {
    let mut result = BTreeSet::new();
    for node in history.expand_contents(branch, rev)? {
        let node = history.node(node);
        if node.kind() != NodeKind::Dir {
            continue;
        }
        let Some(name) = node
            .path()
            .strip_prefix(branch)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            continue;
        };
        if !name.is_empty() && !name.contains('/') {
            result.insert(name.to_string());
        }
    }
    Ok(result)
}

fn detect_modules(
    history: &mut History,
    source_branch: &str,
    target_branch: &str,
    rev: Rev,
) -> Result<BTreeSet<String>, HistoryError> {
    let source_modules = top_level_dirs(history, source_branch, rev)?;
    let target_modules = top_level_dirs(history, target_branch, rev)?;
    Ok(source_modules
        .intersection(&target_modules)
        .cloned()
        .collect())
}

/// Resources of `branch` at `rev`, relative to the branch.
fn branch_snapshot(history: &mut History, branch: &str, rev: Rev) -> Result<Snapshot, HistoryError> {
    let nodes = history.expand_contents(branch, rev)?;
    Ok(Snapshot::new(nodes.into_iter().filter_map(|node| {
        history
            .node(node)
            .path()
            .strip_prefix(branch)?
            .strip_prefix('/')
            .map(String::from)
    })))
}

fn select_revisions<'a>(
    index: &'a LogIndex,
    options: &Options<'_>,
) -> (Vec<&'a LogEntry>, FHashMap<Rev, BTreeSet<String>>) {
    let source_branch = options.source_branch.as_str();
    let start = options.start_revision.unwrap_or(Rev::MIN);
    let end = options.end_revision.unwrap_or(Rev::MAX);

    let touches_source = |entry: &LogEntry| {
        entry.changed_paths.keys().any(|path| {
            is_same_or_child(path, source_branch) && {
                let resource = path[source_branch.len()..].trim_start_matches('/');
                options.filter.accepts(resource)
            }
        })
    };

    let mut selected: Vec<&LogEntry> = index
        .entries()
        .filter(|entry| (start..=end).contains(&entry.revision))
        .filter(|entry| !options.ignore_revisions.contains(&entry.revision))
        .filter(|entry| touches_source(*entry))
        .collect();

    let mut include_paths = FHashMap::default();
    for (rev, include) in options.additional_revisions.iter() {
        let Some(entry) = index.get(*rev) else {
            tracing::warn!("additional revision r{rev} is not in the revision log");
            continue;
        };
        if !selected.iter().any(|selected| selected.revision == *rev) {
            selected.push(entry);
        }
        if !include.is_empty() {
            include_paths.insert(*rev, include.clone());
        }
    }

    if options.revert {
        selected.sort_by(|a, b| b.revision.cmp(&a.revision));
    } else {
        selected.sort_by_key(|entry| entry.revision);
    }
    (selected, include_paths)
}

/// Prints the changes the selected ones depend on. Returns whether to go
/// on.
fn check_dependencies(
    progress_print: &ProgressPrint,
    history: &mut History,
    selected: &[&LogEntry],
    options: &Options<'_>,
) -> Result<bool, PortError> {
    progress_print.set_progress("checking dependencies".into());

    let mut builder = DependencyBuilder::new(&options.source_branch, &options.target_branch);
    builder.analyze_conflicts(history, selected).map_err(|e| {
        tracing::error!("dependency analysis failed: {e}");
        PortError
    })?;
    let dependencies = builder.finish();

    let tickets = &options.tickets;
    let report = DependencyReport::build(
        history,
        &dependencies,
        &options.source_branch,
        &options.report_filter,
        &|message: &str| tickets.ticket(message),
    );
    progress_print.freeze_progress();
    if report.is_empty() {
        tracing::info!("no missing dependencies");
        return Ok(true);
    }

    print!("{report}");
    if options.yes {
        tracing::warn!("continuing despite missing dependencies");
        return Ok(true);
    }
    commit::confirm(
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
        "Continue",
    )
    .map_err(|e| {
        tracing::error!("failed to read answer: {e}");
        PortError
    })
}
