#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::enum_variant_names, clippy::type_complexity)]

use std::collections::BTreeSet;
use std::process::ExitCode;

mod cli;
mod commit;
mod exec;
mod history;
mod merge;
mod params_file;
mod path_pattern;
mod port;
mod svn;
mod term_out;

use term_out::ProgressPrint;

pub(crate) type FHashMap<K, V> = std::collections::HashMap<K, V, foldhash::fast::RandomState>;
pub(crate) type FHashSet<T> = std::collections::HashSet<T, foldhash::fast::RandomState>;

enum RunError {
    Generic,
    Usage,
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return Err(RunError::Usage);
        }
    };

    let term_out = term_out::init(start, !args.no_progress);
    let progress_print = term_out.get_progress_print();

    let stderr_log_level = tracing::Level::from(args.stderr_log_level.unwrap_or(cli::LogLevel::Warn));
    let file_log_level = args.file_log_level.map(tracing::Level::from);

    if let Err(e) = init_logger(
        Some(stderr_log_level),
        args.log_file.as_deref(),
        file_log_level,
        progress_print.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError::Generic);
    }

    let params_raw = match std::fs::read_to_string(&args.params) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to read {:?}: {e}", args.params);
            return Err(RunError::Generic);
        }
    };
    let params: params_file::PortParams = match toml::from_str(&params_raw) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to parse {:?}: {e}", args.params);
            return Err(RunError::Generic);
        }
    };

    let source_branch = branch_path(&params.source_branch);
    let target_branch = branch_path(&params.target_branch);

    let mut layout = merge::BranchLayout::default();
    for dir in params.branches.iter() {
        layout.add_branch_dir(dir.trim_matches('/')).map_err(|e| {
            tracing::error!("cannot add branch directory {dir:?}: {e}");
            RunError::Generic
        })?;
    }

    let filter = path_pattern::PathFilter {
        include: make_pattern(&params.include_paths)?,
        exclude: make_pattern(&params.exclude_paths)?,
    };
    let report_filter = history::report::ReportFilter {
        exclude_paths: make_pattern(&params.dependency_report.exclude_paths)?,
        exclude_tickets: params
            .dependency_report
            .exclude_tickets
            .iter()
            .cloned()
            .collect(),
    };

    let mapping = merge::ResourceMapping::new(
        params
            .resource_mapping
            .iter()
            .map(|rule| (rule.pattern.as_str(), rule.replacement.as_str())),
    )
    .map_err(|(pat, e)| {
        tracing::error!("invalid resource mapping pattern {pat:?}: {e}");
        RunError::Generic
    })?;

    let tickets = commit::TicketParser::new(
        params
            .ticket_pattern
            .as_deref()
            .unwrap_or(commit::DEFAULT_TICKET_PATTERN),
        params
            .merged_revision_pattern
            .as_deref()
            .unwrap_or(commit::DEFAULT_MERGED_REVISION_PATTERN),
        params
            .follow_up_pattern
            .as_deref()
            .unwrap_or(commit::DEFAULT_FOLLOW_UP_PATTERN),
    )
    .map_err(|(pat, e)| {
        tracing::error!("invalid commit message pattern {pat:?}: {e}");
        RunError::Generic
    })?;

    let commit_msg_template = params
        .commit_msg_template
        .as_deref()
        .unwrap_or(commit::DEFAULT_COMMIT_MSG_TEMPLATE);
    let messages = commit::MessageMaker::new(
        commit_msg_template,
        &source_branch,
        &target_branch,
        params.revert,
    )
    .map_err(|e| {
        tracing::error!("{e}");
        RunError::Generic
    })?;

    let options = port::Options {
        source_branch,
        target_branch,
        layout,
        modules: params.modules.iter().map(|m| m.trim_matches('/').to_string()).collect(),
        detect_common_modules: params.detect_common_modules,
        repository_url: params.repository_url.clone(),
        start_revision: params.start_revision,
        end_revision: params.end_revision,
        ignore_revisions: params.ignore_revisions.iter().copied().collect(),
        additional_revisions: params
            .additional_revisions
            .iter()
            .map(|additional| {
                let include: BTreeSet<String> = additional
                    .include_paths
                    .iter()
                    .map(|path| path.trim_matches('/').to_string())
                    .collect();
                (additional.rev, include)
            })
            .collect(),
        revert: params.revert,
        semantic_moves: params.semantic_moves,
        skip_dependencies: params.skip_dependencies,
        reorder_commits: params.reorder_commits,
        auto_commit: params.auto_commit,
        no_commit: params.no_commit,
        filter,
        mapping,
        tickets,
        messages,
        report_filter,
        workspace: args.workspace.clone(),
        execute: args.execute,
        yes: args.yes,
    };

    let r = port::run(&progress_print, options, &args.src, args.remote_svn);

    term_out.finish();

    r.map_err(|_| RunError::Generic)
}

/// `branches/1.x` and `/branches/1.x/` both become `/branches/1.x`.
fn branch_path(branch: &str) -> String {
    format!("/{}", branch.trim_matches('/'))
}

fn make_pattern(patterns: &[String]) -> Result<path_pattern::PathPattern, RunError> {
    path_pattern::PathPattern::new(patterns.iter().map(String::as_str)).map_err(|(pat, e)| {
        tracing::error!("invalid pattern {pat:?}: {e}");
        RunError::Generic
    })
}

fn init_logger(
    stderr_level: Option<tracing::Level>,
    file_path: Option<&std::path::Path>,
    file_level: Option<tracing::Level>,
    progress_print: ProgressPrint,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = if let Some(stderr_level) = stderr_level {
        let filter = tracing_subscriber::filter::LevelFilter::from_level(stderr_level);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(MakeLogPrinter::new(progress_print))
                .with_filter(filter),
        )
    } else {
        None
    };

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

struct MakeLogPrinter {
    progress_print: ProgressPrint,
}

impl MakeLogPrinter {
    fn new(progress_print: ProgressPrint) -> Self {
        Self { progress_print }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogPrinter {
    type Writer = LogPrinter<'a>;

    fn make_writer(&'a self) -> LogPrinter<'a> {
        LogPrinter {
            progress_print: &self.progress_print,
            buf: Vec::new(),
        }
    }
}

struct LogPrinter<'a> {
    progress_print: &'a ProgressPrint,
    buf: Vec<u8>,
}

impl Drop for LogPrinter<'_> {
    fn drop(&mut self) {
        self.progress_print.print_raw_line(self.buf.clone());
    }
}

impl std::io::Write for LogPrinter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
