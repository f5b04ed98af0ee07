use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(
    about = "Ports Subversion revisions from one branch to another",
    long_about = "Ports Subversion revisions from one branch to another. \
        Reads the revision log, reports changes the selected revisions \
        depend on that were never ported, and replays each revision \
        (copies and moves included) as svn merge and svn commit commands."
)]
pub(crate) struct Cli {
    #[arg(
        long = "src",
        short = 's',
        value_name = "PATH",
        help = "Dump file (optionally compressed) or repository holding the revision log"
    )]
    pub(crate) src: PathBuf,
    #[arg(
        long = "remote-svn",
        help = "Read the log of a remote repository through svnrdump"
    )]
    pub(crate) remote_svn: bool,
    #[arg(
        long = "params",
        short = 'P',
        value_name = "FILE",
        help = "TOML file naming the branches, revisions and modules to port"
    )]
    pub(crate) params: PathBuf,
    #[arg(
        long = "workspace",
        short = 'w',
        value_name = "PATH",
        help = "Checkout of the target branch"
    )]
    pub(crate) workspace: Option<PathBuf>,
    #[arg(
        long = "execute",
        requires = "workspace",
        help = "Merge and commit in the workspace (without it, commands are only printed)"
    )]
    pub(crate) execute: bool,
    #[arg(
        long = "yes",
        short = 'y',
        help = "Never prompt: keep going past missing dependencies and commit even with conflicts"
    )]
    pub(crate) yes: bool,
    #[arg(long = "no-progress", help = "Hide the revision counter on stderr")]
    pub(crate) no_progress: bool,
    #[arg(
        long = "stderr-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Most verbose level logged to the terminal [default: warn]"
    )]
    pub(crate) stderr_log_level: Option<LogLevel>,
    #[arg(
        long = "log-file",
        value_name = "PATH",
        help = "Also append log records to this file"
    )]
    pub(crate) log_file: Option<PathBuf>,
    #[arg(
        long = "file-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Most verbose level written to the log file [default: debug]"
    )]
    pub(crate) file_log_level: Option<LogLevel>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory as _, Parser as _};

    use super::Cli;

    #[test]
    fn test_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_execute_needs_workspace() {
        let without_workspace =
            Cli::try_parse_from(["subcherry", "-s", "repo", "-P", "p.toml", "--execute"]);
        assert!(without_workspace.is_err());

        let cli = Cli::try_parse_from([
            "subcherry",
            "-s",
            "repo",
            "-P",
            "p.toml",
            "-w",
            "wc",
            "--execute",
            "--file-log-level",
            "trace",
        ])
        .unwrap();
        assert!(cli.execute);
        assert_eq!(cli.workspace.as_deref(), Some(std::path::Path::new("wc")));
        assert_eq!(
            cli.file_log_level.map(tracing::Level::from),
            Some(tracing::Level::TRACE),
        );
    }
}
