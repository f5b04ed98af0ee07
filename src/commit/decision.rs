use std::io::{BufRead, Write};

use super::{Decision, DecisionProvider, Query, decode, encode};

const HELP: &str = "'commit: <message>' to commit with another message, \
    'api' to add \"API change\" to the message, \
    'exclude: <path>' to exclude a path from the commit, \
    'include: <path>' to include a path in the commit, \
    'skip' to skip this revision, \
    'join: <revision>' to join a following revision with the current commit \
    or 'stop' to stop.";

/// Asks the operator on a terminal.
pub(crate) struct ConsoleDecisions<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleDecisions<R, W> {
    pub(crate) fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn show(&mut self, query: &Query<'_>) -> std::io::Result<()> {
        let commit = query.commit();
        match query {
            Query::Conflicts { conflicts, .. } => {
                writeln!(self.output, "Merge has conflicts in:")?;
                for conflict in conflicts.iter() {
                    writeln!(self.output, "    {conflict}")?;
                }
            }
            Query::Approve { .. } => {}
            Query::CommitFailed { error, .. } => {
                writeln!(self.output, "Commit failed: {error}")?;
            }
        }
        writeln!(self.output, "{}", commit.description())?;
        writeln!(self.output, "commit: {}", encode(&commit.message))?;
        let proceed = command(&query.proceed_decision());
        writeln!(self.output, "Enter '{proceed}' to commit, {HELP}")?;
        self.output.flush()
    }

    /// `proceed` is the only one of `commit` and `retry` accepted.
    fn read_decision(&mut self, proceed: Decision) -> std::io::Result<Option<Decision>> {
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let line = line.trim_end_matches(['\r', '\n']);

            let decision = match line {
                _ if line == command(&proceed) => Some(proceed.clone()),
                "api" => Some(Decision::ApiChange),
                "skip" => Some(Decision::Skip),
                "stop" => Some(Decision::Stop),
                _ => {
                    if let Some(message) = line.strip_prefix("commit: ") {
                        Some(Decision::EditMessage(decode(message)))
                    } else if let Some(path) = line.strip_prefix("exclude: ") {
                        Some(Decision::ExcludePath(path.trim().into()))
                    } else if let Some(path) = line.strip_prefix("include: ") {
                        Some(Decision::IncludePath(path.trim().into()))
                    } else if let Some(rev) = line.strip_prefix("join: ") {
                        rev.trim().parse().ok().map(Decision::Join)
                    } else {
                        None
                    }
                }
            };

            match decision {
                Some(decision) => return Ok(Some(decision)),
                None => {
                    writeln!(self.output, "Illegal input: {line:?}")?;
                    self.output.flush()?;
                }
            }
        }
    }
}

impl<R: BufRead, W: Write> DecisionProvider for ConsoleDecisions<R, W> {
    fn decide(&mut self, query: &Query<'_>) -> Decision {
        let result = self
            .show(query)
            .and_then(|()| self.read_decision(query.proceed_decision()));
        match result {
            Ok(Some(decision)) => decision,
            Ok(None) => {
                tracing::info!("end of input, stopping");
                Decision::Stop
            }
            Err(e) => {
                tracing::error!("failed to read decision: {e}");
                Decision::Stop
            }
        }
    }
}

fn command(proceed: &Decision) -> &'static str {
    match proceed {
        Decision::Retry => "retry",
        _ => "commit",
    }
}

/// Answers without asking.
pub(crate) struct Unattended {
    /// Commit even with conflicts.
    pub(crate) yes: bool,
}

impl DecisionProvider for Unattended {
    fn decide(&mut self, query: &Query<'_>) -> Decision {
        match query {
            Query::Approve { .. } => Decision::Commit,
            Query::Conflicts { commit, conflicts } => {
                if self.yes {
                    Decision::Commit
                } else {
                    tracing::error!(
                        "r{} has {} conflict(s), stopping",
                        commit.revision(),
                        conflicts.len(),
                    );
                    Decision::Stop
                }
            }
            Query::CommitFailed { .. } => Decision::Stop,
        }
    }
}

/// Asks a yes/no question. End of input means no.
pub(crate) fn confirm(
    input: &mut dyn BufRead,
    output: &mut dyn Write,
    question: &str,
) -> std::io::Result<bool> {
    loop {
        write!(output, "{question} (yes/no)? ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim() {
            "yes" | "y" => return Ok(true),
            "no" | "n" => return Ok(false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConsoleDecisions, Unattended, confirm};
    use crate::commit::handler::{Decision, DecisionProvider as _, Query};
    use crate::commit::{Commit, DEFAULT_COMMIT_MSG_TEMPLATE, MessageMaker, TicketParser};
    use crate::exec::ExecError;
    use crate::svn::LogEntry;

    fn commit() -> Commit {
        let mut entry = LogEntry::new(5);
        entry.message = "Ticket #9: Fix\nmore".into();
        let maker =
            MessageMaker::new(DEFAULT_COMMIT_MSG_TEMPLATE, "/trunk", "/branches/b", false).unwrap();
        Commit::new(entry, &TicketParser::default(), &maker).unwrap()
    }

    #[test]
    fn test_console() {
        let input = "\
nonsense
join: abc
join: 12
commit: one\\ntwo
exclude: core/a.txt
include: web
api
retry
skip
stop
commit
";
        let mut console = ConsoleDecisions::new(input.as_bytes(), Vec::new());
        let commit = commit();
        let query = Query::Approve { commit: &commit };

        let decisions: Vec<Decision> = (0..10).map(|_| console.decide(&query)).collect();
        assert_eq!(
            decisions,
            [
                Decision::Join(12),
                Decision::EditMessage("one\ntwo".into()),
                Decision::ExcludePath("core/a.txt".into()),
                Decision::IncludePath("web".into()),
                Decision::ApiChange,
                Decision::Skip,
                Decision::Stop,
                Decision::Commit,
                // End of input
                Decision::Stop,
                Decision::Stop,
            ],
        );

        let output = String::from_utf8(console.output).unwrap();
        assert!(output.contains("Enter 'commit' to commit, 'commit: <message>'"));
        assert!(output.contains("Illegal input: \"retry\""));
        assert!(output.contains("Illegal input: \"nonsense\""));
        assert!(output.contains("Illegal input: \"join: abc\""));
        assert!(output.contains("[5]: Ticket #9: Fix\\nmore"));
        assert!(output.contains("commit: Ticket #9: Ported to b from trunk: [5]: Fix\\nmore"));
    }

    #[test]
    fn test_console_shows_conflicts() {
        let mut console = ConsoleDecisions::new("skip\nstop\n".as_bytes(), Vec::new());
        let commit = commit();
        let conflicts = ["core/a.txt".to_string()];
        let error = ExecError::Io(std::io::Error::other("locked"));

        let query = Query::Conflicts {
            commit: &commit,
            conflicts: &conflicts,
        };
        assert_eq!(console.decide(&query), Decision::Skip);
        let query = Query::CommitFailed {
            commit: &commit,
            error: &error,
        };
        assert_eq!(console.decide(&query), Decision::Stop);

        let output = String::from_utf8(console.output).unwrap();
        assert!(output.contains("Merge has conflicts in:\n    core/a.txt\n"));
        assert!(output.contains("Commit failed: I/O error: locked\n"));
    }

    #[test]
    fn test_retry_after_failed_commit() {
        let mut console = ConsoleDecisions::new("commit\nretry\n".as_bytes(), Vec::new());
        let commit = commit();
        let error = ExecError::Io(std::io::Error::other("out of date"));
        let query = Query::CommitFailed {
            commit: &commit,
            error: &error,
        };
        assert_eq!(console.decide(&query), Decision::Retry);

        let output = String::from_utf8(console.output).unwrap();
        assert!(output.contains("Enter 'retry' to commit, "));
        assert!(output.contains("Illegal input: \"commit\""));
    }

    #[test]
    fn test_unattended() {
        let commit = commit();
        let conflicts = ["x".to_string()];
        let conflict_query = Query::Conflicts {
            commit: &commit,
            conflicts: &conflicts,
        };

        let mut careful = Unattended { yes: false };
        assert_eq!(careful.decide(&Query::Approve { commit: &commit }), Decision::Commit);
        assert_eq!(careful.decide(&conflict_query), Decision::Stop);

        let mut eager = Unattended { yes: true };
        assert_eq!(eager.decide(&conflict_query), Decision::Commit);
    }

    #[test]
    fn test_confirm() {
        let mut output = Vec::new();
        assert!(confirm(&mut "maybe\nyes\n".as_bytes(), &mut output, "Continue").unwrap());
        assert!(!confirm(&mut "no\n".as_bytes(), &mut output, "Continue").unwrap());
        assert!(!confirm(&mut "".as_bytes(), &mut output, "Continue").unwrap());
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Continue (yes/no)? ".repeat(4),
        );
    }
}
