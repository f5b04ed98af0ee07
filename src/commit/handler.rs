use super::{Commit, CommitSet, encode};
use crate::exec::{ExecError, Executor};
use crate::merge::MergeHandler;
use crate::svn::{LogEntry, Rev};

/// Answer of the operator to a [`Query`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Commit as is. Not accepted after a failed commit.
    Commit,
    /// Try the failed commit again. Only accepted after a failed commit.
    Retry,
    /// Drop the revision. Whatever was applied stays in the working copy.
    Skip,
    /// Apply a later pending revision and commit both together.
    Join(Rev),
    /// End the run.
    Stop,
    /// Commit with another message.
    EditMessage(String),
    ExcludePath(String),
    IncludePath(String),
    /// Flag the message as an API change and commit.
    ApiChange,
}

pub(crate) enum Query<'a> {
    Conflicts {
        commit: &'a Commit,
        conflicts: &'a [String],
    },
    /// Asked before each commit unless committing automatically.
    Approve { commit: &'a Commit },
    CommitFailed {
        commit: &'a Commit,
        error: &'a ExecError,
    },
}

impl Query<'_> {
    /// The answer that commits the pending message as is.
    pub(crate) fn proceed_decision(&self) -> Decision {
        match self {
            Self::Conflicts { .. } | Self::Approve { .. } => Decision::Commit,
            Self::CommitFailed { .. } => Decision::Retry,
        }
    }

    pub(crate) fn commit(&self) -> &Commit {
        match self {
            Self::Conflicts { commit, .. }
            | Self::Approve { commit }
            | Self::CommitFailed { commit, .. } => *commit,
        }
    }
}

pub(crate) trait DecisionProvider {
    fn decide(&mut self, query: &Query<'_>) -> Decision;
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Summary {
    /// Ported revisions, including the joined ones.
    pub(crate) committed: Vec<Rev>,
    /// Applied without committing.
    pub(crate) applied: Vec<Rev>,
    pub(crate) skipped: Vec<Rev>,
    pub(crate) stopped: bool,
}

#[derive(Clone, Copy)]
enum Ask<'a> {
    Conflicts(&'a [String]),
    Approve,
    CommitFailed(&'a ExecError),
}

enum Outcome {
    Proceed,
    Skip,
    Stop,
    /// The next revision to apply for the current commit.
    Joined(LogEntry),
}

enum Flow {
    Next,
    Stop,
}

/// Applies and commits the revisions of the commit sets one after another.
pub(crate) struct MergeCommitHandler<'a> {
    merges: MergeHandler<'a>,
    executor: &'a mut dyn Executor,
    decisions: &'a mut dyn DecisionProvider,
    auto_commit: bool,
    no_commit: bool,
}

impl<'a> MergeCommitHandler<'a> {
    pub(crate) fn new(
        merges: MergeHandler<'a>,
        executor: &'a mut dyn Executor,
        decisions: &'a mut dyn DecisionProvider,
        auto_commit: bool,
        no_commit: bool,
    ) -> Self {
        Self {
            merges,
            executor,
            decisions,
            auto_commit,
            no_commit,
        }
    }

    /// Fails only when the executor cannot apply a plan. Commit failures are
    /// left to the decision provider.
    pub(crate) fn run(&mut self, sets: Vec<CommitSet>) -> Result<Summary, ExecError> {
        // Joined commits leave their slot empty
        let mut pending: Vec<Option<Commit>> = sets
            .into_iter()
            .flat_map(CommitSet::into_commits)
            .map(Some)
            .collect();

        let mut summary = Summary::default();
        for index in 0..pending.len() {
            let Some(commit) = pending[index].take() else {
                continue;
            };
            match self.merge(commit, &mut pending[(index + 1)..], &mut summary)? {
                Flow::Next => {}
                Flow::Stop => {
                    tracing::info!("stopping");
                    summary.stopped = true;
                    break;
                }
            }
        }
        Ok(summary)
    }

    fn merge(
        &mut self,
        mut commit: Commit,
        later: &mut [Option<Commit>],
        summary: &mut Summary,
    ) -> Result<Flow, ExecError> {
        let mut entry = commit.entry.clone();

        'apply: loop {
            let plan = self.merges.parse_merge(&entry, self.executor.working_copy());
            if plan.is_empty() && commit.joined.is_empty() {
                tracing::info!("skipping r{} (no relevant modules touched)", entry.revision);
                summary.skipped.push(commit.revision());
                return Ok(Flow::Next);
            }

            tracing::info!("revision {}: {}", entry.revision, encode(&entry.message));
            commit.touched.extend(plan.touched.iter().cloned());

            let conflicts = self.executor.apply(&plan)?;
            let mut approved = false;
            if !conflicts.is_empty() {
                for conflict in conflicts.iter() {
                    tracing::warn!("r{}: conflict in {conflict}", entry.revision);
                }
                match self.ask(&mut commit, later, Ask::Conflicts(&conflicts)) {
                    Outcome::Proceed => approved = true,
                    Outcome::Skip => return Ok(skip(commit, summary)),
                    Outcome::Stop => return Ok(Flow::Stop),
                    Outcome::Joined(next) => {
                        entry = next;
                        continue 'apply;
                    }
                }
            }

            if self.no_commit {
                tracing::info!("r{} applied but not committed", commit.revision());
                summary.applied.push(commit.revision());
                summary.applied.extend(commit.joined.iter().copied());
                return Ok(Flow::Next);
            }

            if !self.auto_commit && !approved {
                match self.ask(&mut commit, later, Ask::Approve) {
                    Outcome::Proceed => {}
                    Outcome::Skip => return Ok(skip(commit, summary)),
                    Outcome::Stop => return Ok(Flow::Stop),
                    Outcome::Joined(next) => {
                        entry = next;
                        continue 'apply;
                    }
                }
            }

            loop {
                match self.executor.commit(&commit.message, &commit.touched) {
                    Ok(()) => {
                        tracing::info!("r{} applied and committed", commit.revision());
                        summary.committed.push(commit.revision());
                        summary.committed.extend(commit.joined.iter().copied());
                        return Ok(Flow::Next);
                    }
                    Err(e) => {
                        tracing::warn!("commit of r{} failed: {e}", commit.revision());
                        match self.ask(&mut commit, later, Ask::CommitFailed(&e)) {
                            Outcome::Proceed => {}
                            Outcome::Skip => return Ok(skip(commit, summary)),
                            Outcome::Stop => return Ok(Flow::Stop),
                            Outcome::Joined(next) => {
                                entry = next;
                                continue 'apply;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Asks until the operator decides how to go on with `commit`.
    fn ask(&mut self, commit: &mut Commit, later: &mut [Option<Commit>], ask: Ask<'_>) -> Outcome {
        loop {
            let query = match ask {
                Ask::Conflicts(conflicts) => Query::Conflicts {
                    commit: &*commit,
                    conflicts,
                },
                Ask::Approve => Query::Approve { commit: &*commit },
                Ask::CommitFailed(error) => Query::CommitFailed {
                    commit: &*commit,
                    error,
                },
            };

            let proceed = query.proceed_decision();
            match self.decisions.decide(&query) {
                decision @ (Decision::Commit | Decision::Retry) => {
                    if decision == proceed {
                        return Outcome::Proceed;
                    }
                    tracing::warn!("{decision:?} does not apply here, expected {proceed:?}");
                }
                Decision::EditMessage(message) => {
                    commit.message = message;
                    return Outcome::Proceed;
                }
                Decision::ApiChange => {
                    if commit.mark_api_change() {
                        return Outcome::Proceed;
                    }
                    tracing::warn!("message could not be parsed to insert the API change flag");
                }
                Decision::ExcludePath(path) => {
                    if !commit.touched.remove(&path) {
                        tracing::warn!("{path:?} is not among the resources being committed");
                    }
                }
                Decision::IncludePath(path) => {
                    if commit.touched.contains(&path) {
                        tracing::warn!("{path:?} is already being committed");
                    } else {
                        commit.touched.insert(path);
                    }
                }
                Decision::Skip => return Outcome::Skip,
                Decision::Stop => return Outcome::Stop,
                Decision::Join(rev) => {
                    let joined = later
                        .iter_mut()
                        .find_map(|slot| slot.take_if(|pending| pending.revision() == rev));
                    match joined {
                        Some(joined) => {
                            let entry = joined.entry.clone();
                            commit.join(joined);
                            return Outcome::Joined(entry);
                        }
                        None => tracing::warn!("r{rev} is not a pending revision of this merge"),
                    }
                }
            }
        }
    }
}

fn skip(commit: Commit, summary: &mut Summary) -> Flow {
    tracing::info!("skipped r{}", commit.revision());
    summary.skipped.push(commit.revision());
    summary.skipped.extend(commit.joined);
    Flow::Next
}
