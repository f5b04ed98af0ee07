use std::collections::BTreeSet;

use crate::FHashMap;
use crate::svn::{LogEntry, Rev};

mod decision;
mod handler;
mod message;
mod ticket;

pub(crate) use decision::{ConsoleDecisions, Unattended, confirm};
pub(crate) use handler::{Decision, DecisionProvider, MergeCommitHandler, Query};
pub(crate) use message::{DEFAULT_COMMIT_MSG_TEMPLATE, MessageError, MessageMaker};
pub(crate) use ticket::{
    DEFAULT_FOLLOW_UP_PATTERN, DEFAULT_MERGED_REVISION_PATTERN, DEFAULT_TICKET_PATTERN,
    TicketMessage, TicketParser,
};

/// A revision to port, with the message of the commit porting it.
#[derive(Clone, Debug)]
pub(crate) struct Commit {
    pub(crate) entry: LogEntry,
    pub(crate) ticket: TicketMessage,
    pub(crate) message: String,
    /// Resources to commit, filled as plans are applied.
    pub(crate) touched: BTreeSet<String>,
    /// Revisions joined into this commit.
    pub(crate) joined: Vec<Rev>,
}

impl Commit {
    pub(crate) fn new(
        entry: LogEntry,
        parser: &TicketParser,
        messages: &MessageMaker<'_>,
    ) -> Result<Self, MessageError> {
        let ticket = parser
            .parse(&entry.message)
            .ok_or(MessageError::NoTicket {
                rev: entry.revision,
            })?;
        let message = messages.make_message(&entry, &ticket)?;
        Ok(Self {
            entry,
            ticket,
            message,
            touched: BTreeSet::new(),
            joined: Vec::new(),
        })
    }

    #[inline]
    pub(crate) fn revision(&self) -> Rev {
        self.entry.revision
    }

    /// Revision ordering this commit among the others.
    pub(crate) fn original_revision(&self) -> Rev {
        self.ticket.merged_revision.unwrap_or(self.entry.revision)
    }

    /// Makes `other` part of this commit.
    pub(crate) fn join(&mut self, other: Self) {
        self.message.push('\n');
        self.message.push_str(&other.message);
        self.touched.extend(other.touched);
        self.joined.push(other.entry.revision);
        self.joined.extend(other.joined);
    }

    pub(crate) fn description(&self) -> String {
        format!("[{}]: {}", self.revision(), encode(&self.entry.message))
    }

    /// Flags the message as an API change, in front of the reference to the
    /// ported revision.
    pub(crate) fn mark_api_change(&mut self) -> bool {
        const MARKER: &str = "API change: ";

        let reference = format!("[{}]:", self.revision());
        let Some(pos) = self.message.find(&reference) else {
            return false;
        };
        if self.message[..pos].ends_with(MARKER) {
            return true;
        }
        self.message.insert_str(pos, MARKER);
        true
    }
}

/// Escapes line breaks, to show a message on one line.
pub(crate) fn encode(message: &str) -> String {
    message.replace('\n', "\\n").replace('\r', "\\r")
}

pub(crate) fn decode(message: &str) -> String {
    message.replace("\\n", "\n").replace("\\r", "\r")
}

/// A commit followed by the commits completing it.
#[derive(Clone, Debug)]
pub(crate) struct CommitSet {
    commits: Vec<Commit>,
}

impl CommitSet {
    pub(crate) fn new(lead: Commit) -> Self {
        Self {
            commits: vec![lead],
        }
    }

    /// Panics if the set is empty.
    pub(crate) fn lead(&self) -> &Commit {
        &self.commits[0]
    }

    #[cfg(test)]
    pub(crate) fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub(crate) fn add(&mut self, commit: Commit) {
        self.commits.push(commit);
    }

    pub(crate) fn into_commits(self) -> Vec<Commit> {
        self.commits
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Moves follow-ups into the set of the commit they complete, then sorts the
/// sets by the revision their lead was originally committed in.
pub(crate) fn reorder(sets: Vec<CommitSet>) -> Vec<CommitSet> {
    let mut result = Vec::<CommitSet>::with_capacity(sets.len());
    let mut set_by_rev = FHashMap::<Rev, usize>::default();

    for set in sets {
        let mut remaining = Vec::new();
        for commit in set.into_commits() {
            let lead = commit.ticket.follow_up;
            match lead.and_then(|rev| set_by_rev.get(&rev).copied()) {
                Some(index) => {
                    set_by_rev.insert(commit.revision(), index);
                    result[index].add(commit);
                }
                None => {
                    if lead.is_some() {
                        tracing::warn!(
                            "lead commit for follow-up not found: {}",
                            commit.description(),
                        );
                    }
                    remaining.push(commit);
                }
            }
        }

        let set = CommitSet { commits: remaining };
        if !set.is_empty() {
            set_by_rev.insert(set.lead().revision(), result.len());
            result.push(set);
        }
    }

    result.sort_by_key(|set| set.lead().original_revision());
    result
}
