use std::collections::{BTreeMap, BTreeSet};

use super::{ChangeId, Dependency, History, NodeId};
use crate::FHashSet;
use crate::path_pattern::PathPattern;
use crate::svn::Rev;

/// Limits what ends up in a [`DependencyReport`].
#[derive(Default)]
pub(crate) struct ReportFilter {
    /// Matched against file paths relative to the source branch.
    pub(crate) exclude_paths: PathPattern,
    pub(crate) exclude_tickets: FHashSet<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConflictFile {
    pub(crate) path: String,
    /// Merged revisions expected to conflict on this file.
    pub(crate) merged: Vec<Rev>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MissingChange {
    pub(crate) revision: Rev,
    pub(crate) author: String,
    pub(crate) summary: String,
    pub(crate) files: Vec<ConflictFile>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TicketGroup {
    /// `None` collects changes without a recognizable ticket.
    pub(crate) ticket: Option<String>,
    pub(crate) missing: Vec<MissingChange>,
}

/// Missing changes grouped by ticket, for the operator to review.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DependencyReport {
    groups: Vec<TicketGroup>,
}

impl DependencyReport {
    pub(crate) fn build(
        history: &History,
        dependencies: &BTreeMap<ChangeId, Dependency>,
        source_branch: &str,
        filter: &ReportFilter,
        ticket_of: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        // missing change -> conflicting file -> merged changes
        let mut missing_changes = BTreeMap::<ChangeId, BTreeMap<NodeId, BTreeSet<Rev>>>::new();
        for dependency in dependencies.values() {
            let merged_rev = history.change(dependency.change()).revision;
            for (&missing, nodes) in dependency.required() {
                let files = missing_changes.entry(missing).or_default();
                for &node in nodes {
                    files.entry(node).or_default().insert(merged_rev);
                }
            }
        }

        let mut by_ticket = BTreeMap::<(bool, usize, String), TicketGroup>::new();
        for (missing, files) in missing_changes {
            let change = history.change(missing);
            let ticket = ticket_of(&change.message);
            if ticket
                .as_ref()
                .is_some_and(|ticket| filter.exclude_tickets.contains(ticket))
            {
                continue;
            }

            let mut conflict_files: Vec<ConflictFile> = files
                .into_iter()
                .map(|(node, merged)| ConflictFile {
                    path: history.node(node).path().to_string(),
                    merged: merged.into_iter().collect(),
                })
                .filter(|file| {
                    let resource = file
                        .path
                        .strip_prefix(source_branch)
                        .unwrap_or(&file.path)
                        .trim_start_matches('/');
                    !filter.exclude_paths.is_match(resource)
                })
                .collect();
            if conflict_files.is_empty() {
                continue;
            }
            conflict_files.sort_by(|a, b| a.path.cmp(&b.path));

            // Numeric ticket ids sort by value, changes without ticket last
            let sort_key = match ticket.as_deref() {
                Some(ticket) => (false, ticket.len(), ticket.to_string()),
                None => (true, 0, String::new()),
            };
            by_ticket
                .entry(sort_key)
                .or_insert_with(|| TicketGroup {
                    ticket,
                    missing: Vec::new(),
                })
                .missing
                .push(MissingChange {
                    revision: change.revision,
                    author: change.author.clone(),
                    summary: change.first_message_line().to_string(),
                    files: conflict_files,
                });
        }

        let mut groups: Vec<TicketGroup> = by_ticket.into_values().collect();
        for group in groups.iter_mut() {
            group.missing.sort_by_key(|missing| missing.revision);
        }
        Self { groups }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn groups(&self) -> &[TicketGroup] {
        &self.groups
    }
}

impl std::fmt::Display for DependencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for group in self.groups.iter() {
            match group.ticket {
                Some(ref ticket) => writeln!(f, "Missing changes of ticket #{ticket}:")?,
                None => writeln!(f, "Missing changes without ticket:")?,
            }
            for missing in group.missing.iter() {
                writeln!(
                    f,
                    "  r{} ({}): {}",
                    missing.revision, missing.author, missing.summary,
                )?;
                for file in missing.files.iter() {
                    write!(f, "    {} needed by", file.path)?;
                    for (i, rev) in file.merged.iter().enumerate() {
                        let sep = if i == 0 { " " } else { ", " };
                        write!(f, "{sep}r{rev}")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
