#[cfg(test)]
use std::borrow::Cow;

use super::{History, HistoryError};
#[cfg(test)]
use crate::svn::log::is_same_or_child;
use crate::svn::{ChangeType, LogEntry, LogEntryPath, Rev};

/// Provides the dedup key stored with each change.
pub(crate) trait KeyExtractor {
    fn dedup_key(&self, entry: &LogEntry) -> Option<String>;
}

impl<F: Fn(&LogEntry) -> Option<String>> KeyExtractor for F {
    fn dedup_key(&self, entry: &LogEntry) -> Option<String> {
        self(entry)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Oldest revision first. Node life-spans and copies are tracked.
    Forward,
    /// Newest revision first. Changes of moved paths are attributed to the
    /// path they have now. Node life-spans are not tracked.
    #[cfg(test)]
    Backward,
}

/// Maps paths under `prefix` to `substitution`, or drops them when there is
/// no substitution.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq, Eq)]
struct Rewrite {
    prefix: String,
    substitution: Option<String>,
}

#[cfg(test)]
impl Rewrite {
    /// Longer prefixes sort first.
    fn order_key(&self) -> (std::cmp::Reverse<usize>, &str) {
        (std::cmp::Reverse(self.prefix.len()), &self.prefix)
    }
}

#[cfg(test)]
#[derive(Clone, Debug, Default)]
struct RewriteRules {
    rules: Vec<Rewrite>,
}

#[cfg(test)]
impl RewriteRules {
    /// Returns `None` when the history of `path` is cut off.
    fn apply<'a>(&self, path: &'a str) -> Option<Cow<'a, str>> {
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| is_same_or_child(path, &rule.prefix))
        else {
            return Some(Cow::Borrowed(path));
        };
        let substitution = rule.substitution.as_deref()?;
        Some(Cow::Owned(format!(
            "{substitution}{}",
            &path[rule.prefix.len()..]
        )))
    }

    fn add(&mut self, rule: Rewrite) -> Result<(), HistoryError> {
        match self
            .rules
            .binary_search_by(|probe| probe.order_key().cmp(&rule.order_key()))
        {
            Ok(index) => {
                let clash = &mut self.rules[index];
                if let Some(existing) = clash.substitution.as_deref() {
                    match rule.substitution.as_deref() {
                        // A rename recorded in the same revision outlives
                        // the deletion of its source.
                        None => return Ok(()),
                        Some(new) if new != existing => {
                            return Err(HistoryError::ConflictingRename {
                                from: rule.prefix.clone(),
                                to: new.into(),
                                other: existing.into(),
                            });
                        }
                        Some(_) => {}
                    }
                }
                *clash = rule;
            }
            Err(index) => self.rules.insert(index, rule),
        }
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), HistoryError> {
        self.add(Rewrite {
            prefix: path.into(),
            substitution: None,
        })
    }

    /// Forgets every rule below `path`, which is created anew.
    fn remove_below(&mut self, path: &str) {
        self.rules.retain(|rule| !is_same_or_child(&rule.prefix, path));
    }
}

/// Feeds a revision log into a [`History`].
pub(crate) struct HistoryBuilder<'a> {
    history: History,
    direction: Direction,
    keys: &'a dyn KeyExtractor,
    #[cfg(test)]
    rewrites: RewriteRules,
    last_rev: Option<Rev>,
}

impl<'a> HistoryBuilder<'a> {
    pub(crate) fn new(start_revision: Rev, direction: Direction, keys: &'a dyn KeyExtractor) -> Self {
        Self {
            history: History::new(start_revision),
            direction,
            keys,
            #[cfg(test)]
            rewrites: RewriteRules::default(),
            last_rev: None,
        }
    }

    pub(crate) fn finish(self) -> History {
        self.history
    }

    pub(crate) fn handle_log_entry(&mut self, entry: &LogEntry) -> Result<(), HistoryError> {
        if let Some(previous) = self.last_rev {
            let in_order = match self.direction {
                Direction::Forward => entry.revision > previous,
                #[cfg(test)]
                Direction::Backward => entry.revision < previous,
            };
            if !in_order {
                return Err(HistoryError::OutOfOrder {
                    previous,
                    rev: entry.revision,
                });
            }
        }
        self.last_rev = Some(entry.revision);

        let change = self.history.create_change(
            entry.revision,
            &entry.author,
            &entry.message,
            self.keys.dedup_key(entry),
        )?;

        match self.direction {
            Direction::Forward => {
                for path_entry in entry.changed_paths.values() {
                    self.record_forward(path_entry, change)?;
                }
            }
            #[cfg(test)]
            Direction::Backward => {
                let mut new_rewrites = self.rewrites.clone();
                for path_entry in entry.changed_paths.values() {
                    self.record_backward(entry, path_entry, change, &mut new_rewrites)?;
                }
                self.rewrites = new_rewrites;
            }
        }

        Ok(())
    }

    fn record_forward(
        &mut self,
        path_entry: &LogEntryPath,
        change: super::ChangeId,
    ) -> Result<(), HistoryError> {
        let path = path_entry.path.as_str();
        let kind = path_entry.kind;
        match path_entry.change_type {
            ChangeType::Added | ChangeType::Replaced => {
                let copy_from = path_entry
                    .copy_from
                    .as_ref()
                    .map(|copy| (copy.path.as_str(), copy.rev));
                self.history.added_node(kind, path, change, copy_from)?;
            }
            ChangeType::Modified => {
                self.history.modified_node(kind, path, change)?;
            }
            ChangeType::Deleted => {
                self.history.deleted_node(kind, path, change)?;
            }
        }
        Ok(())
    }

    /// Rules from younger revisions are applied to this one, while the
    /// rules this revision adds only take effect for older revisions.
    #[cfg(test)]
    fn record_backward(
        &mut self,
        entry: &LogEntry,
        path_entry: &LogEntryPath,
        change: super::ChangeId,
        new_rewrites: &mut RewriteRules,
    ) -> Result<(), HistoryError> {
        let orig_path = path_entry.path.as_str();
        match path_entry.change_type {
            ChangeType::Replaced => new_rewrites.delete(orig_path)?,
            ChangeType::Added => new_rewrites.remove_below(orig_path),
            ChangeType::Modified | ChangeType::Deleted => {}
        }

        let Some(path) = self.rewrites.apply(orig_path) else {
            return Ok(());
        };

        if path_entry.change_type == ChangeType::Deleted {
            new_rewrites.delete(orig_path)?;
            return Ok(());
        }

        if let Some(copy_path) = move_source(entry, path_entry) {
            new_rewrites.add(Rewrite {
                prefix: copy_path.into(),
                substitution: Some(path.clone().into_owned()),
            })?;
        }

        self.history.touch_node(path_entry.kind, &path, change);
        Ok(())
    }
}

/// Source of `path_entry` when it was moved there in the same revision.
#[cfg(test)]
fn move_source<'e>(entry: &'e LogEntry, path_entry: &'e LogEntryPath) -> Option<&'e str> {
    let copy = path_entry.copy_from.as_ref()?;
    let source_entry = entry.changed_paths.get(&copy.path)?;
    (source_entry.change_type == ChangeType::Deleted).then_some(copy.path.as_str())
}

#[cfg(test)]
mod tests {
    use super::{Rewrite, RewriteRules};
    use crate::history::HistoryError;

    fn rule(prefix: &str, substitution: Option<&str>) -> Rewrite {
        Rewrite {
            prefix: prefix.into(),
            substitution: substitution.map(Into::into),
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut rules = RewriteRules::default();
        rules.add(rule("/a", Some("/x"))).unwrap();
        rules.add(rule("/a/b", Some("/y"))).unwrap();
        rules.delete("/a/c").unwrap();

        assert_eq!(rules.apply("/a/b/f").as_deref(), Some("/y/f"));
        assert_eq!(rules.apply("/a/d/f").as_deref(), Some("/x/d/f"));
        assert_eq!(rules.apply("/a").as_deref(), Some("/x"));
        assert_eq!(rules.apply("/a/c/f"), None);
        assert_eq!(rules.apply("/ab/f").as_deref(), Some("/ab/f"));
        assert_eq!(rules.apply("/other").as_deref(), Some("/other"));
    }

    #[test]
    fn test_equal_length_order() {
        let mut rules = RewriteRules::default();
        rules.add(rule("/b2", Some("/b1"))).unwrap();
        rules.add(rule("/b1", Some("/b2"))).unwrap();
        rules.add(rule("/tmp", None)).unwrap();
        let prefixes: Vec<_> = rules.rules.iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, ["/tmp", "/b1", "/b2"]);
    }

    #[test]
    fn test_rename_survives_delete() {
        let mut rules = RewriteRules::default();
        rules.delete("/old").unwrap();
        rules.add(rule("/old", Some("/new"))).unwrap();
        assert_eq!(rules.apply("/old/f").as_deref(), Some("/new/f"));

        rules.delete("/old").unwrap();
        assert_eq!(rules.apply("/old/f").as_deref(), Some("/new/f"));
    }

    #[test]
    fn test_conflicting_renames() {
        let mut rules = RewriteRules::default();
        rules.add(rule("/old", Some("/new"))).unwrap();
        rules.add(rule("/old", Some("/new"))).unwrap();
        assert!(matches!(
            rules.add(rule("/old", Some("/other"))),
            Err(HistoryError::ConflictingRename { .. })
        ));
    }

    #[test]
    fn test_remove_below() {
        let mut rules = RewriteRules::default();
        rules.add(rule("/a/b", Some("/x"))).unwrap();
        rules.add(rule("/a", Some("/y"))).unwrap();
        rules.add(rule("/ab", Some("/z"))).unwrap();
        rules.remove_below("/a/b");
        let prefixes: Vec<_> = rules.rules.iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, ["/ab", "/a"]);
    }
}
