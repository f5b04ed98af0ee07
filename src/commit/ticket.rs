use regex_automata::meta::Regex;
use regex_automata::{Anchored, Input};

use crate::history::KeyExtractor;
use crate::svn::{LogEntry, Rev};

pub(crate) const DEFAULT_TICKET_PATTERN: &str = r"^Ticket #(\d+):";
pub(crate) const DEFAULT_API_CHANGE_PATTERN: &str = r"API change:";
pub(crate) const DEFAULT_MERGED_REVISION_PATTERN: &str =
    r"(?:Ported to [^:\n]+: (?:API change: )?|Reverted )\[(\d+)\]:";
pub(crate) const DEFAULT_FOLLOW_UP_PATTERN: &str = r"[Ff]ollow-up (?:for|to) \[(\d+)\]";

/// The parts of a commit message that follow the ticket conventions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TicketMessage {
    pub(crate) ticket: String,
    pub(crate) api_change: bool,
    /// Revision of an earlier port this message already carries.
    pub(crate) merged_revision: Option<Rev>,
    /// Revision this commit completes.
    pub(crate) follow_up: Option<Rev>,
    /// Everything after the ticket prefix and the API change marker.
    pub(crate) body: String,
}

pub(crate) struct TicketParser {
    ticket: Regex,
    api_change: Regex,
    merged_revision: Regex,
    follow_up: Regex,
}

impl Default for TicketParser {
    fn default() -> Self {
        Self::new(
            DEFAULT_TICKET_PATTERN,
            DEFAULT_MERGED_REVISION_PATTERN,
            DEFAULT_FOLLOW_UP_PATTERN,
        )
        .expect("invalid default ticket patterns")
    }
}

impl TicketParser {
    /// Patterns must have a capture group holding the ticket id or the
    /// revision number.
    pub(crate) fn new<'a>(
        ticket: &'a str,
        merged_revision: &'a str,
        follow_up: &'a str,
    ) -> Result<Self, (&'a str, Box<regex_automata::meta::BuildError>)> {
        let build = |pattern: &'a str| Regex::new(pattern).map_err(|e| (pattern, Box::new(e)));
        Ok(Self {
            ticket: build(ticket)?,
            api_change: build(DEFAULT_API_CHANGE_PATTERN)?,
            merged_revision: build(merged_revision)?,
            follow_up: build(follow_up)?,
        })
    }

    /// Returns `None` when the message has no ticket id.
    pub(crate) fn parse(&self, message: &str) -> Option<TicketMessage> {
        let mut caps = self.ticket.create_captures();
        self.ticket.captures(message, &mut caps);
        let matched = caps.get_match()?;
        let ticket = caps
            .get_group(1)
            .map_or_else(|| &message[matched.range()], |group| &message[group.range()]);

        let rest = &message[matched.end()..];
        let trimmed = rest.trim_start();
        let marker = self
            .api_change
            .search(&Input::new(trimmed).anchored(Anchored::Yes));
        let body = match marker {
            Some(marker) => &trimmed[marker.end()..],
            None => rest,
        };

        Some(TicketMessage {
            ticket: ticket.to_string(),
            api_change: marker.is_some() || self.api_change.is_match(message),
            merged_revision: capture_rev(&self.merged_revision, message),
            follow_up: capture_rev(&self.follow_up, message),
            body: body.to_string(),
        })
    }

    pub(crate) fn ticket(&self, message: &str) -> Option<String> {
        self.parse(message).map(|parsed| parsed.ticket)
    }
}

fn capture_rev(regex: &Regex, message: &str) -> Option<Rev> {
    let mut caps = regex.create_captures();
    regex.captures(message, &mut caps);
    let group = caps.get_group(1)?;
    message[group.range()].parse().ok()
}

impl KeyExtractor for TicketParser {
    fn dedup_key(&self, entry: &LogEntry) -> Option<String> {
        let merged = capture_rev(&self.merged_revision, &entry.message);
        Some(merged.unwrap_or(entry.revision).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::TicketParser;
    use crate::history::KeyExtractor as _;
    use crate::svn::LogEntry;

    #[test]
    fn test_parse() {
        let parser = TicketParser::default();

        let plain = parser.parse("Ticket #42: Fixed the parser.").unwrap();
        assert_eq!(plain.ticket, "42");
        assert!(!plain.api_change);
        assert_eq!(plain.merged_revision, None);
        assert_eq!(plain.follow_up, None);
        assert_eq!(plain.body, " Fixed the parser.");

        let api = parser.parse("Ticket #7: API change: Renamed Foo.").unwrap();
        assert!(api.api_change);
        assert_eq!(api.body, " Renamed Foo.");

        let ported = parser
            .parse("Ticket #7: Ported to 1.x from trunk: [120]: Follow-up for [118]: typo")
            .unwrap();
        assert_eq!(ported.merged_revision, Some(120));
        assert_eq!(ported.follow_up, Some(118));

        assert_eq!(parser.parse("Merged some stuff"), None);
        // Only at the start of the message
        assert_eq!(parser.ticket("See Ticket #1: nothing"), None);
    }

    #[test]
    fn test_custom_patterns() {
        let parser = TicketParser::new(r"^([A-Z]+-\d+) ", r"\(r(\d+)\)", r"fixup r(\d+)").unwrap();
        let parsed = parser.parse("CORE-12 fixup r77 (r80)").unwrap();
        assert_eq!(parsed.ticket, "CORE-12");
        assert_eq!(parsed.merged_revision, Some(80));
        assert_eq!(parsed.follow_up, Some(77));

        let error = TicketParser::new("(", r"\[(\d+)\]", "x").err();
        assert_eq!(error.map(|(pattern, _)| pattern), Some("("));
    }

    #[test]
    fn test_dedup_key() {
        let parser = TicketParser::default();

        let mut entry = LogEntry::new(300);
        entry.message = "Ticket #5: Ported to b from trunk: [250]: Fix".into();
        assert_eq!(parser.dedup_key(&entry).as_deref(), Some("250"));

        entry.message = "Ticket #5: Fix".into();
        assert_eq!(parser.dedup_key(&entry).as_deref(), Some("300"));

        // Messages without ticket still get a key
        entry.message = "cleanup".into();
        assert_eq!(parser.dedup_key(&entry).as_deref(), Some("300"));
    }
}
