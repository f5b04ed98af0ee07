use crate::svn::Rev;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ChangeId(pub(super) u32);

/// Metadata of one revision. Created once per revision by
/// [`History::create_change`](super::History::create_change) and never
/// modified afterwards.
#[derive(Debug)]
pub(crate) struct Change {
    pub(crate) revision: Rev,
    pub(crate) author: String,
    pub(crate) message: String,
    /// Identifies the original change this one represents, so a port on
    /// another branch can be recognized.
    pub(crate) key: Option<String>,
}

impl Change {
    pub(crate) fn first_message_line(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}
