pub(crate) mod dump;
pub(crate) mod log;
pub(crate) mod source;

pub(crate) use log::{ChangeType, LogEntry, LogEntryPath, LogIndex, NodeKind, Rev};
