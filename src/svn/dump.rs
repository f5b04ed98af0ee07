use std::collections::HashMap;
use std::io::Read as _;

use super::log::{ChangeType, CopyFrom, LogEntry, LogEntryPath, NodeKind, Rev};

// SVN dump file format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/dump-load-format.txt

#[derive(Debug)]
pub(crate) enum ReadError {
    Io(std::io::Error),
    BrokenHeader,
    InvalidVersion { version: Vec<u8> },
    MissingHeaderEntry { key: &'static str },
    InvalidHeaderEntry { key: &'static str, value: Vec<u8> },
    UnknownRecordType,
    MismatchedContentLen,
    BrokenProperties,
    NodeOutsideRevision,
    InvalidDate { rev: Rev, value: Vec<u8> },
}

impl From<std::io::Error> for ReadError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => write!(f, "failed to read source: {e}"),
            Self::BrokenHeader => write!(f, "broken header"),
            Self::InvalidVersion { ref version } => {
                write!(f, "unsupported dump version: \"{}\"", version.escape_ascii())
            }
            Self::MissingHeaderEntry { key } => write!(f, "missing header entry: \"{key}\""),
            Self::InvalidHeaderEntry { key, ref value } => write!(
                f,
                "invalid value for header entry \"{key}\": \"{}\"",
                value.escape_ascii(),
            ),
            Self::UnknownRecordType => write!(f, "unknown record type"),
            Self::MismatchedContentLen => write!(f, "mismatched content length"),
            Self::BrokenProperties => write!(f, "broken properties"),
            Self::NodeOutsideRevision => write!(f, "node record before first revision record"),
            Self::InvalidDate { rev, ref value } => write!(
                f,
                "invalid date \"{}\" in revision {rev}",
                value.escape_ascii(),
            ),
        }
    }
}

/// Reads a dump stream as a revision log, skipping file contents.
pub(crate) struct LogReader<'a> {
    source: &'a mut dyn std::io::BufRead,
    uuid: Option<uuid::Uuid>,
    pending: Option<LogEntry>,
}

impl<'a> LogReader<'a> {
    pub(crate) fn new(source: &'a mut dyn std::io::BufRead) -> Result<Self, ReadError> {
        let header = read_header(source)?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        let version_key = "SVN-fs-dump-format-version";
        let raw_version = header
            .get(version_key.as_bytes())
            .ok_or(ReadError::MissingHeaderEntry { key: version_key })?;
        if !matches!(raw_version.as_slice(), b"2" | b"3") {
            return Err(ReadError::InvalidVersion {
                version: raw_version.clone(),
            });
        }

        Ok(Self {
            source,
            uuid: None,
            pending: None,
        })
    }

    pub(crate) fn uuid(&self) -> Option<&uuid::Uuid> {
        self.uuid.as_ref()
    }

    /// Returns the next complete revision, once all its node records have
    /// been read.
    pub(crate) fn next_entry(&mut self) -> Result<Option<LogEntry>, ReadError> {
        loop {
            let Some(header) = read_header(self.source)? else {
                return Ok(self.pending.take());
            };

            let is_uuid = header.contains_key(b"UUID".as_slice());
            let is_rev = header.contains_key(b"Revision-number".as_slice());
            let is_node = header.contains_key(b"Node-path".as_slice());
            match (is_uuid, is_rev, is_node) {
                (true, false, false) => {
                    let raw_uuid = &header[b"UUID".as_slice()];
                    let uuid = uuid::Uuid::try_parse_ascii(raw_uuid).map_err(|_| {
                        ReadError::InvalidHeaderEntry {
                            key: "UUID",
                            value: raw_uuid.clone(),
                        }
                    })?;
                    self.uuid = Some(uuid);
                    self.skip_content(&header, 0)?;
                }
                (false, true, false) => {
                    let entry = self.read_revision(&header)?;
                    if let Some(done) = self.pending.replace(entry) {
                        return Ok(Some(done));
                    }
                }
                (false, false, true) => {
                    let path = self.read_node(&header)?;
                    let entry = self.pending.as_mut().ok_or(ReadError::NodeOutsideRevision)?;
                    add_changed_path(entry, path);
                }
                _ => return Err(ReadError::UnknownRecordType),
            }
        }
    }

    fn read_revision(&mut self, header: &RecordHeader) -> Result<LogEntry, ReadError> {
        let rev = header_u64(header, "Revision-number")?
            .ok_or(ReadError::MissingHeaderEntry {
                key: "Revision-number",
            })?;
        let prop_len = header_u64(header, "Prop-content-length")?;

        let mut entry = LogEntry::new(rev);
        if let Some(prop_len) = prop_len {
            let mut prop_stream = (&mut *self.source).take(prop_len);
            let mut props = read_properties(&mut prop_stream).map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                    ReadError::BrokenProperties
                }
                _ => ReadError::Io(e),
            })?;
            if prop_stream.limit() != 0 {
                return Err(ReadError::BrokenProperties);
            }

            if let Some(author) = props.remove(b"svn:author".as_slice()) {
                entry.author = String::from_utf8_lossy(&author).into_owned();
            }
            if let Some(message) = props.remove(b"svn:log".as_slice()) {
                entry.message = String::from_utf8_lossy(&message).replace("\r\n", "\n");
            }
            if let Some(raw_date) = props.remove(b"svn:date".as_slice()) {
                let date = std::str::from_utf8(&raw_date)
                    .ok()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .ok_or_else(|| ReadError::InvalidDate {
                        rev,
                        value: raw_date.clone(),
                    })?;
                entry.date = Some(date.with_timezone(&chrono::Utc));
            }
        }
        self.skip_content(header, prop_len.unwrap_or(0))?;

        Ok(entry)
    }

    fn read_node(&mut self, header: &RecordHeader) -> Result<LogEntryPath, ReadError> {
        let raw_path = &header[b"Node-path".as_slice()];
        let path = format!("/{}", String::from_utf8_lossy(raw_path).trim_matches('/'));

        let kind = match header.get(b"Node-kind".as_slice()).map(Vec::as_slice) {
            None => NodeKind::Unknown,
            Some(b"file") => NodeKind::File,
            Some(b"dir") => NodeKind::Dir,
            Some(raw) => {
                return Err(ReadError::InvalidHeaderEntry {
                    key: "Node-kind",
                    value: raw.to_vec(),
                });
            }
        };

        let change_type = match header.get(b"Node-action".as_slice()).map(Vec::as_slice) {
            Some(b"change") => ChangeType::Modified,
            Some(b"add") => ChangeType::Added,
            Some(b"delete") => ChangeType::Deleted,
            Some(b"replace") => ChangeType::Replaced,
            Some(raw) => {
                return Err(ReadError::InvalidHeaderEntry {
                    key: "Node-action",
                    value: raw.to_vec(),
                });
            }
            None => return Err(ReadError::MissingHeaderEntry { key: "Node-action" }),
        };

        let copy_rev = header_u64(header, "Node-copyfrom-rev")?;
        let copy_path = header.get(b"Node-copyfrom-path".as_slice());
        let copy_from = match (copy_rev, copy_path) {
            (None, None) => None,
            (Some(rev), Some(raw_path)) => Some(CopyFrom {
                path: format!("/{}", String::from_utf8_lossy(raw_path).trim_matches('/')),
                rev,
            }),
            (Some(_), None) => {
                return Err(ReadError::MissingHeaderEntry {
                    key: "Node-copyfrom-path",
                });
            }
            (None, Some(_)) => {
                return Err(ReadError::MissingHeaderEntry {
                    key: "Node-copyfrom-rev",
                });
            }
        };

        let prop_len = header_u64(header, "Prop-content-length")?;
        let text_len = header_u64(header, "Text-content-length")?;
        let payload_len = prop_len
            .unwrap_or(0)
            .checked_add(text_len.unwrap_or(0))
            .ok_or(ReadError::MismatchedContentLen)?;
        // Content-length may be omitted by old dumps
        let content_len = match header_u64(header, "Content-length")? {
            Some(len) if (prop_len.is_some() || text_len.is_some()) && len != payload_len => {
                return Err(ReadError::MismatchedContentLen);
            }
            Some(len) => len,
            None => payload_len,
        };
        self.skip_bytes(content_len)?;

        Ok(LogEntryPath {
            path,
            change_type,
            kind,
            copy_from,
        })
    }

    /// Skips the record payload declared by `Content-length`, minus the
    /// bytes already consumed.
    fn skip_content(&mut self, header: &RecordHeader, consumed: u64) -> Result<(), ReadError> {
        let content_len = header_u64(header, "Content-length")?.unwrap_or(consumed);
        let remaining = content_len
            .checked_sub(consumed)
            .ok_or(ReadError::MismatchedContentLen)?;
        self.skip_bytes(remaining)
    }

    fn skip_bytes(&mut self, len: u64) -> Result<(), ReadError> {
        let skipped = std::io::copy(&mut (&mut *self.source).take(len), &mut std::io::sink())?;
        if skipped != len {
            return Err(ReadError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(())
    }
}

/// Dumps list a replacement either as a single `replace` record or as a
/// `delete` record followed by an `add` one.
fn add_changed_path(entry: &mut LogEntry, path: LogEntryPath) {
    match entry.changed_paths.entry(path.path.clone()) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(path);
        }
        std::collections::btree_map::Entry::Occupied(slot) => {
            let existing = slot.into_mut();
            match (existing.change_type, path.change_type) {
                (ChangeType::Deleted, ChangeType::Added | ChangeType::Replaced) => {
                    *existing = LogEntryPath {
                        change_type: ChangeType::Replaced,
                        ..path
                    };
                }
                (_, ChangeType::Modified) => {
                    if existing.kind == NodeKind::Unknown {
                        existing.kind = path.kind;
                    }
                }
                _ => *existing = path,
            }
        }
    }
}

type RecordHeader = HashMap<Vec<u8>, Vec<u8>>;

fn header_u64(header: &RecordHeader, key: &'static str) -> Result<Option<u64>, ReadError> {
    header
        .get(key.as_bytes())
        .map(|raw| {
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ReadError::InvalidHeaderEntry {
                    key,
                    value: raw.clone(),
                })
        })
        .transpose()
}

fn read_header(r: &mut dyn std::io::BufRead) -> Result<Option<RecordHeader>, ReadError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if r.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line != b"\n" {
            break;
        }
    }

    let mut header = HashMap::new();
    while line != b"\n" {
        let content = line.strip_suffix(b"\n").ok_or(ReadError::BrokenHeader)?;
        let sep = content
            .windows(2)
            .position(|w| w == b": ")
            .ok_or(ReadError::BrokenHeader)?;
        header.insert(content[..sep].to_vec(), content[(sep + 2)..].to_vec());

        line.clear();
        r.read_until(b'\n', &mut line)?;
    }

    Ok(Some(header))
}

fn read_properties(r: &mut dyn std::io::BufRead) -> Result<HashMap<Vec<u8>, Vec<u8>>, std::io::Error> {
    fn invalid() -> std::io::Error {
        std::io::Error::from(std::io::ErrorKind::InvalidData)
    }

    fn read_line(r: &mut dyn std::io::BufRead, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.clear();
        r.read_until(b'\n', buf)?;
        if buf.pop() != Some(b'\n') {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    fn read_counted(r: &mut dyn std::io::BufRead, len: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let len = std::str::from_utf8(len)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(invalid)?;
        let mut data = vec![0; len + 1];
        r.read_exact(&mut data)?;
        if data.pop() != Some(b'\n') {
            return Err(invalid());
        }
        Ok(data)
    }

    let mut props = HashMap::new();
    let mut line = Vec::new();
    loop {
        read_line(r, &mut line)?;
        if line == b"PROPS-END" {
            return Ok(props);
        }

        if let Some(key_len) = line.strip_prefix(b"K ") {
            let key = read_counted(r, key_len)?;
            read_line(r, &mut line)?;
            let value_len = line.strip_prefix(b"V ").ok_or_else(invalid)?;
            let value = read_counted(r, value_len)?;
            props.insert(key, value);
        } else if let Some(key_len) = line.strip_prefix(b"D ") {
            // Deletions only matter for property deltas, which revisions never use
            read_counted(r, key_len)?;
        } else {
            return Err(invalid());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LogReader, ReadError};
    use crate::svn::log::{ChangeType, NodeKind};

    fn props(pairs: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for (k, v) in pairs {
            out.push_str(&format!("K {}\n{k}\nV {}\n{v}\n", k.len(), v.len()));
        }
        out.push_str("PROPS-END\n");
        out
    }

    fn revision(rev: u64, pairs: &[(&str, &str)]) -> String {
        let props = props(pairs);
        format!(
            "Revision-number: {rev}\nProp-content-length: {0}\nContent-length: {0}\n\n{props}\n",
            props.len(),
        )
    }

    fn node(path: &str, kind: Option<&str>, action: &str, copy: Option<(&str, u64)>, text: &str) -> String {
        let mut out = format!("Node-path: {path}\n");
        if let Some(kind) = kind {
            out.push_str(&format!("Node-kind: {kind}\n"));
        }
        out.push_str(&format!("Node-action: {action}\n"));
        if let Some((copy_path, copy_rev)) = copy {
            out.push_str(&format!(
                "Node-copyfrom-rev: {copy_rev}\nNode-copyfrom-path: {copy_path}\n"
            ));
        }
        if !text.is_empty() {
            out.push_str(&format!(
                "Text-content-length: {0}\nContent-length: {0}\n\n{text}\n",
                text.len(),
            ));
        } else {
            out.push('\n');
        }
        out.push('\n');
        out
    }

    fn sample_dump() -> String {
        let mut dump = String::from("SVN-fs-dump-format-version: 2\n\n");
        dump.push_str("UUID: 6a2a4a8e-0c1c-4b5b-9c39-0c5e8a3d2f10\n\n");
        dump.push_str(&revision(0, &[("svn:date", "2020-01-01T00:00:00.000000Z")]));
        dump.push_str(&revision(
            1,
            &[
                ("svn:author", "alice"),
                ("svn:date", "2020-01-02T10:00:00.000000Z"),
                ("svn:log", "Ticket #1: initial import"),
            ],
        ));
        dump.push_str(&node("trunk", Some("dir"), "add", None, ""));
        dump.push_str(&node("trunk/file.txt", Some("file"), "add", None, "hello\n"));
        dump.push_str(&revision(2, &[("svn:author", "bob"), ("svn:log", "copy")]));
        dump.push_str(&node("branches/b1", Some("dir"), "add", Some(("trunk", 1)), ""));
        dump.push_str(&node("trunk/file.txt", None, "delete", None, ""));
        dump.push_str(&node("trunk/file.txt", Some("file"), "add", Some(("trunk/file.txt", 1)), ""));
        dump
    }

    #[test]
    fn test_read_log_entries() {
        let dump = sample_dump();
        let mut stream = dump.as_bytes();
        let mut reader = LogReader::new(&mut stream).unwrap();

        let rev0 = reader.next_entry().unwrap().unwrap();
        assert_eq!(rev0.revision, 0);
        assert!(rev0.changed_paths.is_empty());
        assert!(reader.uuid().is_some());

        let rev1 = reader.next_entry().unwrap().unwrap();
        assert_eq!(rev1.revision, 1);
        assert_eq!(rev1.author, "alice");
        assert_eq!(rev1.message, "Ticket #1: initial import");
        assert_eq!(
            rev1.date.unwrap().to_rfc3339(),
            "2020-01-02T10:00:00+00:00"
        );
        let paths: Vec<_> = rev1.changed_paths.keys().cloned().collect();
        assert_eq!(paths, ["/trunk", "/trunk/file.txt"]);
        assert_eq!(rev1.changed_paths["/trunk"].kind, NodeKind::Dir);
        assert_eq!(rev1.changed_paths["/trunk"].change_type, ChangeType::Added);

        let rev2 = reader.next_entry().unwrap().unwrap();
        assert_eq!(rev2.revision, 2);
        assert_eq!(rev2.author, "bob");
        assert!(rev2.date.is_none());
        let branch = &rev2.changed_paths["/branches/b1"];
        assert_eq!(branch.change_type, ChangeType::Added);
        let copy = branch.copy_from.as_ref().unwrap();
        assert_eq!(copy.path, "/trunk");
        assert_eq!(copy.rev, 1);

        let replaced = &rev2.changed_paths["/trunk/file.txt"];
        assert_eq!(replaced.change_type, ChangeType::Replaced);
        assert_eq!(replaced.kind, NodeKind::File);
        assert!(replaced.copy_from.is_some());

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_reject_unknown_version() {
        let mut stream = b"SVN-fs-dump-format-version: 9\n\n".as_slice();
        assert!(matches!(
            LogReader::new(&mut stream),
            Err(ReadError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_reject_node_before_revision() {
        let mut dump = String::from("SVN-fs-dump-format-version: 2\n\n");
        dump.push_str(&node("trunk", Some("dir"), "add", None, ""));
        let mut stream = dump.as_bytes();
        let mut reader = LogReader::new(&mut stream).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(ReadError::NodeOutsideRevision)
        ));
    }

    #[test]
    fn test_reject_bad_date() {
        let mut dump = String::from("SVN-fs-dump-format-version: 3\n\n");
        dump.push_str(&revision(1, &[("svn:date", "yesterday")]));
        let mut stream = dump.as_bytes();
        let mut reader = LogReader::new(&mut stream).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(ReadError::InvalidDate { rev: 1, .. })
        ));
    }
}
