use std::collections::BTreeMap;

/// A repository history, the parameters to port with and what the dry run
/// is expected to print.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Test {
    #[serde(rename = "svn-dump-source", default = "dump_source_uncompressed")]
    pub(crate) svn_dump_source: SvnDumpSource,
    #[serde(rename = "svn-uuid")]
    pub(crate) svn_uuid: Option<String>,
    #[serde(rename = "svn-revs")]
    pub(crate) svn_revs: Vec<SvnRev>,
    pub(crate) params: String,
    /// Extra command line arguments.
    #[serde(default = "Vec::new")]
    pub(crate) args: Vec<String>,
    /// Standard input of the run; `--yes` is passed when missing.
    pub(crate) stdin: Option<String>,
    #[serde(default = "false_")]
    pub(crate) failed: bool,
    /// Whole standard output.
    pub(crate) stdout: Option<String>,
    /// Lines that must appear, in this order, in standard output.
    #[serde(rename = "stdout-lines", default = "Vec::new")]
    pub(crate) stdout_lines: Vec<String>,
    pub(crate) logs: Option<String>,
}

#[derive(serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SvnDumpSource {
    #[serde(rename = "uncompressed")]
    Uncompressed,
    #[serde(rename = "compressed-gzip")]
    CompressedGzip,
    #[serde(rename = "compressed-bzip2")]
    CompressedBzip2,
    #[serde(rename = "compressed-xz")]
    CompressedXz,
    #[serde(rename = "compressed-zstd")]
    CompressedZstd,
    #[serde(rename = "compressed-lz4")]
    CompressedLz4,
}

#[inline(always)]
fn dump_source_uncompressed() -> SvnDumpSource {
    SvnDumpSource::Uncompressed
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SvnRev {
    pub(crate) no: Option<u32>,
    pub(crate) author: Option<String>,
    pub(crate) log: Option<String>,
    #[serde(default = "Vec::new")]
    pub(crate) nodes: Vec<SvnNode>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SvnNode {
    pub(crate) path: String,
    pub(crate) kind: Option<SvnNodeKind>,
    pub(crate) action: SvnNodeAction,
    #[serde(rename = "copy-from-path")]
    pub(crate) copy_from_path: Option<String>,
    #[serde(rename = "copy-from-rev")]
    pub(crate) copy_from_rev: Option<u32>,
    pub(crate) props: Option<BTreeMap<String, String>>,
    pub(crate) text: Option<String>,
}

#[derive(serde::Deserialize)]
pub(crate) enum SvnNodeKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Dir,
}

#[derive(serde::Deserialize)]
pub(crate) enum SvnNodeAction {
    #[serde(rename = "change")]
    Change,
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "replace")]
    Replace,
}

#[inline(always)]
fn false_() -> bool {
    false
}
