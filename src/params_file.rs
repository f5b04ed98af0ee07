#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PortParams {
    #[serde(rename = "source-branch")]
    pub(crate) source_branch: String,
    #[serde(rename = "target-branch")]
    pub(crate) target_branch: String,
    #[serde(default = "default_branches")]
    pub(crate) branches: Vec<String>,
    #[serde(default = "Vec::new")]
    pub(crate) modules: Vec<String>,
    #[serde(rename = "detect-common-modules", default = "false_")]
    pub(crate) detect_common_modules: bool,
    #[serde(rename = "repository-url", default = "default_repository_url")]
    pub(crate) repository_url: String,
    #[serde(rename = "start-revision")]
    pub(crate) start_revision: Option<u64>,
    #[serde(rename = "end-revision")]
    pub(crate) end_revision: Option<u64>,
    #[serde(rename = "ignore-revisions", default = "Vec::new")]
    pub(crate) ignore_revisions: Vec<u64>,
    #[serde(rename = "additional-revisions", default = "Vec::new")]
    pub(crate) additional_revisions: Vec<AdditionalRev>,
    #[serde(default = "false_")]
    pub(crate) revert: bool,
    #[serde(rename = "semantic-moves", default = "true_")]
    pub(crate) semantic_moves: bool,
    #[serde(rename = "skip-dependencies", default = "false_")]
    pub(crate) skip_dependencies: bool,
    #[serde(rename = "reorder-commits", default = "false_")]
    pub(crate) reorder_commits: bool,
    #[serde(rename = "auto-commit", default = "false_")]
    pub(crate) auto_commit: bool,
    #[serde(rename = "no-commit", default = "false_")]
    pub(crate) no_commit: bool,
    #[serde(rename = "include-paths", default = "Vec::new")]
    pub(crate) include_paths: Vec<String>,
    #[serde(rename = "exclude-paths", default = "Vec::new")]
    pub(crate) exclude_paths: Vec<String>,
    #[serde(rename = "resource-mapping", default = "Vec::new")]
    pub(crate) resource_mapping: Vec<MappingRule>,
    #[serde(rename = "ticket-pattern")]
    pub(crate) ticket_pattern: Option<String>,
    #[serde(rename = "merged-revision-pattern")]
    pub(crate) merged_revision_pattern: Option<String>,
    #[serde(rename = "follow-up-pattern")]
    pub(crate) follow_up_pattern: Option<String>,
    #[serde(rename = "commit-msg-template")]
    pub(crate) commit_msg_template: Option<String>,
    #[serde(rename = "dependency-report", default)]
    pub(crate) dependency_report: DependencyReportParams,
}

/// A revision ported in addition to the selected range.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AdditionalRev {
    pub(crate) rev: u64,
    /// Only these branch-relative resources are merged when not empty.
    #[serde(rename = "include-paths", default = "Vec::new")]
    pub(crate) include_paths: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MappingRule {
    pub(crate) pattern: String,
    pub(crate) replacement: String,
}

#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DependencyReportParams {
    #[serde(rename = "exclude-paths", default = "Vec::new")]
    pub(crate) exclude_paths: Vec<String>,
    #[serde(rename = "exclude-tickets", default = "Vec::new")]
    pub(crate) exclude_tickets: Vec<String>,
}

#[inline(always)]
fn false_() -> bool {
    false
}

#[inline(always)]
fn true_() -> bool {
    true
}

fn default_branches() -> Vec<String> {
    vec!["trunk".into(), "branches/*".into()]
}

fn default_repository_url() -> String {
    "^".into()
}

#[cfg(test)]
mod tests {
    use super::PortParams;

    #[test]
    fn test_defaults() {
        let params: PortParams = toml::from_str(
            r#"
            source-branch = "trunk"
            target-branch = "branches/1.x"
            "#,
        )
        .unwrap();
        assert_eq!(params.branches, ["trunk", "branches/*"]);
        assert_eq!(params.repository_url, "^");
        assert!(params.semantic_moves);
        assert!(!params.revert);
        assert!(params.modules.is_empty());
        assert!(params.dependency_report.exclude_tickets.is_empty());
    }

    #[test]
    fn test_full() {
        let params: PortParams = toml::from_str(
            r#"
            source-branch = "/trunk"
            target-branch = "/branches/1.x"
            branches = ["trunk", "branches/*", "tags/*"]
            modules = ["core", "web"]
            start-revision = 100
            end-revision = 200
            ignore-revisions = [150]
            semantic-moves = false
            exclude-paths = ["**/*.bak"]

            [[additional-revisions]]
            rev = 90
            include-paths = ["core/a.txt"]

            [[additional-revisions]]
            rev = 95

            [[resource-mapping]]
            pattern = "core/old/"
            replacement = "core/new/"

            [dependency-report]
            exclude-tickets = ["7"]
            "#,
        )
        .unwrap();
        assert_eq!(params.start_revision, Some(100));
        assert_eq!(params.ignore_revisions, [150]);
        assert!(!params.semantic_moves);
        assert_eq!(params.additional_revisions.len(), 2);
        assert!(params.additional_revisions[1].include_paths.is_empty());
        assert_eq!(params.resource_mapping[0].replacement, "core/new/");
        assert_eq!(params.dependency_report.exclude_tickets, ["7"]);
    }

    #[test]
    fn test_unknown_key() {
        let result = toml::from_str::<PortParams>(
            r#"
            source-branch = "trunk"
            target-branch = "trunk"
            head = "trunk"
            "#,
        );
        assert!(result.is_err());
    }
}
