use super::ticket::TicketMessage;
use crate::svn::{LogEntry, Rev};

pub(crate) const DEFAULT_COMMIT_MSG_TEMPLATE: &str = indoc::indoc! {"
    {%- if revert -%}
    Ticket #{{ ticket }}: Reverted [{{ svn_rev }}]:{{ svn_log }}
    {%- else -%}
    Ticket #{{ ticket }}: Ported to {{ target_branch }} from {{ source_branch }}: {% if api_change %}API change: {% endif %}[{{ svn_rev }}]:{{ svn_log }}
    {%- endif -%}
"};

#[derive(Debug)]
pub(crate) enum MessageError {
    NoTicket { rev: Rev },
    Template(String),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTicket { rev } => write!(f, "r{rev}: commit message has no ticket id"),
            Self::Template(e) => write!(f, "failed to render commit message: {e}"),
        }
    }
}

/// Renders the message of the commit porting a revision.
pub(crate) struct MessageMaker<'a> {
    jinja_env: minijinja::Environment<'a>,
    svn_uuid: Option<uuid::Uuid>,
    source_branch: String,
    target_branch: String,
    revert: bool,
}

impl<'a> MessageMaker<'a> {
    pub(crate) fn new(
        commit_msg_template: &'a str,
        source_branch: &str,
        target_branch: &str,
        revert: bool,
    ) -> Result<Self, String> {
        let mut jinja_env = minijinja::Environment::empty();
        jinja_env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        jinja_env
            .add_template("commit_msg", commit_msg_template)
            .map_err(|e| format!("failed to parse commit message template: {e}"))?;

        Ok(Self {
            jinja_env,
            svn_uuid: None,
            source_branch: branch_name(source_branch).into(),
            target_branch: branch_name(target_branch).into(),
            revert,
        })
    }

    pub(crate) fn set_svn_uuid(&mut self, uuid: Option<uuid::Uuid>) {
        self.svn_uuid = uuid;
    }

    pub(crate) fn make_message(
        &self,
        entry: &LogEntry,
        ticket: &TicketMessage,
    ) -> Result<String, MessageError> {
        let jinja_ctx = JinjaCtx {
            ticket: ticket.ticket.clone(),
            svn_uuid: self
                .svn_uuid
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            svn_rev: entry.revision,
            svn_author: entry.author.clone(),
            svn_log: ticket.body.clone(),
            source_branch: self.source_branch.clone(),
            target_branch: self.target_branch.clone(),
            api_change: ticket.api_change,
            revert: self.revert,
        };

        let msg_template = self
            .jinja_env
            .get_template("commit_msg")
            .map_err(|e| MessageError::Template(e.to_string()))?;
        let message = msg_template
            .render(&jinja_ctx)
            .map_err(|e| MessageError::Template(e.to_string()))?
            .replace("\r\n", "\n");
        Ok(message)
    }
}

/// Last component of a branch directory.
fn branch_name(branch: &str) -> &str {
    let branch = branch.trim_end_matches('/');
    branch.rsplit('/').next().unwrap_or(branch)
}

#[derive(serde::Serialize)]
struct JinjaCtx {
    ticket: String,
    svn_uuid: String,
    svn_rev: Rev,
    svn_author: String,
    svn_log: String,
    source_branch: String,
    target_branch: String,
    api_change: bool,
    revert: bool,
}
