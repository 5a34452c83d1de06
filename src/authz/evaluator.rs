use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::Principal;
use crate::errors::AppError;
use crate::models::permission::{Capability, DocumentPermission, FolderPermission, ObjectKind, PermissionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Download,
    Comment,
    Share,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Download,
        Action::Comment,
        Action::Share,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Download => "download",
            Action::Comment => "comment",
            Action::Share => "share",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown action: {s}")))
    }
}

/// Everything a rule may look at. Grants must already exclude expired shares.
#[derive(Debug, Clone)]
pub struct Facts {
    pub principal: Option<Principal>,
    pub object_kind: ObjectKind,
    /// `None` when the object does not exist yet.
    pub owner_id: Option<Uuid>,
    pub grants: HashSet<PermissionKind>,
    pub capabilities: HashSet<Capability>,
}

impl Facts {
    pub fn new(principal: Option<Principal>, object_kind: ObjectKind) -> Self {
        Self {
            principal,
            object_kind,
            owner_id: None,
            grants: HashSet::new(),
            capabilities: HashSet::new(),
        }
    }

    pub fn owned_by(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_grants(mut self, grants: impl IntoIterator<Item = PermissionKind>) -> Self {
        self.grants.extend(grants);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.principal.as_ref().map(|p| p.user_id)
    }

    fn principal_is(&self, check: impl Fn(&Principal) -> bool) -> bool {
        self.principal.as_ref().is_some_and(check)
    }

    fn holds(&self, kind: impl Into<PermissionKind>) -> bool {
        self.grants.contains(&kind.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
}

/// One row of a decision table: when `when` matches, `outcome` is final.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub when: fn(&Facts) -> bool,
    pub outcome: Outcome,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Name of the rule that matched.
    pub rule: &'static str,
}

impl Decision {
    pub const DEFAULT_DENY: Decision = Decision {
        allowed: false,
        rule: "default-deny",
    };
}

const fn allow(name: &'static str, when: fn(&Facts) -> bool) -> Rule {
    Rule { name, when, outcome: Outcome::Allow }
}

const fn deny(name: &'static str, when: fn(&Facts) -> bool) -> Rule {
    Rule { name, when, outcome: Outcome::Deny }
}

fn anonymous(f: &Facts) -> bool {
    f.principal.is_none()
}

fn superuser(f: &Facts) -> bool {
    f.principal_is(|p| p.is_superuser)
}

fn admin(f: &Facts) -> bool {
    f.principal_is(Principal::is_admin)
}

fn editor(f: &Facts) -> bool {
    f.principal_is(Principal::is_editor)
}

fn inactive(f: &Facts) -> bool {
    f.principal_is(|p| !p.is_active())
}

fn owner(f: &Facts) -> bool {
    match (f.user_id(), f.owner_id) {
        (Some(user), Some(owner)) => user == owner,
        _ => false,
    }
}

fn editor_owner(f: &Facts) -> bool {
    editor(f) && owner(f)
}

fn document_view_grant(f: &Facts) -> bool {
    DocumentPermission::ALL
        .iter()
        .any(|p| p.grants_view() && f.holds(*p))
}

fn document_download_grant(f: &Facts) -> bool {
    f.holds(DocumentPermission::Download)
}

fn document_comment_grant(f: &Facts) -> bool {
    f.holds(DocumentPermission::Comment)
}

fn document_change_grant(f: &Facts) -> bool {
    f.holds(DocumentPermission::Change)
}

fn document_delete_grant(f: &Facts) -> bool {
    f.holds(DocumentPermission::Delete)
}

fn editor_with_share_grant(f: &Facts) -> bool {
    editor(f) && f.holds(DocumentPermission::Share)
}

fn cannot_view_document(f: &Facts) -> bool {
    !evaluate(DOCUMENT_VIEW, f).allowed
}

fn folder_browse_grant(f: &Facts) -> bool {
    f.holds(FolderPermission::Browse)
}

fn folder_change_grant(f: &Facts) -> bool {
    f.holds(FolderPermission::Change)
}

fn folder_delete_grant(f: &Facts) -> bool {
    f.holds(FolderPermission::Delete)
}

fn add_folder_capability(f: &Facts) -> bool {
    f.capabilities.contains(&Capability::AddFolder)
}

const DOCUMENT_VIEW: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    allow("admin", admin),
    allow("editor", editor),
    allow("owner", owner),
    allow("grant:view", document_view_grant),
];

const DOCUMENT_CREATE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
];

const DOCUMENT_EDIT: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
    allow("grant:change", document_change_grant),
];

const DOCUMENT_DELETE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
    allow("grant:delete", document_delete_grant),
];

// Ownership alone does not confer download
const DOCUMENT_DOWNLOAD: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    allow("admin", admin),
    allow("editor", editor),
    allow("grant:download", document_download_grant),
];

const DOCUMENT_COMMENT: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    deny("cannot-view", cannot_view_document),
    allow("admin", admin),
    allow("editor", editor),
    allow("owner", owner),
    allow("grant:comment", document_comment_grant),
];

// A non-owner editor needs an explicit share grant; nothing else bootstraps it
const DOCUMENT_SHARE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor-owner", editor_owner),
    allow("editor-grant:share", editor_with_share_grant),
];

const FOLDER_VIEW: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    allow("admin", admin),
    allow("editor", editor),
    allow("owner", owner),
    allow("grant:browse", folder_browse_grant),
];

const FOLDER_CREATE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
    allow("capability:add_folder", add_folder_capability),
];

const FOLDER_EDIT: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
    allow("grant:change", folder_change_grant),
];

const FOLDER_DELETE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
    allow("grant:delete", folder_delete_grant),
];

const FOLDER_COMMENT: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor", editor),
];

const FOLDER_SHARE: &[Rule] = &[
    deny("anonymous", anonymous),
    allow("superuser", superuser),
    deny("inactive", inactive),
    allow("admin", admin),
    allow("editor-owner", editor_owner),
];

/// The ordered decision table for one (object type, action) pair.
pub fn rules_for(kind: ObjectKind, action: Action) -> &'static [Rule] {
    match (kind, action) {
        (ObjectKind::Document, Action::View) => DOCUMENT_VIEW,
        (ObjectKind::Document, Action::Create) => DOCUMENT_CREATE,
        (ObjectKind::Document, Action::Edit) => DOCUMENT_EDIT,
        (ObjectKind::Document, Action::Delete) => DOCUMENT_DELETE,
        (ObjectKind::Document, Action::Download) => DOCUMENT_DOWNLOAD,
        (ObjectKind::Document, Action::Comment) => DOCUMENT_COMMENT,
        (ObjectKind::Document, Action::Share) => DOCUMENT_SHARE,
        (ObjectKind::Folder, Action::View) => FOLDER_VIEW,
        (ObjectKind::Folder, Action::Create) => FOLDER_CREATE,
        (ObjectKind::Folder, Action::Edit) => FOLDER_EDIT,
        (ObjectKind::Folder, Action::Delete) => FOLDER_DELETE,
        (ObjectKind::Folder, Action::Download) => FOLDER_VIEW,
        (ObjectKind::Folder, Action::Comment) => FOLDER_COMMENT,
        (ObjectKind::Folder, Action::Share) => FOLDER_SHARE,
    }
}

/// First matching rule wins; no match denies.
pub fn evaluate(rules: &[Rule], facts: &Facts) -> Decision {
    rules
        .iter()
        .find(|rule| (rule.when)(facts))
        .map(|rule| Decision {
            allowed: rule.outcome == Outcome::Allow,
            rule: rule.name,
        })
        .unwrap_or(Decision::DEFAULT_DENY)
}

/// Decision policy seam; the engine loads facts and delegates here.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, action: Action, facts: &Facts) -> Decision;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicyEvaluator;

impl DefaultPolicyEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyEvaluator for DefaultPolicyEvaluator {
    fn evaluate(&self, action: Action, facts: &Facts) -> Decision {
        let decision = evaluate(rules_for(facts.object_kind, action), facts);
        tracing::debug!(
            user_id = ?facts.user_id(),
            action = %action,
            object_type = %facts.object_kind,
            rule = decision.rule,
            allowed = decision.allowed,
            "authorization decision"
        );
        decision
    }
}
