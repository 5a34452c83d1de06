use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::permission::DocumentPermission;

/// The exclusive access level a share hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareLevel {
    Browse,
    Download,
    Comment,
    Change,
}

impl ShareLevel {
    pub const ALL: [ShareLevel; 4] = [
        ShareLevel::Browse,
        ShareLevel::Download,
        ShareLevel::Comment,
        ShareLevel::Change,
    ];

    pub fn permission(&self) -> DocumentPermission {
        match self {
            ShareLevel::Browse => DocumentPermission::Browse,
            ShareLevel::Download => DocumentPermission::Download,
            ShareLevel::Comment => DocumentPermission::Comment,
            ShareLevel::Change => DocumentPermission::Change,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.permission().codename()
    }
}

impl fmt::Display for ShareLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShareLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("not a share level: {s}")))
    }
}

impl TryFrom<DocumentPermission> for ShareLevel {
    type Error = AppError;

    fn try_from(value: DocumentPermission) -> Result<Self, Self::Error> {
        value.codename().parse()
    }
}

/// Audit record of a share; at most one per (document, recipient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentShare {
    pub id: Uuid,
    pub document_id: Uuid,
    pub granted_by: Uuid,
    pub granted_to: Uuid,
    pub level: ShareLevel,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl DocumentShare {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry < now)
    }

    /// Active and not past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }
}

impl Loggable for DocumentShare {
    fn entity_type() -> &'static str { "share" }
    fn subject_id(&self) -> Uuid { self.document_id }
    fn severity(&self) -> Severity { Severity::Critical }
}
