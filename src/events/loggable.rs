use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ActivityKind;

/// Severity levels for activity logs; drives retention and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-deleted
    Critical,
    #[default]
    Important,
    /// Trimmed aggressively
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that can appear as the object of an activity log entry.
pub trait Loggable: Serialize + Send + Sync {
    /// The entity type name, e.g. "document" or "folder".
    fn entity_type() -> &'static str;

    /// The id the entry points at.
    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: ActivityKind) -> Severity {
        match action {
            ActivityKind::Delete | ActivityKind::PermissionChange | ActivityKind::Share => Severity::Critical,
            ActivityKind::Search => Severity::Noise,
            _ => self.severity(),
        }
    }
}
