use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Set when the comment targets one version rather than the document as a whole.
    pub version_id: Option<Uuid>,
    pub author_id: Uuid,
    pub body: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl crate::events::Loggable for Comment {
    fn entity_type() -> &'static str { "comment" }
    fn subject_id(&self) -> Uuid { self.document_id }
}
