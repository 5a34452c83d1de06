use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::models::permission::ObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "published" => Ok(DocumentStatus::Published),
            "archived" => Ok(DocumentStatus::Archived),
            other => Err(AppError::validation(format!("unknown document status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// `None` places the document at the root.
    pub folder_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub file_handle: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub content_hash: Option<String>,
    pub status: DocumentStatus,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Document {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::document(self.id)
    }
}

impl Loggable for Document {
    fn entity_type() -> &'static str { "document" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i64,
    pub file_handle: String,
    pub file_name: String,
    pub size: i64,
    pub content_hash: String,
    pub note: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for DocumentVersion {
    fn entity_type() -> &'static str { "document_version" }
    fn subject_id(&self) -> Uuid { self.document_id }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDocument {
    /// Falls back to the uploaded file name when empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<DocumentStatus>,
    /// `Some(None)` moves the document to the root.
    pub folder_id: Option<Option<Uuid>>,
}
