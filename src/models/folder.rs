use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::models::permission::ObjectRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::folder(self.id)
    }
}

impl Loggable for Folder {
    fn entity_type() -> &'static str { "folder" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolderUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// What happens to a folder's direct children when the folder is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum DeletePolicy {
    MoveToParent,
    MoveToFolder(Uuid),
    DeleteAll,
}

/// Outcome of a folder deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderDeletion {
    pub deleted_folders: Vec<Uuid>,
    pub deleted_documents: Vec<Uuid>,
    pub moved_folders: Vec<Uuid>,
    pub moved_documents: Vec<Uuid>,
    pub new_parent: Option<Uuid>,
}

impl Loggable for FolderDeletion {
    fn entity_type() -> &'static str { "folder" }
    fn subject_id(&self) -> Uuid {
        self.deleted_folders.first().copied().unwrap_or_default()
    }
    fn severity(&self) -> Severity { Severity::Critical }
}
