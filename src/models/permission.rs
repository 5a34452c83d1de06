use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Document,
    Folder,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Document => "document",
            ObjectKind::Folder => "folder",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(ObjectKind::Document),
            "folder" => Ok(ObjectKind::Folder),
            other => Err(AppError::validation(format!("unknown object type: {other}"))),
        }
    }
}

/// A typed pointer at a folder or document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: Uuid,
}

impl ObjectRef {
    pub fn document(id: Uuid) -> Self {
        Self { kind: ObjectKind::Document, id }
    }

    pub fn folder(id: Uuid) -> Self {
        Self { kind: ObjectKind::Folder, id }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPermission {
    Browse,
    Download,
    Comment,
    Change,
    Delete,
    Share,
}

impl DocumentPermission {
    pub const ALL: [DocumentPermission; 6] = [
        DocumentPermission::Browse,
        DocumentPermission::Download,
        DocumentPermission::Comment,
        DocumentPermission::Change,
        DocumentPermission::Delete,
        DocumentPermission::Share,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            DocumentPermission::Browse => "browse",
            DocumentPermission::Download => "download",
            DocumentPermission::Comment => "comment",
            DocumentPermission::Change => "change",
            DocumentPermission::Delete => "delete",
            DocumentPermission::Share => "share",
        }
    }

    /// Share levels each include viewing the document.
    pub fn grants_view(&self) -> bool {
        matches!(
            self,
            DocumentPermission::Browse
                | DocumentPermission::Download
                | DocumentPermission::Comment
                | DocumentPermission::Change
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderPermission {
    Browse,
    Change,
    Delete,
    AddDocument,
    AddSubfolder,
}

impl FolderPermission {
    pub const ALL: [FolderPermission; 5] = [
        FolderPermission::Browse,
        FolderPermission::Change,
        FolderPermission::Delete,
        FolderPermission::AddDocument,
        FolderPermission::AddSubfolder,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            FolderPermission::Browse => "browse",
            FolderPermission::Change => "change",
            FolderPermission::Delete => "delete",
            FolderPermission::AddDocument => "add_document",
            FolderPermission::AddSubfolder => "add_subfolder",
        }
    }
}

/// A grantable permission, tagged with the object type it applies to so that
/// a folder `browse` can never be confused with a document `browse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "object", content = "kind", rename_all = "lowercase")]
pub enum PermissionKind {
    Document(DocumentPermission),
    Folder(FolderPermission),
}

impl PermissionKind {
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            PermissionKind::Document(_) => ObjectKind::Document,
            PermissionKind::Folder(_) => ObjectKind::Folder,
        }
    }

    pub fn codename(&self) -> &'static str {
        match self {
            PermissionKind::Document(p) => p.codename(),
            PermissionKind::Folder(p) => p.codename(),
        }
    }

    pub fn all_for(kind: ObjectKind) -> Vec<PermissionKind> {
        match kind {
            ObjectKind::Document => DocumentPermission::ALL
                .iter()
                .copied()
                .map(PermissionKind::Document)
                .collect(),
            ObjectKind::Folder => FolderPermission::ALL
                .iter()
                .copied()
                .map(PermissionKind::Folder)
                .collect(),
        }
    }

    /// Parses a stored codename in the namespace of `kind`.
    pub fn parse(kind: ObjectKind, codename: &str) -> Result<Self, AppError> {
        Self::all_for(kind)
            .into_iter()
            .find(|p| p.codename() == codename)
            .ok_or_else(|| AppError::validation(format!("unknown {kind} permission: {codename}")))
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object_kind(), self.codename())
    }
}

impl From<DocumentPermission> for PermissionKind {
    fn from(value: DocumentPermission) -> Self {
        PermissionKind::Document(value)
    }
}

impl From<FolderPermission> for PermissionKind {
    fn from(value: FolderPermission) -> Self {
        PermissionKind::Folder(value)
    }
}

/// Object-less permissions held by a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AddFolder,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AddFolder => "add_folder",
        }
    }
}

impl FromStr for Capability {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add_folder" => Ok(Capability::AddFolder),
            other => Err(AppError::validation(format!("unknown capability: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub subject_id: Uuid,
    pub object: ObjectRef,
    pub kind: PermissionKind,
    pub active: bool,
    pub granted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_codename_is_distinct_across_object_types() {
        let doc = PermissionKind::parse(ObjectKind::Document, "browse").unwrap();
        let folder = PermissionKind::parse(ObjectKind::Folder, "browse").unwrap();
        assert_ne!(doc, folder);
        assert_eq!(doc.codename(), folder.codename());
    }

    #[test]
    fn folder_only_codenames_do_not_parse_as_document_permissions() {
        assert!(PermissionKind::parse(ObjectKind::Document, "add_subfolder").is_err());
        assert!(PermissionKind::parse(ObjectKind::Folder, "share").is_err());
    }

    #[test]
    fn delete_and_share_do_not_imply_view() {
        assert!(!DocumentPermission::Delete.grants_view());
        assert!(!DocumentPermission::Share.grants_view());
        assert!(DocumentPermission::Comment.grants_view());
    }
}
