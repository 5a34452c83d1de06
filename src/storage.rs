//! Byte storage behind opaque handles.
//!
//! The database only ever sees handles; nothing in the permission core reads
//! file contents.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Datelike;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::utils::{file_extension, utc_now};

/// Metadata of a stored blob, copied onto documents and versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub handle: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub content_hash: String,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> AppResult<StoredFile>;
    async fn get(&self, handle: &str) -> AppResult<Vec<u8>>;
    /// Returns false when nothing was stored under `handle`.
    async fn remove(&self, handle: &str) -> AppResult<bool>;
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn guess_content_type(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Files under a local directory, sharded by upload month:
/// `documents/<yyyy>/<mm>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| AppError::storage(format!("cannot create {}: {}", root.display(), e)))?;
        tracing::info!(path = %root.display(), "file store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &str) -> AppResult<PathBuf> {
        let relative = Path::new(handle);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if handle.is_empty() || escapes {
            return Err(AppError::storage(format!("invalid file handle: {handle}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> AppResult<StoredFile> {
        let now = utc_now();
        let mut handle = format!("documents/{:04}/{:02}/{}", now.year(), now.month(), Uuid::new_v4());
        if let Some(ext) = file_extension(file_name) {
            handle.push('.');
            handle.push_str(&ext);
        }

        let path = self.path_for(&handle)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::storage(e.to_string()))?;
        }

        // Write then rename so readers never see a partial file
        let temp_path = path.with_extension("part");
        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| AppError::storage(e.to_string()))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| AppError::storage(e.to_string()))?;

        tracing::debug!(handle = %handle, size = bytes.len(), "stored file");

        Ok(StoredFile {
            handle,
            file_name: file_name.to_string(),
            content_type: guess_content_type(file_name).to_string(),
            size: bytes.len() as i64,
            content_hash: content_hash(bytes),
        })
    }

    async fn get(&self, handle: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(handle)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::not_found(format!("stored file {handle}"))
            } else {
                AppError::storage(e.to_string())
            }
        })
    }

    async fn remove(&self, handle: &str) -> AppResult<bool> {
        let path = self.path_for(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let stored = store.put("Report.PDF", b"hello").await.unwrap();
        assert!(stored.handle.starts_with("documents/"));
        assert!(stored.handle.ends_with(".pdf"));
        assert_eq!(stored.size, 5);
        assert_eq!(stored.content_type, "application/pdf");
        assert_eq!(stored.content_hash, content_hash(b"hello"));

        assert_eq!(store.get(&stored.handle).await.unwrap(), b"hello");
        assert!(store.remove(&stored.handle).await.unwrap());
        assert!(!store.remove(&stored.handle).await.unwrap());
        assert!(store.get(&stored.handle).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn handles_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.remove("/etc/passwd").await.is_err());
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
