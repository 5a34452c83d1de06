use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::row_parsers::{document_from_row, version_from_row};
use crate::errors::{unique_as_validation, AppError, AppResult};
use crate::models::document::{Document, DocumentUpdate, DocumentVersion, NewDocument};
use crate::models::permission::{DocumentPermission, ObjectRef, PermissionKind};
use crate::permission_store::{grant_with, purge_object};
use crate::storage::{FileStore, StoredFile};
use crate::utils::{file_extension, utc_now, validate_name};

pub const ALLOWED_EXTENSIONS: [&str; 9] = ["pdf", "docx", "doc", "xlsx", "xls", "txt", "png", "jpg", "jpeg"];

const DOCUMENT_COLUMNS: &str = "id, name, description, folder_id, owner_id, file_handle, file_name, content_type, size, content_hash, status, deleted, created_at, modified_at";
const VERSION_COLUMNS: &str = "id, document_id, version_number, file_handle, file_name, size, content_hash, note, created_by, created_at";

/// Checks an upload before any bytes are stored.
pub fn validate_upload(file_name: &str, size: u64, max_bytes: u64) -> AppResult<()> {
    validate_name(file_name, "file name")?;
    let ext = file_extension(file_name)
        .ok_or_else(|| AppError::validation("file has no extension"))?;
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::validation(format!(
            "file type .{ext} not allowed; use one of {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if size > max_bytes {
        return Err(AppError::validation(format!(
            "file is {size} bytes, the limit is {max_bytes}"
        )));
    }
    Ok(())
}

pub(crate) async fn fetch_document(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Document> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("document {id}")))?;
    document_from_row(&row)
}

pub(crate) async fn ensure_folder_exists(conn: &mut SqliteConnection, folder_id: Uuid) -> AppResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM folders WHERE id = ?")
        .bind(folder_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    if found.is_none() {
        return Err(AppError::validation(format!("folder {folder_id} does not exist")));
    }
    Ok(())
}

/// Removes a document with its versions, comments, shares and grants.
/// Returns the file handles the caller must remove once the transaction commits.
pub(crate) async fn delete_document_rows(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Vec<String>> {
    let doc_id = id.to_string();

    let mut handles: Vec<String> = sqlx::query_scalar("SELECT file_handle FROM document_versions WHERE document_id = ?")
        .bind(&doc_id)
        .fetch_all(&mut *conn)
        .await?;
    let current: Option<Option<String>> = sqlx::query_scalar("SELECT file_handle FROM documents WHERE id = ?")
        .bind(&doc_id)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(Some(handle)) = current {
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }

    for sql in [
        "DELETE FROM comments WHERE document_id = ?",
        "DELETE FROM document_versions WHERE document_id = ?",
        "DELETE FROM document_shares WHERE document_id = ?",
    ] {
        sqlx::query(sql).bind(&doc_id).execute(&mut *conn).await?;
    }
    purge_object(conn, ObjectRef::document(id)).await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(&doc_id)
        .execute(&mut *conn)
        .await?;

    Ok(handles)
}

/// Removes files after their rows are gone. Failures only leave orphans behind.
pub(crate) async fn remove_files(files: &dyn FileStore, handles: &[String]) {
    for handle in handles {
        if let Err(err) = files.remove(handle).await {
            tracing::warn!(handle = %handle, "failed to remove stored file: {}", err);
        }
    }
}

/// Documents and their version chains.
#[derive(Clone)]
pub struct DocumentManager {
    pool: SqlitePool,
    files: Arc<dyn FileStore>,
}

impl DocumentManager {
    pub fn new(pool: SqlitePool, files: Arc<dyn FileStore>) -> Self {
        Self { pool, files }
    }

    /// Creates the document with `file` as version 1. The owner is granted
    /// browse and download on it.
    pub async fn create_document(
        &self,
        owner_id: Uuid,
        new: NewDocument,
        file: &StoredFile,
    ) -> AppResult<(Document, DocumentVersion)> {
        let name = if new.name.trim().is_empty() {
            file.file_name.clone()
        } else {
            new.name
        };
        let name = validate_name(&name, "document name")?;
        let now = utc_now();

        let document = Document {
            id: Uuid::new_v4(),
            name,
            description: new.description.trim().to_string(),
            folder_id: new.folder_id,
            owner_id,
            file_handle: Some(file.handle.clone()),
            file_name: Some(file.file_name.clone()),
            content_type: Some(file.content_type.clone()),
            size: Some(file.size),
            content_hash: Some(file.content_hash.clone()),
            status: new.status,
            deleted: false,
            created_at: now,
            modified_at: now,
        };

        let mut tx = self.pool.begin().await?;

        if let Some(folder_id) = document.folder_id {
            ensure_folder_exists(&mut tx, folder_id).await?;
        }

        let sql = format!("INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(document.id.to_string())
            .bind(&document.name)
            .bind(&document.description)
            .bind(document.folder_id.map(|id| id.to_string()))
            .bind(document.owner_id.to_string())
            .bind(&document.file_handle)
            .bind(&document.file_name)
            .bind(&document.content_type)
            .bind(document.size)
            .bind(&document.content_hash)
            .bind(document.status.as_str())
            .bind(document.deleted)
            .bind(document.created_at.to_rfc3339())
            .bind(document.modified_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        let version = insert_version(&mut tx, document.id, file, owner_id, "", now).await?;

        let object = document.object_ref();
        for kind in [DocumentPermission::Browse, DocumentPermission::Download] {
            grant_with(&mut tx, owner_id, object, PermissionKind::Document(kind)).await?;
        }

        tx.commit().await?;

        tracing::info!(document_id = %document.id, owner_id = %owner_id, "document created");
        Ok((document, version))
    }

    /// Appends the next version and points the document at it, in one
    /// transaction.
    pub async fn create_version(
        &self,
        document_id: Uuid,
        file: &StoredFile,
        creator: Uuid,
        note: &str,
    ) -> AppResult<DocumentVersion> {
        let now = utc_now();
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading the current maximum
        let updated = sqlx::query(
            "UPDATE documents SET file_handle = ?, file_name = ?, content_type = ?, size = ?, content_hash = ?, modified_at = ? WHERE id = ?",
        )
        .bind(&file.handle)
        .bind(&file.file_name)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(&file.content_hash)
        .bind(now.to_rfc3339())
        .bind(document_id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::not_found(format!("document {document_id}")));
        }

        let version = insert_version(&mut tx, document_id, file, creator, note, now).await?;

        tx.commit().await?;

        tracing::info!(
            document_id = %document_id,
            version = version.version_number,
            "document version created"
        );
        Ok(version)
    }

    pub async fn get_document(&self, id: Uuid) -> AppResult<Document> {
        let mut conn = self.pool.acquire().await?;
        fetch_document(&mut conn, id).await
    }

    pub async fn list_versions(&self, document_id: Uuid) -> AppResult<Vec<DocumentVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM document_versions WHERE document_id = ? ORDER BY version_number ASC");
        let rows = sqlx::query(&sql)
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(version_from_row).collect()
    }

    pub async fn latest_version(&self, document_id: Uuid) -> AppResult<Option<DocumentVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM document_versions WHERE document_id = ? ORDER BY version_number DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(document_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    pub async fn get_version(&self, version_id: Uuid) -> AppResult<DocumentVersion> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM document_versions WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(version_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("version {version_id}")))?;
        version_from_row(&row)
    }

    pub async fn update_document(&self, id: Uuid, update: DocumentUpdate) -> AppResult<Document> {
        let mut tx = self.pool.begin().await?;
        let mut document = fetch_document(&mut tx, id).await?;

        if let Some(name) = update.name {
            document.name = validate_name(&name, "document name")?;
        }
        if let Some(description) = update.description {
            document.description = description.trim().to_string();
        }
        if let Some(status) = update.status {
            document.status = status;
        }
        if let Some(folder_id) = update.folder_id {
            if let Some(target) = folder_id {
                ensure_folder_exists(&mut tx, target).await?;
            }
            document.folder_id = folder_id;
        }
        document.modified_at = utc_now();

        sqlx::query("UPDATE documents SET name = ?, description = ?, status = ?, folder_id = ?, modified_at = ? WHERE id = ?")
            .bind(&document.name)
            .bind(&document.description)
            .bind(document.status.as_str())
            .bind(document.folder_id.map(|id| id.to_string()))
            .bind(document.modified_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(document)
    }

    /// Hides the document from listings; it stays addressable by id.
    pub async fn soft_delete(&self, id: Uuid) -> AppResult<Document> {
        let mut tx = self.pool.begin().await?;
        let mut document = fetch_document(&mut tx, id).await?;
        document.deleted = true;
        document.modified_at = utc_now();
        sqlx::query("UPDATE documents SET deleted = 1, modified_at = ? WHERE id = ?")
            .bind(document.modified_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(document_id = %id, "document soft-deleted");
        Ok(document)
    }

    /// Removes the document and everything hanging off it, then its files.
    pub async fn hard_delete(&self, id: Uuid) -> AppResult<Document> {
        let mut tx = self.pool.begin().await?;
        let document = fetch_document(&mut tx, id).await?;
        let handles = delete_document_rows(&mut tx, id).await?;
        tx.commit().await?;

        remove_files(self.files.as_ref(), &handles).await;
        tracing::info!(document_id = %id, files = handles.len(), "document purged");
        Ok(document)
    }
}

async fn insert_version(
    conn: &mut SqliteConnection,
    document_id: Uuid,
    file: &StoredFile,
    creator: Uuid,
    note: &str,
    created_at: chrono::DateTime<chrono::Utc>,
) -> AppResult<DocumentVersion> {
    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version_number) FROM document_versions WHERE document_id = ?")
        .bind(document_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

    let version = DocumentVersion {
        id: Uuid::new_v4(),
        document_id,
        version_number: current.unwrap_or(0) + 1,
        file_handle: file.handle.clone(),
        file_name: file.file_name.clone(),
        size: file.size,
        content_hash: file.content_hash.clone(),
        note: note.trim().to_string(),
        created_by: creator,
        created_at,
    };

    let sql = format!("INSERT INTO document_versions ({VERSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(version.id.to_string())
        .bind(version.document_id.to_string())
        .bind(version.version_number)
        .bind(&version.file_handle)
        .bind(&version.file_name)
        .bind(version.size)
        .bind(&version.content_hash)
        .bind(&version.note)
        .bind(version.created_by.to_string())
        .bind(version.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(unique_as_validation("duplicate version number"))?;

    Ok(version)
}
