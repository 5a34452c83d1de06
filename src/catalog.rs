use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::{Action, AuthorizationEngine, RequestScope, Target};
use crate::db::row_parsers::{document_from_row, folder_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::document::Document;
use crate::models::folder::Folder;

/// What a user sees when opening a folder (or the root).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    pub folder: Option<Folder>,
    pub folders: Vec<Folder>,
    pub documents: Vec<Document>,
}

/// Read-side queries filtered through the authorization engine.
///
/// Each call builds its own [`RequestScope`], so repeated checks on the same
/// object within one listing hit the cache and nothing outlives the call.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
    engine: AuthorizationEngine,
}

impl Catalog {
    pub fn new(pool: SqlitePool, engine: AuthorizationEngine) -> Self {
        Self { pool, engine }
    }

    /// Child folders and non-deleted documents of `folder_id` that `user` may view.
    pub async fn browse(&self, user: Option<Uuid>, folder_id: Option<Uuid>) -> AppResult<Listing> {
        let scope = RequestScope::new(self.engine.clone(), user);

        let folder = match folder_id {
            Some(id) => {
                let row = sqlx::query("SELECT id, name, description, owner_id, parent_id, created_at FROM folders WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("folder {id}")))?;
                if !scope.can(Action::View, Target::Folder(id)).await {
                    return Err(AppError::forbidden("folder not visible"));
                }
                Some(folder_from_row(&row)?)
            }
            None => None,
        };
        let parent = folder_id.map(|id| id.to_string());

        let rows = sqlx::query(
            "SELECT id, name, description, owner_id, parent_id, created_at FROM folders WHERE parent_id IS ? ORDER BY name COLLATE NOCASE ASC",
        )
        .bind(&parent)
        .fetch_all(&self.pool)
        .await?;
        let mut folders = Vec::with_capacity(rows.len());
        for row in &rows {
            let child = folder_from_row(row)?;
            if scope.can(Action::View, Target::Folder(child.id)).await {
                folders.push(child);
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, description, folder_id, owner_id, file_handle, file_name, content_type, size, content_hash, status, deleted, created_at, modified_at
            FROM documents
            WHERE folder_id IS ? AND deleted = 0
            ORDER BY name COLLATE NOCASE ASC
            "#,
        )
        .bind(&parent)
        .fetch_all(&self.pool)
        .await?;
        let documents = self.visible_documents(&scope, &rows).await?;

        Ok(Listing {
            folder,
            folders,
            documents,
        })
    }

    /// Case-insensitive substring search over names and descriptions of
    /// non-deleted documents `user` may view.
    pub async fn search(&self, user: Option<Uuid>, query: &str) -> AppResult<Vec<Document>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let scope = RequestScope::new(self.engine.clone(), user);

        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, folder_id, owner_id, file_handle, file_name, content_type, size, content_hash, status, deleted, created_at, modified_at
            FROM documents
            WHERE deleted = 0 AND (lower(name) LIKE ?1 ESCAPE '\' OR lower(description) LIKE ?1 ESCAPE '\')
            ORDER BY modified_at DESC
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        self.visible_documents(&scope, &rows).await
    }

    async fn visible_documents(
        &self,
        scope: &RequestScope,
        rows: &[sqlx::sqlite::SqliteRow],
    ) -> AppResult<Vec<Document>> {
        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let document = document_from_row(row)?;
            if scope.can(Action::View, Target::Document(document.id)).await {
                documents.push(document);
            }
        }
        Ok(documents)
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
