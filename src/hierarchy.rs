//! Folder tree operations.
//!
//! The tree is stored as parent pointers. Traversals use an explicit worklist
//! with a visited set, so neither deep trees nor a corrupted cycle can recurse
//! without bound.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::row_parsers::{folder_from_row, parse_uuid};
use crate::errors::{unique_as_validation, AppError, AppResult};
use crate::models::folder::{DeletePolicy, Folder, FolderDeletion, FolderUpdate, NewFolder};
use crate::models::permission::{FolderPermission, ObjectRef, PermissionKind};
use crate::permission_store::{grant_with, purge_object};
use crate::storage::FileStore;
use crate::utils::{utc_now, validate_name};
use crate::versioning::{delete_document_rows, ensure_folder_exists, remove_files};

const FOLDER_COLUMNS: &str = "id, name, description, owner_id, parent_id, created_at";
const DUPLICATE_FOLDER: &str = "a folder with this name already exists here";

pub(crate) async fn fetch_folder(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Folder> {
    let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("folder {id}")))?;
    folder_from_row(&row)
}

async fn child_folder_ids(conn: &mut SqliteConnection, parent: Uuid) -> AppResult<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM folders WHERE parent_id = ?")
        .bind(parent.to_string())
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|id| parse_uuid(id)).collect()
}

async fn child_document_ids(conn: &mut SqliteConnection, folder: Uuid) -> AppResult<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM documents WHERE folder_id = ?")
        .bind(folder.to_string())
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|id| parse_uuid(id)).collect()
}

/// `root` followed by every folder below it, parents before children.
pub(crate) async fn subtree(conn: &mut SqliteConnection, root: Uuid) -> AppResult<Vec<Uuid>> {
    let mut order = vec![root];
    let mut visited = HashSet::from([root]);
    let mut next = 0;

    while next < order.len() {
        let current = order[next];
        next += 1;
        for child in child_folder_ids(conn, current).await? {
            if visited.insert(child) {
                order.push(child);
            } else {
                tracing::warn!(folder_id = %child, "folder reached twice while walking the tree");
            }
        }
    }
    Ok(order)
}

/// Every folder strictly below `root`.
pub(crate) async fn descendants_of(conn: &mut SqliteConnection, root: Uuid) -> AppResult<HashSet<Uuid>> {
    let mut all: HashSet<Uuid> = subtree(conn, root).await?.into_iter().collect();
    all.remove(&root);
    Ok(all)
}

#[derive(Clone)]
pub struct HierarchyManager {
    pool: SqlitePool,
    files: Arc<dyn FileStore>,
}

impl HierarchyManager {
    pub fn new(pool: SqlitePool, files: Arc<dyn FileStore>) -> Self {
        Self { pool, files }
    }

    /// Creates a folder owned by `owner_id`, who is granted browse on it.
    pub async fn create_folder(&self, owner_id: Uuid, new: NewFolder) -> AppResult<Folder> {
        let folder = Folder {
            id: Uuid::new_v4(),
            name: validate_name(&new.name, "folder name")?,
            description: new.description.trim().to_string(),
            owner_id,
            parent_id: new.parent_id,
            created_at: utc_now(),
        };

        let mut tx = self.pool.begin().await?;
        if let Some(parent_id) = folder.parent_id {
            ensure_folder_exists(&mut tx, parent_id).await?;
        }

        let sql = format!("INSERT INTO folders ({FOLDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(folder.id.to_string())
            .bind(&folder.name)
            .bind(&folder.description)
            .bind(folder.owner_id.to_string())
            .bind(folder.parent_id.map(|id| id.to_string()))
            .bind(folder.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(unique_as_validation(DUPLICATE_FOLDER))?;

        grant_with(&mut tx, owner_id, folder.object_ref(), PermissionKind::Folder(FolderPermission::Browse)).await?;

        tx.commit().await?;
        tracing::info!(folder_id = %folder.id, owner_id = %owner_id, "folder created");
        Ok(folder)
    }

    pub async fn get_folder(&self, id: Uuid) -> AppResult<Folder> {
        let mut conn = self.pool.acquire().await?;
        fetch_folder(&mut conn, id).await
    }

    /// Direct subfolders of `parent` (`None` for the root level), by name.
    pub async fn list_children(&self, parent: Option<Uuid>) -> AppResult<Vec<Folder>> {
        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE parent_id IS ? ORDER BY name COLLATE NOCASE ASC");
        let rows = sqlx::query(&sql)
            .bind(parent.map(|id| id.to_string()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(folder_from_row).collect()
    }

    pub async fn update_folder(&self, id: Uuid, update: FolderUpdate) -> AppResult<Folder> {
        let mut tx = self.pool.begin().await?;
        let mut folder = fetch_folder(&mut tx, id).await?;
        if let Some(name) = update.name {
            folder.name = validate_name(&name, "folder name")?;
        }
        if let Some(description) = update.description {
            folder.description = description.trim().to_string();
        }

        sqlx::query("UPDATE folders SET name = ?, description = ? WHERE id = ?")
            .bind(&folder.name)
            .bind(&folder.description)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(unique_as_validation(DUPLICATE_FOLDER))?;

        tx.commit().await?;
        Ok(folder)
    }

    /// Reparents `id` under `new_parent`. Moving a folder into itself or its
    /// own subtree is rejected.
    pub async fn move_folder(&self, id: Uuid, new_parent: Option<Uuid>) -> AppResult<Folder> {
        let mut tx = self.pool.begin().await?;
        let mut folder = fetch_folder(&mut tx, id).await?;

        if let Some(target) = new_parent {
            if target == id {
                return Err(AppError::validation("a folder cannot be its own parent"));
            }
            ensure_folder_exists(&mut tx, target).await?;
            if descendants_of(&mut tx, id).await?.contains(&target) {
                return Err(AppError::validation("a folder cannot be moved into its own subfolder"));
            }
        }

        sqlx::query("UPDATE folders SET parent_id = ? WHERE id = ?")
            .bind(new_parent.map(|p| p.to_string()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(unique_as_validation(DUPLICATE_FOLDER))?;

        tx.commit().await?;
        folder.parent_id = new_parent;
        tracing::info!(folder_id = %id, parent_id = ?new_parent, "folder moved");
        Ok(folder)
    }

    pub async fn descendants(&self, id: Uuid) -> AppResult<HashSet<Uuid>> {
        let mut conn = self.pool.acquire().await?;
        fetch_folder(&mut conn, id).await?;
        descendants_of(&mut conn, id).await
    }

    /// Folders from the root down to `id`, inclusive.
    pub async fn path(&self, id: Uuid) -> AppResult<Vec<Folder>> {
        let mut conn = self.pool.acquire().await?;
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(AppError::internal(format!("folder cycle at {current}")));
            }
            let folder = fetch_folder(&mut conn, current).await?;
            cursor = folder.parent_id;
            path.push(folder);
        }
        path.reverse();
        Ok(path)
    }

    /// "Parent / Child / Leaf".
    pub async fn full_path(&self, id: Uuid) -> AppResult<String> {
        let names: Vec<String> = self.path(id).await?.into_iter().map(|f| f.name).collect();
        Ok(names.join(" / "))
    }

    /// Deletes a folder after resolving its contents per `policy`.
    ///
    /// Everything runs in one transaction; validation failures happen before
    /// any write. Stored files of deleted documents are removed after commit.
    pub async fn delete_folder(&self, id: Uuid, policy: DeletePolicy) -> AppResult<FolderDeletion> {
        let mut tx = self.pool.begin().await?;
        let folder = fetch_folder(&mut tx, id).await?;

        let new_parent = match policy {
            DeletePolicy::MoveToParent => Some(folder.parent_id.ok_or_else(|| {
                AppError::validation("a root folder has no parent to receive its contents")
            })?),
            DeletePolicy::MoveToFolder(target) => {
                if target == id {
                    return Err(AppError::validation("cannot move contents into the folder being deleted"));
                }
                ensure_folder_exists(&mut tx, target).await?;
                if descendants_of(&mut tx, id).await?.contains(&target) {
                    return Err(AppError::validation(
                        "cannot move contents into a subfolder of the folder being deleted",
                    ));
                }
                Some(target)
            }
            DeletePolicy::DeleteAll => None,
        };

        let mut outcome = FolderDeletion {
            new_parent,
            ..FolderDeletion::default()
        };
        let mut handles = Vec::new();

        match new_parent {
            Some(target) => {
                outcome.moved_folders = child_folder_ids(&mut tx, id).await?;
                outcome.moved_documents = child_document_ids(&mut tx, id).await?;

                sqlx::query("UPDATE folders SET parent_id = ? WHERE parent_id = ?")
                    .bind(target.to_string())
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(unique_as_validation("target already holds a folder with the same name"))?;
                sqlx::query("UPDATE documents SET folder_id = ? WHERE folder_id = ?")
                    .bind(target.to_string())
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await?;

                delete_folder_row(&mut tx, id).await?;
                outcome.deleted_folders.push(id);
            }
            None => {
                let folders = subtree(&mut tx, id).await?;
                for folder_id in &folders {
                    for document_id in child_document_ids(&mut tx, *folder_id).await? {
                        handles.extend(delete_document_rows(&mut tx, document_id).await?);
                        outcome.deleted_documents.push(document_id);
                    }
                }
                // Deepest first so no row points at a deleted parent
                for folder_id in folders.iter().rev() {
                    delete_folder_row(&mut tx, *folder_id).await?;
                }
                outcome.deleted_folders = folders;
            }
        }

        tx.commit().await?;

        remove_files(self.files.as_ref(), &handles).await;

        tracing::info!(
            folder_id = %id,
            policy = ?policy,
            deleted_folders = outcome.deleted_folders.len(),
            deleted_documents = outcome.deleted_documents.len(),
            moved_folders = outcome.moved_folders.len(),
            moved_documents = outcome.moved_documents.len(),
            "folder deleted"
        );
        Ok(outcome)
    }
}

async fn delete_folder_row(conn: &mut SqliteConnection, id: Uuid) -> AppResult<()> {
    purge_object(conn, ObjectRef::folder(id)).await?;
    sqlx::query("DELETE FROM folders WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
