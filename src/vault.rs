//! The caller-facing facade.
//!
//! Every operation follows the same sequence: ask the engine, run the
//! mutation, then record the activity. A denial surfaces as
//! `AppError::Forbidden`.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::authz::{Action, AuthorizationEngine, Target};
use crate::catalog::{Catalog, Listing};
use crate::comments::CommentBoard;
use crate::config::Config;
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::events::{
    init_event_bus, log_activity, start_activity_listener, ActivityEvent, ActivityKind, ActivitySink, RequestContext,
};
use crate::hierarchy::HierarchyManager;
use crate::models::comment::Comment;
use crate::models::document::{Document, DocumentUpdate, DocumentVersion, NewDocument};
use crate::models::folder::{DeletePolicy, Folder, FolderDeletion, FolderUpdate, NewFolder};
use crate::models::share::{DocumentShare, ShareLevel};
use crate::sharing::SharingService;
use crate::storage::{FileStore, LocalFileStore, StoredFile};
use crate::users::UserDirectory;
use crate::versioning::{validate_upload, DocumentManager};

/// Bytes and metadata handed back by [`Vault::download`].
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Vault {
    pub pool: SqlitePool,
    pub engine: AuthorizationEngine,
    pub users: UserDirectory,
    pub folders: HierarchyManager,
    pub documents: DocumentManager,
    pub sharing: SharingService,
    pub comments: CommentBoard,
    pub catalog: Catalog,
    files: Arc<dyn FileStore>,
    activity: Arc<dyn ActivitySink>,
    max_upload_bytes: u64,
}

impl Vault {
    pub fn new(
        pool: SqlitePool,
        files: Arc<dyn FileStore>,
        activity: Arc<dyn ActivitySink>,
        max_upload_bytes: u64,
    ) -> Self {
        let engine = AuthorizationEngine::new(pool.clone());
        Self {
            users: UserDirectory::new(pool.clone()),
            folders: HierarchyManager::new(pool.clone(), files.clone()),
            documents: DocumentManager::new(pool.clone(), files.clone()),
            sharing: SharingService::new(pool.clone(), engine.clone(), activity.clone()),
            comments: CommentBoard::new(pool.clone()),
            catalog: Catalog::new(pool.clone(), engine.clone()),
            engine,
            pool,
            files,
            activity,
            max_upload_bytes,
        }
    }

    /// Connects, migrates, opens the local file store and starts the
    /// activity listener. The listener ends once every `Vault` clone is dropped.
    pub async fn open(config: &Config) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let pool = db::init(config).await?;
        let files = LocalFileStore::new(&config.storage_root).await?;
        let (bus, rx) = init_event_bus(config.activity_bus_capacity);
        let listener = tokio::spawn(start_activity_listener(rx, pool.clone()));

        let vault = Self::new(pool, Arc::new(files), Arc::new(bus), config.max_upload_bytes);
        Ok((vault, listener))
    }

    // Folders

    pub async fn create_folder(&self, actor: Uuid, new: NewFolder, context: Option<RequestContext>) -> AppResult<Folder> {
        self.engine.require(actor, Action::Create, Target::NewFolder).await?;
        if let Some(parent) = new.parent_id {
            self.require_existing(actor, Action::View, Target::Folder(parent)).await?;
        }
        let folder = self.folders.create_folder(actor, new).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Create, actor, &folder, format!("created folder '{}'", folder.name), context);
        Ok(folder)
    }

    pub async fn update_folder(
        &self,
        actor: Uuid,
        id: Uuid,
        update: FolderUpdate,
        context: Option<RequestContext>,
    ) -> AppResult<Folder> {
        self.engine.require(actor, Action::Edit, Target::Folder(id)).await?;
        let folder = self.folders.update_folder(id, update).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Edit, actor, &folder, format!("updated folder '{}'", folder.name), context);
        Ok(folder)
    }

    pub async fn move_folder(
        &self,
        actor: Uuid,
        id: Uuid,
        new_parent: Option<Uuid>,
        context: Option<RequestContext>,
    ) -> AppResult<Folder> {
        self.engine.require(actor, Action::Edit, Target::Folder(id)).await?;
        if let Some(parent) = new_parent {
            self.require_existing(actor, Action::Edit, Target::Folder(parent)).await?;
        }
        let folder = self.folders.move_folder(id, new_parent).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Edit, actor, &folder, format!("moved folder '{}'", folder.name), context);
        Ok(folder)
    }

    /// Deletes a folder; moving contents into another folder also needs edit
    /// rights on that folder.
    pub async fn delete_folder(
        &self,
        actor: Uuid,
        id: Uuid,
        policy: DeletePolicy,
        context: Option<RequestContext>,
    ) -> AppResult<FolderDeletion> {
        self.engine.require(actor, Action::Delete, Target::Folder(id)).await?;
        if let DeletePolicy::MoveToFolder(target) = policy {
            if target != id {
                self.require_existing(actor, Action::Edit, Target::Folder(target)).await?;
            }
        }
        let name = self.folders.get_folder(id).await?.name;
        let outcome = self.folders.delete_folder(id, policy).await?;
        log_activity(
            self.activity.as_ref(),
            ActivityKind::Delete,
            actor,
            &outcome,
            format!(
                "deleted folder '{}' ({} folders, {} documents removed; {} folders, {} documents moved)",
                name,
                outcome.deleted_folders.len(),
                outcome.deleted_documents.len(),
                outcome.moved_folders.len(),
                outcome.moved_documents.len()
            ),
            context,
        );
        Ok(outcome)
    }

    // Documents

    /// Stores the upload and creates the document with it as version 1.
    pub async fn upload_document(
        &self,
        actor: Uuid,
        new: NewDocument,
        file_name: &str,
        bytes: &[u8],
        context: Option<RequestContext>,
    ) -> AppResult<(Document, DocumentVersion)> {
        self.engine.require(actor, Action::Create, Target::NewDocument).await?;
        if let Some(folder) = new.folder_id {
            self.require_existing(actor, Action::View, Target::Folder(folder)).await?;
        }
        let stored = self.store_upload(file_name, bytes).await?;

        let created = self.documents.create_document(actor, new, &stored).await;
        let (document, version) = self.discard_on_error(created, &stored).await?;

        log_activity(self.activity.as_ref(), ActivityKind::Create, actor, &document, format!("uploaded '{}'", document.name), context);
        Ok((document, version))
    }

    pub async fn upload_version(
        &self,
        actor: Uuid,
        document_id: Uuid,
        file_name: &str,
        bytes: &[u8],
        note: &str,
        context: Option<RequestContext>,
    ) -> AppResult<DocumentVersion> {
        self.engine.require(actor, Action::Edit, Target::Document(document_id)).await?;
        let stored = self.store_upload(file_name, bytes).await?;

        let created = self.documents.create_version(document_id, &stored, actor, note).await;
        let version = self.discard_on_error(created, &stored).await?;

        log_activity(
            self.activity.as_ref(),
            ActivityKind::NewVersion,
            actor,
            &version,
            format!("version {} uploaded", version.version_number),
            context,
        );
        Ok(version)
    }

    pub async fn get_document(&self, actor: Uuid, id: Uuid) -> AppResult<Document> {
        self.engine.require(actor, Action::View, Target::Document(id)).await?;
        self.documents.get_document(id).await
    }

    pub async fn list_versions(&self, actor: Uuid, id: Uuid) -> AppResult<Vec<DocumentVersion>> {
        self.engine.require(actor, Action::View, Target::Document(id)).await?;
        self.documents.list_versions(id).await
    }

    pub async fn update_document(
        &self,
        actor: Uuid,
        id: Uuid,
        update: DocumentUpdate,
        context: Option<RequestContext>,
    ) -> AppResult<Document> {
        self.engine.require(actor, Action::Edit, Target::Document(id)).await?;
        if let Some(Some(folder)) = update.folder_id {
            self.require_existing(actor, Action::View, Target::Folder(folder)).await?;
        }
        let document = self.documents.update_document(id, update).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Edit, actor, &document, format!("updated '{}'", document.name), context);
        Ok(document)
    }

    /// Soft delete: hidden from listings, still addressable.
    pub async fn delete_document(&self, actor: Uuid, id: Uuid, context: Option<RequestContext>) -> AppResult<Document> {
        self.engine.require(actor, Action::Delete, Target::Document(id)).await?;
        let document = self.documents.soft_delete(id).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Delete, actor, &document, format!("deleted '{}'", document.name), context);
        Ok(document)
    }

    /// Hard delete including versions and stored files.
    pub async fn purge_document(&self, actor: Uuid, id: Uuid, context: Option<RequestContext>) -> AppResult<Document> {
        self.engine.require(actor, Action::Delete, Target::Document(id)).await?;
        let document = self.documents.hard_delete(id).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Delete, actor, &document, format!("purged '{}'", document.name), context);
        Ok(document)
    }

    /// Current file, or a specific version of it.
    pub async fn download(
        &self,
        actor: Uuid,
        document_id: Uuid,
        version_id: Option<Uuid>,
        context: Option<RequestContext>,
    ) -> AppResult<Download> {
        self.engine.require(actor, Action::Download, Target::Document(document_id)).await?;
        let document = self.documents.get_document(document_id).await?;

        let (handle, file_name, details) = match version_id {
            Some(version_id) => {
                let version = self.documents.get_version(version_id).await?;
                if version.document_id != document_id {
                    return Err(AppError::validation("version belongs to a different document"));
                }
                let details = format!("downloaded '{}' v{}", document.name, version.version_number);
                (version.file_handle, version.file_name, details)
            }
            None => {
                let handle = document
                    .file_handle
                    .clone()
                    .ok_or_else(|| AppError::not_found(format!("document {document_id} has no file")))?;
                let file_name = document.file_name.clone().unwrap_or_else(|| document.name.clone());
                (handle, file_name, format!("downloaded '{}'", document.name))
            }
        };

        let bytes = self.files.get(&handle).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Download, actor, &document, details, context);

        Ok(Download {
            content_type: document.content_type.clone(),
            file_name,
            bytes,
        })
    }

    // Comments

    pub async fn comment(
        &self,
        actor: Uuid,
        document_id: Uuid,
        version_id: Option<Uuid>,
        body: &str,
        context: Option<RequestContext>,
    ) -> AppResult<Comment> {
        self.engine.require(actor, Action::Comment, Target::Document(document_id)).await?;
        let comment = self.comments.add(document_id, version_id, actor, body).await?;
        log_activity(self.activity.as_ref(), ActivityKind::Comment, actor, &comment, "comment added", context);
        Ok(comment)
    }

    pub async fn list_comments(&self, actor: Uuid, document_id: Uuid) -> AppResult<Vec<Comment>> {
        self.engine.require(actor, Action::View, Target::Document(document_id)).await?;
        self.comments.list(document_id).await
    }

    // Sharing

    pub async fn share(
        &self,
        actor: Uuid,
        document_id: Uuid,
        to_user: Uuid,
        level: ShareLevel,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        context: Option<RequestContext>,
    ) -> AppResult<DocumentShare> {
        self.sharing.share(document_id, actor, to_user, level, expires_at, context).await
    }

    pub async fn revoke_share(
        &self,
        actor: Uuid,
        document_id: Uuid,
        user_id: Uuid,
        context: Option<RequestContext>,
    ) -> AppResult<u64> {
        self.sharing.revoke_all(actor, document_id, user_id, context).await
    }

    // Reading

    pub async fn browse(&self, actor: Uuid, folder_id: Option<Uuid>) -> AppResult<Listing> {
        self.catalog.browse(Some(actor), folder_id).await
    }

    pub async fn search(&self, actor: Uuid, query: &str, context: Option<RequestContext>) -> AppResult<Vec<Document>> {
        let results = self.catalog.search(Some(actor), query).await?;
        let event = ActivityEvent::new(Some(actor), ActivityKind::Search, format!("search '{}' ({} hits)", query.trim(), results.len()))
            .with_context(context);
        self.activity.record(event);
        Ok(results)
    }

    // Helpers

    /// `require` for a second object named by the caller's input: a missing
    /// object there is a validation error, not a lookup failure.
    async fn require_existing(&self, actor: Uuid, action: Action, target: Target) -> AppResult<()> {
        match self.engine.require(actor, action, target).await {
            Err(err) if err.is_not_found() => Err(AppError::validation(format!("{target} does not exist"))),
            other => other,
        }
    }

    async fn store_upload(&self, file_name: &str, bytes: &[u8]) -> AppResult<StoredFile> {
        validate_upload(file_name, bytes.len() as u64, self.max_upload_bytes)?;
        self.files.put(file_name.trim(), bytes).await
    }

    async fn discard_on_error<T>(&self, result: AppResult<T>, stored: &StoredFile) -> AppResult<T> {
        if result.is_err() {
            if let Err(err) = self.files.remove(&stored.handle).await {
                tracing::warn!(handle = %stored.handle, "failed to discard upload: {}", err);
            }
        }
        result
    }
}
