//! Per-user document sharing on top of the permission store.
//!
//! A share hands out exactly one of browse / download / comment / change.
//! Re-sharing replaces whatever the recipient held on the document, and the
//! `document_shares` row records who granted what and until when.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::authz::{Action, AuthorizationEngine, Target};
use crate::db::row_parsers::share_from_row;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, ActivityKind, ActivitySink, RequestContext};
use crate::models::document::Document;
use crate::models::permission::{DocumentPermission, ObjectRef, PermissionKind};
use crate::models::share::{DocumentShare, ShareLevel};
use crate::permission_store::{grant_with, revoke_all_with, revoke_with};
use crate::users::load_principal;
use crate::utils::utc_now;
use crate::versioning::fetch_document;

const SHARE_COLUMNS: &str = "id, document_id, granted_by, granted_to, permission, granted_at, expires_at, active";

async fn fetch_share(conn: &mut SqliteConnection, document_id: Uuid, user_id: Uuid) -> AppResult<Option<DocumentShare>> {
    let sql = format!("SELECT {SHARE_COLUMNS} FROM document_shares WHERE document_id = ? AND granted_to = ?");
    let row = sqlx::query(&sql)
        .bind(document_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(share_from_row).transpose()
}

async fn ensure_user_exists(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    if found.is_none() {
        return Err(AppError::not_found(format!("user {user_id}")));
    }
    Ok(())
}

/// Deactivates an expired share, and the grant it backed, so it stops
/// masking grants made after it.
async fn retire_expired_share(conn: &mut SqliteConnection, document_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let Some(share) = fetch_share(conn, document_id, user_id).await? else {
        return Ok(());
    };
    if share.active && share.is_expired(utc_now()) {
        sqlx::query("UPDATE document_shares SET active = 0 WHERE id = ?")
            .bind(share.id.to_string())
            .execute(&mut *conn)
            .await?;
        let kind = PermissionKind::Document(share.level.permission());
        revoke_with(conn, user_id, ObjectRef::document(document_id), kind).await?;
        tracing::debug!(%document_id, %user_id, level = %share.level, "retired expired share");
    }
    Ok(())
}

#[derive(Clone)]
pub struct SharingService {
    pool: SqlitePool,
    engine: AuthorizationEngine,
    activity: Arc<dyn ActivitySink>,
}

impl SharingService {
    pub fn new(pool: SqlitePool, engine: AuthorizationEngine, activity: Arc<dyn ActivitySink>) -> Self {
        Self { pool, engine, activity }
    }

    /// Shares `document_id` with `to_user` at `level`, replacing anything the
    /// recipient held on the document.
    pub async fn share(
        &self,
        document_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
        level: ShareLevel,
        expires_at: Option<DateTime<Utc>>,
        context: Option<RequestContext>,
    ) -> AppResult<DocumentShare> {
        if from_user == to_user {
            return Err(AppError::validation("cannot share a document with yourself"));
        }
        let now = utc_now();
        if matches!(expires_at, Some(expiry) if expiry <= now) {
            return Err(AppError::validation("share expiry must be in the future"));
        }

        // The first statement writes, so concurrent shares queue on the lock.
        // A denial below drops the transaction and rolls it back.
        let mut tx = self.pool.begin().await?;
        let object = ObjectRef::document(document_id);
        revoke_all_with(&mut tx, to_user, object).await?;
        self.engine
            .require_with(&mut tx, from_user, Action::Share, Target::Document(document_id))
            .await?;

        let document = fetch_document(&mut tx, document_id).await?;
        ensure_user_exists(&mut tx, to_user).await?;

        grant_with(&mut tx, to_user, object, PermissionKind::Document(level.permission())).await?;

        let sql = format!(
            r#"
            INSERT INTO document_shares ({SHARE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT (document_id, granted_to) DO UPDATE SET
                granted_by = excluded.granted_by,
                permission = excluded.permission,
                granted_at = excluded.granted_at,
                expires_at = excluded.expires_at,
                active = 1
            "#
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(document_id.to_string())
            .bind(from_user.to_string())
            .bind(to_user.to_string())
            .bind(level.as_str())
            .bind(now.to_rfc3339())
            .bind(expires_at.map(|e| e.to_rfc3339()))
            .execute(&mut *tx)
            .await?;

        let share = fetch_share(&mut tx, document_id, to_user)
            .await?
            .ok_or_else(|| AppError::internal("share row missing after upsert"))?;

        tx.commit().await?;

        tracing::info!(
            document_id = %document_id,
            from = %from_user,
            to = %to_user,
            level = %level,
            "document shared"
        );
        log_activity(
            self.activity.as_ref(),
            ActivityKind::Share,
            from_user,
            &share,
            format!("shared '{}' with {} as {}", document.name, to_user, level),
            context,
        );
        Ok(share)
    }

    /// Removes every permission `user_id` holds on the document and marks its
    /// share inactive. Requires the actor to be allowed to share.
    pub async fn revoke_all(
        &self,
        actor: Uuid,
        document_id: Uuid,
        user_id: Uuid,
        context: Option<RequestContext>,
    ) -> AppResult<u64> {
        // Decided before the writes: an actor may be revoking their own access
        let mut tx = self.pool.begin().await?;
        self.engine
            .require_with(&mut tx, actor, Action::Share, Target::Document(document_id))
            .await?;
        let object = ObjectRef::document(document_id);
        let revoked = revoke_all_with(&mut tx, user_id, object).await?;
        sqlx::query("UPDATE document_shares SET active = 0 WHERE document_id = ? AND granted_to = ?")
            .bind(document_id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;
        let document = fetch_document(&mut tx, document_id).await?;
        tx.commit().await?;

        tracing::info!(document_id = %document_id, user_id = %user_id, revoked, "document access revoked");
        log_activity(
            self.activity.as_ref(),
            ActivityKind::PermissionChange,
            actor,
            &document,
            format!("revoked all access to '{}' from {}", document.name, user_id),
            context,
        );
        Ok(revoked)
    }

    /// Grants arbitrary document permissions; superusers and admins only.
    /// An empty `kinds` grants browse.
    pub async fn admin_grant(
        &self,
        admin: Uuid,
        target_user: Uuid,
        document_id: Uuid,
        kinds: &[DocumentPermission],
        context: Option<RequestContext>,
    ) -> AppResult<Vec<DocumentPermission>> {
        let kinds: Vec<DocumentPermission> = if kinds.is_empty() {
            vec![DocumentPermission::Browse]
        } else {
            kinds.to_vec()
        };

        let mut tx = self.pool.begin().await?;
        let document = self.admin_preflight(&mut tx, admin, target_user, document_id).await?;
        retire_expired_share(&mut tx, document_id, target_user).await?;
        for kind in &kinds {
            grant_with(&mut tx, target_user, document.object_ref(), PermissionKind::Document(*kind)).await?;
        }
        tx.commit().await?;

        let names: Vec<&str> = kinds.iter().map(|k| k.codename()).collect();
        tracing::info!(document_id = %document_id, user_id = %target_user, kinds = ?names, "permissions granted");
        log_activity(
            self.activity.as_ref(),
            ActivityKind::PermissionChange,
            admin,
            &document,
            format!("granted {} on '{}' to {}", names.join(", "), document.name, target_user),
            context,
        );
        Ok(kinds)
    }

    /// Revokes the given kinds, or every kind when `kinds` is `None`.
    pub async fn admin_revoke(
        &self,
        admin: Uuid,
        target_user: Uuid,
        document_id: Uuid,
        kinds: Option<&[DocumentPermission]>,
        context: Option<RequestContext>,
    ) -> AppResult<Vec<DocumentPermission>> {
        let kinds: Vec<DocumentPermission> = kinds
            .map(|k| k.to_vec())
            .unwrap_or_else(|| DocumentPermission::ALL.to_vec());

        let mut tx = self.pool.begin().await?;
        let document = self.admin_preflight(&mut tx, admin, target_user, document_id).await?;
        for kind in &kinds {
            revoke_with(&mut tx, target_user, document.object_ref(), PermissionKind::Document(*kind)).await?;
        }
        tx.commit().await?;

        let names: Vec<&str> = kinds.iter().map(|k| k.codename()).collect();
        tracing::info!(document_id = %document_id, user_id = %target_user, kinds = ?names, "permissions revoked");
        log_activity(
            self.activity.as_ref(),
            ActivityKind::PermissionChange,
            admin,
            &document,
            format!("revoked {} on '{}' from {}", names.join(", "), document.name, target_user),
            context,
        );
        Ok(kinds)
    }

    pub async fn get_share(&self, document_id: Uuid, user_id: Uuid) -> AppResult<Option<DocumentShare>> {
        let mut conn = self.pool.acquire().await?;
        fetch_share(&mut conn, document_id, user_id).await
    }

    /// Share records on a document, newest first.
    pub async fn list_shares(&self, document_id: Uuid) -> AppResult<Vec<DocumentShare>> {
        let sql = format!("SELECT {SHARE_COLUMNS} FROM document_shares WHERE document_id = ? ORDER BY granted_at DESC");
        let rows = sqlx::query(&sql)
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(share_from_row).collect()
    }

    async fn admin_preflight(
        &self,
        conn: &mut SqliteConnection,
        admin: Uuid,
        target_user: Uuid,
        document_id: Uuid,
    ) -> AppResult<Document> {
        let principal = load_principal(conn, admin)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {admin}")))?;
        if !(principal.is_superuser || principal.is_admin()) {
            return Err(AppError::forbidden("only administrators can manage document permissions"));
        }
        ensure_user_exists(conn, target_user).await?;
        fetch_document(conn, document_id).await
    }
}
