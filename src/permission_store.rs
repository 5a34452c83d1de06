//! Durable `(subject, object, kind)` grants.
//!
//! Rows are keyed by object *type* as well as id, so a folder `browse` and a
//! document `browse` never collide. Grants are upserted and revocation only
//! clears the `active` flag, which keeps exactly one row per kind.
//!
//! The `*_with` functions take a bare connection so they can run inside a
//! caller's transaction; [`SqlitePermissionStore`] wraps them for one-shot use.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::permission::{Capability, ObjectRef, PermissionKind};
use crate::utils::utc_now;

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn grant(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<()>;
    async fn revoke(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<()>;
    async fn has(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<bool>;
    async fn list_grants(&self, subject: Uuid, object: ObjectRef) -> AppResult<BTreeSet<PermissionKind>>;
}

#[derive(Debug, Clone)]
pub struct SqlitePermissionStore {
    pool: SqlitePool,
}

impl SqlitePermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    async fn grant(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        grant_with(&mut tx, subject, object, kind).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn revoke(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        revoke_with(&mut tx, subject, object, kind).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn has(&self, subject: Uuid, object: ObjectRef, kind: PermissionKind) -> AppResult<bool> {
        let mut conn = self.pool.acquire().await?;
        has_with(&mut conn, subject, object, kind).await
    }

    async fn list_grants(&self, subject: Uuid, object: ObjectRef) -> AppResult<BTreeSet<PermissionKind>> {
        let mut conn = self.pool.acquire().await?;
        list_grants_with(&mut conn, subject, object).await
    }
}

fn ensure_kind_matches(object: ObjectRef, kind: PermissionKind) -> AppResult<()> {
    if kind.object_kind() != object.kind {
        return Err(AppError::validation(format!(
            "permission {kind} cannot be applied to a {}",
            object.kind
        )));
    }
    Ok(())
}

pub async fn grant_with(
    conn: &mut SqliteConnection,
    subject: Uuid,
    object: ObjectRef,
    kind: PermissionKind,
) -> AppResult<()> {
    ensure_kind_matches(object, kind)?;

    sqlx::query(
        r#"
        INSERT INTO permission_grants (subject_id, object_type, object_id, kind, active, granted_at)
        VALUES (?, ?, ?, ?, 1, ?)
        ON CONFLICT (subject_id, object_type, object_id, kind) DO UPDATE SET
            granted_at = CASE WHEN permission_grants.active = 0 THEN excluded.granted_at ELSE permission_grants.granted_at END,
            active = 1
        "#,
    )
    .bind(subject.to_string())
    .bind(object.kind.as_str())
    .bind(object.id.to_string())
    .bind(kind.codename())
    .bind(utc_now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn revoke_with(
    conn: &mut SqliteConnection,
    subject: Uuid,
    object: ObjectRef,
    kind: PermissionKind,
) -> AppResult<()> {
    ensure_kind_matches(object, kind)?;

    sqlx::query(
        "UPDATE permission_grants SET active = 0 WHERE subject_id = ? AND object_type = ? AND object_id = ? AND kind = ?",
    )
    .bind(subject.to_string())
    .bind(object.kind.as_str())
    .bind(object.id.to_string())
    .bind(kind.codename())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn has_with(
    conn: &mut SqliteConnection,
    subject: Uuid,
    object: ObjectRef,
    kind: PermissionKind,
) -> AppResult<bool> {
    ensure_kind_matches(object, kind)?;

    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM permission_grants WHERE subject_id = ? AND object_type = ? AND object_id = ? AND kind = ? AND active = 1",
    )
    .bind(subject.to_string())
    .bind(object.kind.as_str())
    .bind(object.id.to_string())
    .bind(kind.codename())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(found.is_some())
}

pub async fn list_grants_with(
    conn: &mut SqliteConnection,
    subject: Uuid,
    object: ObjectRef,
) -> AppResult<BTreeSet<PermissionKind>> {
    let rows = sqlx::query(
        "SELECT kind FROM permission_grants WHERE subject_id = ? AND object_type = ? AND object_id = ? AND active = 1",
    )
    .bind(subject.to_string())
    .bind(object.kind.as_str())
    .bind(object.id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut kinds = BTreeSet::new();
    for row in rows {
        let codename: String = row.try_get("kind")?;
        match PermissionKind::parse(object.kind, &codename) {
            Ok(kind) => {
                kinds.insert(kind);
            }
            Err(_) => {
                tracing::warn!(%subject, %object, codename, "ignoring unknown stored permission kind");
            }
        }
    }
    Ok(kinds)
}

/// Deactivates every kind `subject` holds on `object`; returns how many were active.
pub async fn revoke_all_with(conn: &mut SqliteConnection, subject: Uuid, object: ObjectRef) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE permission_grants SET active = 0 WHERE subject_id = ? AND object_type = ? AND object_id = ? AND active = 1",
    )
    .bind(subject.to_string())
    .bind(object.kind.as_str())
    .bind(object.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Removes every grant row on `object`, for objects that are being deleted.
pub async fn purge_object(conn: &mut SqliteConnection, object: ObjectRef) -> AppResult<()> {
    sqlx::query("DELETE FROM permission_grants WHERE object_type = ? AND object_id = ?")
        .bind(object.kind.as_str())
        .bind(object.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn grant_capability(conn: &mut SqliteConnection, user_id: Uuid, capability: Capability) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO user_capabilities (user_id, capability, granted_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(capability.as_str())
        .bind(utc_now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn revoke_capability(conn: &mut SqliteConnection, user_id: Uuid, capability: Capability) -> AppResult<()> {
    sqlx::query("DELETE FROM user_capabilities WHERE user_id = ? AND capability = ?")
        .bind(user_id.to_string())
        .bind(capability.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn capabilities_of(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<HashSet<Capability>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT capability FROM user_capabilities WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    Ok(names.iter().filter_map(|name| name.parse().ok()).collect())
}
