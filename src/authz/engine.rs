use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::evaluator::{Action, DefaultPolicyEvaluator, Decision, Facts, PolicyEvaluator};
use crate::db::row_parsers::parse_datetime;
use crate::errors::{AppError, AppResult};
use crate::models::permission::{ObjectKind, ObjectRef, PermissionKind};
use crate::models::share::ShareLevel;
use crate::permission_store::{capabilities_of, list_grants_with};
use crate::users::load_principal;
use crate::utils::utc_now;

/// What a decision is about: an existing object, or the creation of a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Document(Uuid),
    Folder(Uuid),
    NewDocument,
    NewFolder,
}

impl Target {
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Target::Document(_) | Target::NewDocument => ObjectKind::Document,
            Target::Folder(_) | Target::NewFolder => ObjectKind::Folder,
        }
    }

    pub fn object_ref(&self) -> Option<ObjectRef> {
        match self {
            Target::Document(id) => Some(ObjectRef::document(*id)),
            Target::Folder(id) => Some(ObjectRef::folder(*id)),
            Target::NewDocument | Target::NewFolder => None,
        }
    }
}

impl From<ObjectRef> for Target {
    fn from(object: ObjectRef) -> Self {
        match object.kind {
            ObjectKind::Document => Target::Document(object.id),
            ObjectKind::Folder => Target::Folder(object.id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object_ref() {
            Some(object) => write!(f, "{object}"),
            None => write!(f, "{}:new", self.object_kind()),
        }
    }
}

/// Answers "may user U do action A on target T?".
///
/// Decisions never mutate state. The engine loads the facts (principal,
/// owner, live grants, capabilities) in one connection and hands them to a
/// [`PolicyEvaluator`].
#[derive(Clone)]
pub struct AuthorizationEngine {
    pool: SqlitePool,
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEngine").finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_evaluator(pool, Arc::new(DefaultPolicyEvaluator::new()))
    }

    pub fn with_evaluator(pool: SqlitePool, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self { pool, evaluator }
    }

    /// Full decision including the matched rule.
    ///
    /// Errors are reserved for malformed input: `Create` paired with an
    /// existing object (or any other action with a new one) is a validation
    /// error, and unknown users or objects are not found.
    pub async fn decide(&self, user: Option<Uuid>, action: Action, target: Target) -> AppResult<Decision> {
        let mut conn = self.pool.acquire().await?;
        self.decide_with(&mut conn, user, action, target).await
    }

    async fn decide_with(
        &self,
        conn: &mut SqliteConnection,
        user: Option<Uuid>,
        action: Action,
        target: Target,
    ) -> AppResult<Decision> {
        let creating = matches!(target, Target::NewDocument | Target::NewFolder);
        if creating != (action == Action::Create) {
            return Err(AppError::validation(format!("action {action} does not apply to {target}")));
        }
        let facts = load_facts(conn, user, target).await?;
        Ok(self.evaluator.evaluate(action, &facts))
    }

    /// Boolean form of [`decide`](Self::decide). Lookup failures deny.
    pub async fn can(&self, user: Option<Uuid>, action: Action, target: Target) -> bool {
        match self.decide(user, action, target).await {
            Ok(decision) => decision.allowed,
            Err(err) => {
                tracing::warn!(user_id = ?user, %action, %target, "authorization check failed closed: {}", err);
                false
            }
        }
    }

    /// Like [`can`](Self::can) but turns a denial into `AppError::Forbidden`.
    /// Malformed input and missing objects keep their own error.
    pub async fn require(&self, user: Uuid, action: Action, target: Target) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        self.require_with(&mut conn, user, action, target).await
    }

    /// [`require`](Self::require) on a caller's connection, so the facts are
    /// read inside the caller's transaction.
    pub(crate) async fn require_with(
        &self,
        conn: &mut SqliteConnection,
        user: Uuid,
        action: Action,
        target: Target,
    ) -> AppResult<()> {
        let decision = self.decide_with(conn, Some(user), action, target).await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("{action} on {target} not permitted")))
        }
    }

    /// Grants `user` holds on `object`, minus any backed by an expired share.
    pub async fn live_grants(&self, user: Uuid, object: ObjectRef) -> AppResult<HashSet<PermissionKind>> {
        let mut conn = self.pool.acquire().await?;
        live_grants_with(&mut conn, user, object).await
    }
}

async fn load_facts(conn: &mut SqliteConnection, user: Option<Uuid>, target: Target) -> AppResult<Facts> {
    let principal = match user {
        Some(user_id) => Some(
            load_principal(conn, user_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?,
        ),
        None => None,
    };

    let mut facts = Facts::new(principal, target.object_kind());

    if let Some(object) = target.object_ref() {
        facts.owner_id = Some(owner_of(conn, object).await?);
    }

    // Rules for these never reach the grant or capability steps
    let Some(principal) = facts.principal.as_ref() else {
        return Ok(facts);
    };
    if principal.is_superuser || principal.is_admin() {
        return Ok(facts);
    }
    let user_id = principal.user_id;

    match target {
        Target::Document(_) | Target::Folder(_) => {
            if let Some(object) = target.object_ref() {
                facts.grants = live_grants_with(conn, user_id, object).await?;
            }
        }
        Target::NewFolder => {
            facts.capabilities = capabilities_of(conn, user_id).await?;
        }
        Target::NewDocument => {}
    }

    Ok(facts)
}

async fn owner_of(conn: &mut SqliteConnection, object: ObjectRef) -> AppResult<Uuid> {
    let sql = match object.kind {
        ObjectKind::Document => "SELECT owner_id FROM documents WHERE id = ?",
        ObjectKind::Folder => "SELECT owner_id FROM folders WHERE id = ?",
    };
    let owner: Option<String> = sqlx::query_scalar(sql)
        .bind(object.id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let owner = owner.ok_or_else(|| AppError::not_found(format!("{object}")))?;
    crate::db::row_parsers::parse_uuid(&owner)
}

/// Active grants with the kind named by an expired share removed, whatever
/// the stored flags say. A deactivated share row no longer backs any grant
/// and is ignored.
pub(crate) async fn live_grants_with(
    conn: &mut SqliteConnection,
    user: Uuid,
    object: ObjectRef,
) -> AppResult<HashSet<PermissionKind>> {
    let mut grants: HashSet<PermissionKind> = list_grants_with(conn, user, object).await?.into_iter().collect();

    if object.kind == ObjectKind::Document && !grants.is_empty() {
        let share: Option<(String, Option<String>, bool)> = sqlx::query_as(
            "SELECT permission, expires_at, active FROM document_shares WHERE document_id = ? AND granted_to = ?",
        )
        .bind(object.id.to_string())
        .bind(user.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((permission, Some(expires_at), true)) = share {
            if parse_datetime(&expires_at)? < utc_now() {
                let level: ShareLevel = permission.parse()?;
                grants.remove(&PermissionKind::Document(level.permission()));
                tracing::debug!(%user, %object, level = %level, "ignoring expired share");
            }
        }
    }

    Ok(grants)
}
