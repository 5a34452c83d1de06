use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

use crate::db::row_parsers::parse_uuid;
use crate::errors::{AppError, AppResult};

/// Kinds of user activity recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Create,
    Edit,
    Delete,
    Download,
    Share,
    Comment,
    PermissionChange,
    NewVersion,
    Search,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Create => "create",
            ActivityKind::Edit => "edit",
            ActivityKind::Delete => "delete",
            ActivityKind::Download => "download",
            ActivityKind::Share => "share",
            ActivityKind::Comment => "comment",
            ActivityKind::PermissionChange => "permission_change",
            ActivityKind::NewVersion => "new_version",
            ActivityKind::Search => "search",
        }
    }
}

/// Request context for activity logging (client IP, User-Agent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract context from request headers, preferring the first X-Forwarded-For hop.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: ActivityKind,
    pub object_type: Option<String>,
    pub object_id: Option<Uuid>,
    pub details: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(actor_id: Option<Uuid>, action: ActivityKind, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            object_type: None,
            object_id: None,
            details: details.into(),
            severity: Severity::default(),
            context: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn about<T: Loggable>(mut self, entity: &T) -> Self {
        self.object_type = Some(T::entity_type().to_string());
        self.object_id = Some(entity.subject_id());
        self.severity = entity.severity_for_action(self.action);
        self
    }

    pub fn with_context(mut self, context: Option<RequestContext>) -> Self {
        self.context = context;
        self
    }
}

/// Append-only activity sink. Recording is fire-and-forget: failures never
/// reach the caller.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

pub type EventBus = broadcast::Sender<ActivityEvent>;

pub fn init_event_bus(capacity: usize) -> (EventBus, broadcast::Receiver<ActivityEvent>) {
    broadcast::channel(capacity)
}

impl ActivitySink for EventBus {
    fn record(&self, event: ActivityEvent) {
        // No subscriber is not an error for the caller
        if self.send(event).is_err() {
            tracing::debug!("activity event dropped: no listener");
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Helper to log activity about any `Loggable` entity.
pub fn log_activity<T: Loggable>(
    sink: &dyn ActivitySink,
    action: ActivityKind,
    actor_id: Uuid,
    entity: &T,
    details: impl Into<String>,
    context: Option<RequestContext>,
) {
    let event = ActivityEvent::new(Some(actor_id), action, details)
        .about(entity)
        .with_context(context);
    sink.record(event);
}

/// Persists events from the bus until every sender is gone.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<ActivityEvent>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = persist_event(&pool, &event).await {
                    tracing::error!(event_id = %event.id, "failed to save activity log: {}", err);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged, events lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("activity listener stopped");
}

/// SHA-256 over the previous hash (if any) followed by the payload.
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends one event to `activity_log`, chaining it to the previous row's hash.
pub async fn persist_event(pool: &SqlitePool, event: &ActivityEvent) -> AppResult<()> {
    let payload = serde_json::to_string(event)
        .map_err(|e| AppError::internal(format!("failed to serialize activity event {}: {}", event.id, e)))?;

    let mut tx = pool.begin().await?;

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM activity_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;

    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        r#"
        INSERT INTO activity_log (id, actor_id, action, object_type, object_id, details, severity, ip, occurred_at, payload, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(event.action.as_str())
    .bind(event.object_type.as_deref())
    .bind(event.object_id.map(|id| id.to_string()))
    .bind(&event.details)
    .bind(event.severity.as_str())
    .bind(event.context.as_ref().and_then(|c| c.ip.as_deref()))
    .bind(event.occurred_at.to_rfc3339())
    .bind(&payload)
    .bind(prev_hash.as_deref())
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Recomputes the hash chain; returns the id of the first row that does not match.
pub async fn verify_chain(pool: &SqlitePool) -> AppResult<Option<Uuid>> {
    let rows: Vec<(String, String, Option<String>, String)> =
        sqlx::query_as("SELECT id, payload, prev_hash, hash FROM activity_log ORDER BY seq ASC")
            .fetch_all(pool)
            .await?;

    let mut expected_prev: Option<String> = None;
    for (id, payload, prev_hash, hash) in rows {
        if prev_hash != expected_prev || chain_hash(prev_hash.as_deref(), &payload) != hash {
            return parse_uuid(&id).map(Some);
        }
        expected_prev = Some(hash);
    }
    Ok(None)
}
