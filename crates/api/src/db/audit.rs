//! Audit trail repository
//!
//! Rows are insert-only; there is no update or delete path.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

use nightwatch_core::models::AuditEvent;
use nightwatch_core::types::UserId;

use crate::error::ApiError;

/// Who performed the mutation and from where
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub actor: Option<UserId>,
    pub ip: String,
    pub user_agent: String,
}

impl AuditContext {
    /// Context for mutations performed by background jobs
    pub fn system() -> Self {
        Self {
            actor: None,
            ip: String::new(),
            user_agent: "system".to_string(),
        }
    }
}

/// A not-yet-written audit event
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub entity_type: String,
    pub action: String,
    pub entity_id: Option<String>,
    pub target_user_id: Option<UserId>,
    pub details: Value,
}

impl NewAuditEvent {
    pub fn new(event_type: &str, entity_type: &str, action: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            action: action.to_string(),
            entity_id: None,
            target_user_id: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn target(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Write an audit event
///
/// Takes any executor so callers can write inside their own transaction.
pub async fn record<'e, E>(
    executor: E,
    ctx: &AuditContext,
    event: NewAuditEvent,
) -> Result<(), ApiError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_events (
            id, event_type, actor_user_id, target_user_id,
            entity_type, entity_id, action, details, ip, user_agent, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&event.event_type)
    .bind(ctx.actor)
    .bind(event.target_user_id)
    .bind(&event.entity_type)
    .bind(&event.entity_id)
    .bind(&event.action)
    .bind(&event.details)
    .bind(&ctx.ip)
    .bind(&ctx.user_agent)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}

/// Filters for the audit listing
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub actor: Option<Uuid>,
    pub target: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// List audit events, newest first
pub async fn list_events(
    pool: &SqlitePool,
    filter: &AuditFilter,
) -> Result<Vec<AuditEvent>, ApiError> {
    let mut builder =
        sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM audit_events WHERE 1 = 1");

    if let Some(event_type) = &filter.event_type {
        builder.push(" AND event_type = ").push_bind(event_type);
    }
    if let Some(actor) = filter.actor {
        builder.push(" AND actor_user_id = ").push_bind(actor);
    }
    if let Some(target) = filter.target {
        builder.push(" AND target_user_id = ").push_bind(target);
    }
    if let Some(from) = filter.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND created_at <= ").push_bind(to);
    }

    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit.clamp(1, 500))
        .push(" OFFSET ")
        .push_bind(filter.offset.max(0));

    let events = builder.build_query_as::<AuditEvent>().fetch_all(pool).await?;
    Ok(events)
}

/// Per-event-type counts for the audit dashboard
pub async fn type_stats(pool: &SqlitePool) -> Result<Vec<(String, i64)>, ApiError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT event_type, COUNT(*) AS count
        FROM audit_events
        GROUP BY event_type
        ORDER BY count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
