use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use milagro_application::ActivityLogRepository;
use milagro_core::{AppError, AppResult};
use milagro_domain::{
    ActivityAction, ActivityLogEntry, ActivityLogView, AdminId, NewActivityLogEntry, Role,
};

/// PostgreSQL-backed repository for the append-only `user_activity_logs` table.
#[derive(Clone)]
pub struct PostgresActivityLogRepository {
    pool: PgPool,
}

impl PostgresActivityLogRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ActivityLogRow {
    id: Uuid,
    user_id: Uuid,
    action: String,
    details: Value,
    created_at: DateTime<Utc>,
    actor_name: Option<String>,
    actor_role: Option<String>,
}

impl TryFrom<ActivityLogRow> for ActivityLogView {
    type Error = AppError;

    fn try_from(row: ActivityLogRow) -> Result<Self, Self::Error> {
        let action = row.action.parse::<ActivityAction>().map_err(|error| {
            AppError::Internal(format!("activity row has invalid action: {error}"))
        })?;
        let actor_role = row
            .actor_role
            .as_deref()
            .map(str::parse::<Role>)
            .transpose()
            .map_err(|error| AppError::Internal(format!("activity row has invalid role: {error}")))?;

        Ok(Self {
            entry: ActivityLogEntry {
                id: row.id.to_string(),
                actor_user_id: AdminId::new(row.user_id.to_string())?,
                action,
                details: row.details,
                created_at: row.created_at,
            },
            actor_name: row.actor_name,
            actor_role,
        })
    }
}

#[async_trait]
impl ActivityLogRepository for PostgresActivityLogRepository {
    async fn append_entry(&self, entry: NewActivityLogEntry) -> AppResult<ActivityLogEntry> {
        let user_id = Uuid::parse_str(entry.actor_user_id.as_str()).map_err(|error| {
            AppError::Validation(format!(
                "invalid activity actor '{}': {error}",
                entry.actor_user_id
            ))
        })?;

        let (id, created_at) = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO user_activity_logs (user_id, action, details)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(user_id)
        .bind(entry.action.as_str())
        .bind(&entry.details)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to append activity entry: {error}")))?;

        Ok(ActivityLogEntry {
            id: id.to_string(),
            actor_user_id: entry.actor_user_id,
            action: entry.action,
            details: entry.details,
            created_at,
        })
    }

    async fn list_recent(&self, limit: usize) -> AppResult<Vec<ActivityLogView>> {
        let capped_limit = i64::try_from(limit.clamp(1, 200)).unwrap_or(200);

        let rows = sqlx::query_as::<_, ActivityLogRow>(
            r#"
            SELECT
                logs.id,
                logs.user_id,
                logs.action,
                logs.details,
                logs.created_at,
                profiles.name AS actor_name,
                profiles.role AS actor_role
            FROM user_activity_logs logs
            LEFT JOIN profiles ON profiles.id = logs.user_id
            ORDER BY logs.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(capped_limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list activity entries: {error}")))?;

        rows.into_iter().map(ActivityLogView::try_from).collect()
    }
}
