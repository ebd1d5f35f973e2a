use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Append-only record of coordinator decisions, for operators and the
/// dashboard. Never read back by the assignment logic itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub mission_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub action: String,
    pub detail: Option<String>, // JSON object
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub async fn append(
        pool: &SqlitePool,
        mission_id: Option<Uuid>,
        agent_id: Option<Uuid>,
        action: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let detail_json = detail.as_ref().map(|v| v.to_string());

        sqlx::query_as::<_, ActivityLog>(
            r#"
            INSERT INTO activity_log (id, mission_id, agent_id, action, detail)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(mission_id)
        .bind(agent_id)
        .bind(action)
        .bind(detail_json)
        .fetch_one(pool)
        .await
    }

    pub async fn find_recent(
        pool: &SqlitePool,
        mission_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        match mission_id {
            Some(mission_id) => {
                sqlx::query_as::<_, ActivityLog>(
                    r#"
                    SELECT * FROM activity_log
                    WHERE mission_id = ?1
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?2
                    "#,
                )
                .bind(mission_id)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ActivityLog>(
                    r#"
                    SELECT * FROM activity_log
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?1
                    "#,
                )
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
    }
}
