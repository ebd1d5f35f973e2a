use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "mission_phase", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MissionPhase {
    Queued,
    Research,
    Synthesis,
    Paused,
    Completed,
}

impl std::fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissionPhase::Queued => write!(f, "queued"),
            MissionPhase::Research => write!(f, "research"),
            MissionPhase::Synthesis => write!(f, "synthesis"),
            MissionPhase::Paused => write!(f, "paused"),
            MissionPhase::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub name: String,
    pub phase: MissionPhase,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub config: Option<String>, // JSON object
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMission {
    pub name: String,
    pub config: Option<serde_json::Value>,
}

impl Mission {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateMission,
        mission_id: Uuid,
        phase: MissionPhase,
    ) -> Result<Self, sqlx::Error> {
        let config_json = data.config.as_ref().map(|v| v.to_string());

        sqlx::query_as::<_, Mission>(
            r#"
            INSERT INTO missions (id, name, phase, config, started_at)
            VALUES (
                ?1, ?2, ?3, ?4,
                CASE WHEN ?3 = 'research' THEN datetime('now', 'subsec') END
            )
            RETURNING *
            "#,
        )
        .bind(mission_id)
        .bind(&data.name)
        .bind(phase)
        .bind(config_json)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Mission>(r#"SELECT * FROM missions WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Mission>(r#"SELECT * FROM missions ORDER BY created_at ASC"#)
            .fetch_all(pool)
            .await
    }

    /// The mission new registrations attach to: the most recently started
    /// mission that has not run to completion. Computed, never stored.
    pub async fn find_active(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Mission>(
            r#"
            SELECT * FROM missions
            WHERE phase != 'completed' AND started_at IS NOT NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn find_first_queued(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Mission>(
            r#"
            SELECT * FROM missions
            WHERE phase = 'queued'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await
    }

    /// Refresh the stored completed-task counter from the task table in a
    /// single statement.
    pub async fn recount_completed(pool: &SqlitePool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Mission>(
            r#"
            UPDATE missions
            SET completed_tasks = (
                    SELECT COUNT(*) FROM tasks
                    WHERE mission_id = ?1 AND status = 'completed'
                ),
                updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Conditional research -> synthesis transition. Returns false when the
    /// mission was not in `research`, so concurrent completion checks fire
    /// the transition exactly once.
    pub async fn advance_to_synthesis(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET phase = 'synthesis', updated_at = datetime('now', 'subsec')
            WHERE id = ?1 AND phase = 'research'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a mission into active research. Re-stamping `started_at` on a
    /// mission already in `research` makes it the active one again.
    pub async fn begin_research(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET phase = 'research',
                started_at = datetime('now', 'subsec'),
                updated_at = datetime('now', 'subsec')
            WHERE id = ?1 AND phase IN ('queued', 'paused', 'research')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn pause(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET phase = 'paused', updated_at = datetime('now', 'subsec')
            WHERE id = ?1 AND phase = 'research'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_totals(
        pool: &SqlitePool,
        id: Uuid,
        total_tasks: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Mission>(
            r#"
            UPDATE missions
            SET total_tasks = ?2, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(total_tasks)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::{create_test_mission, setup_test_pool};

    #[tokio::test]
    async fn active_mission_is_latest_started_non_completed() {
        let pool = setup_test_pool().await;

        let first = create_test_mission(&pool, 4, MissionPhase::Research).await;
        sqlx::query("UPDATE missions SET started_at = datetime('now', '-1 minutes') WHERE id = ?1")
            .bind(first)
            .execute(&pool)
            .await
            .expect("backdate failed");

        // Second mission starts later and should win the active query.
        let second = create_test_mission(&pool, 4, MissionPhase::Queued).await;
        assert!(Mission::begin_research(&pool, second)
            .await
            .expect("begin research failed"));

        let active = Mission::find_active(&pool)
            .await
            .expect("active lookup failed")
            .expect("expected an active mission");
        assert_eq!(active.id, second);

        // Queued missions without a start timestamp never count as active.
        let queued = create_test_mission(&pool, 2, MissionPhase::Queued).await;
        let active = Mission::find_active(&pool)
            .await
            .expect("active lookup failed")
            .expect("expected an active mission");
        assert_ne!(active.id, queued);
    }

    #[tokio::test]
    async fn synthesis_transition_fires_once() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;

        assert!(Mission::advance_to_synthesis(&pool, mission_id)
            .await
            .expect("transition failed"));
        assert!(!Mission::advance_to_synthesis(&pool, mission_id)
            .await
            .expect("second transition check failed"));

        let mission = Mission::find_by_id(&pool, mission_id)
            .await
            .expect("lookup failed")
            .expect("mission missing");
        assert_eq!(mission.phase, MissionPhase::Synthesis);
    }
}
