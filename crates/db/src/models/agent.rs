use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

use super::task::Task;

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Disconnected,
    Completed,
}

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "agent_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Worker,
    Qc,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Worker
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub status: AgentStatus,
    pub role: AgentRole,
    pub current_task_id: Option<Uuid>,
    pub mission_id: Uuid,
    pub division_id: Option<String>,
    pub queue_id: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub tasks_completed: i64,
    pub papers_analyzed: i64,
    pub quality_score: f64,
    pub qc_passes: i64,
    pub qc_fails: i64,
    pub flagged: bool,
    pub max_tasks: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAgent {
    pub role: Option<AgentRole>,
    pub max_tasks: Option<i64>,
}

impl Agent {
    pub async fn create(
        pool: &SqlitePool,
        mission_id: Uuid,
        data: &CreateAgent,
        agent_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let role = data.role.clone().unwrap_or_default();
        let max_tasks = data.max_tasks.unwrap_or(0).max(0);

        sqlx::query_as::<_, Agent>(
            r#"
            INSERT INTO agents (id, mission_id, role, max_tasks)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(mission_id)
        .bind(role)
        .bind(max_tasks)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(r#"SELECT * FROM agents WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_mission(
        pool: &SqlitePool,
        mission_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"SELECT * FROM agents WHERE mission_id = ?1 ORDER BY registered_at ASC"#,
        )
        .bind(mission_id)
        .fetch_all(pool)
        .await
    }

    pub async fn touch_heartbeat(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET last_heartbeat = datetime('now', 'subsec')
            WHERE id = ?1 AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Attach the agent to a freshly claimed task, inheriting the task's
    /// division and queue so load counts follow the agent.
    pub async fn begin_task(
        pool: &SqlitePool,
        id: Uuid,
        task: &Task,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET current_task_id = ?2,
                division_id = ?3,
                queue_id = ?4,
                last_heartbeat = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(task.id)
        .bind(&task.division_id)
        .bind(&task.queue_id)
        .fetch_one(pool)
        .await
    }

    pub async fn finish_task(
        pool: &SqlitePool,
        id: Uuid,
        papers_analyzed: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET current_task_id = NULL,
                tasks_completed = tasks_completed + 1,
                papers_analyzed = papers_analyzed + ?2,
                last_heartbeat = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(papers_analyzed.max(0))
        .fetch_one(pool)
        .await
    }

    /// A recorded verdict counts toward the reviewer's completed work.
    pub async fn record_review(pool: &SqlitePool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET tasks_completed = tasks_completed + 1,
                last_heartbeat = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn store_quality(
        pool: &SqlitePool,
        id: Uuid,
        score: f64,
        passes: i64,
        fails: i64,
        flagged: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET quality_score = ?2,
                qc_passes = ?3,
                qc_fails = ?4,
                flagged = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(score)
        .bind(passes)
        .bind(fails)
        .bind(flagged)
        .fetch_one(pool)
        .await
    }

    pub async fn mark_disconnected(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'disconnected',
                disconnected_at = datetime('now', 'subsec'),
                current_task_id = NULL
            WHERE id = ?1 AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal state once a task budget is spent.
    pub async fn retire(pool: &SqlitePool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET status = 'completed',
                current_task_id = NULL
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn count_active_by_mission(
        pool: &SqlitePool,
        mission_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM agents WHERE mission_id = ?1 AND status = 'active'"#,
        )
        .bind(mission_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    pub async fn find_stale(
        pool: &SqlitePool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE status = 'active' AND last_heartbeat < ?1
            ORDER BY last_heartbeat ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mission::MissionPhase;
    use crate::models::test_utils::{create_test_mission, setup_test_pool};
    use chrono::Duration;

    #[tokio::test]
    async fn stale_query_respects_cutoff() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;

        let fresh = Agent::create(&pool, mission_id, &CreateAgent::default(), Uuid::new_v4())
            .await
            .expect("create failed");
        let silent = Agent::create(&pool, mission_id, &CreateAgent::default(), Uuid::new_v4())
            .await
            .expect("create failed");

        sqlx::query(
            "UPDATE agents SET last_heartbeat = datetime('now', '-10 minutes') WHERE id = ?1",
        )
        .bind(silent.id)
        .execute(&pool)
        .await
        .expect("backdate failed");

        let cutoff = Utc::now() - Duration::minutes(5);
        let stale = Agent::find_stale(&pool, cutoff).await.expect("query failed");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, silent.id);
        assert_ne!(stale[0].id, fresh.id);
    }

    #[tokio::test]
    async fn disconnect_is_one_way_and_idempotent() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;
        let agent = Agent::create(&pool, mission_id, &CreateAgent::default(), Uuid::new_v4())
            .await
            .expect("create failed");

        assert!(Agent::mark_disconnected(&pool, agent.id)
            .await
            .expect("disconnect failed"));
        assert!(!Agent::mark_disconnected(&pool, agent.id)
            .await
            .expect("second disconnect failed"));

        let reloaded = Agent::find_by_id(&pool, agent.id)
            .await
            .expect("lookup failed")
            .expect("agent missing");
        assert_eq!(reloaded.status, AgentStatus::Disconnected);
        assert!(reloaded.disconnected_at.is_some());

        // A disconnected agent no longer heartbeats.
        assert!(!Agent::touch_heartbeat(&pool, agent.id)
            .await
            .expect("heartbeat failed"));
    }
}
