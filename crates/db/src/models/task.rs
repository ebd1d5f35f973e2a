use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Available,
    Assigned,
    Completed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub mission_id: Uuid,
    pub division_id: String,
    pub division_name: String,
    pub queue_id: String,
    pub queue_name: String,
    pub description: String,
    pub search_terms: Option<String>, // JSON array of strings
    pub status: TaskStatus,
    pub assigned_agent_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub mission_id: Uuid,
    pub division_id: String,
    pub division_name: String,
    pub queue_id: String,
    pub queue_name: String,
    pub description: String,
    pub search_terms: Option<Vec<String>>,
}

/// Aggregate row for the load balancer: one queue that still has available
/// work, with the number of active agents currently attached to it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueLoad {
    pub queue_id: String,
    pub available: i64,
    pub active_agents: i64,
}

#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct TaskStatusCounts {
    pub available: i64,
    pub assigned: i64,
    pub completed: i64,
}

impl Task {
    fn serialize_json_array(arr: &Option<Vec<String>>) -> Option<String> {
        arr.as_ref().map(|v| serde_json::to_string(v).unwrap())
    }

    pub fn search_terms_list(&self) -> Vec<String> {
        self.search_terms
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateTask,
        task_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let search_terms_json = Self::serialize_json_array(&data.search_terms);

        sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, mission_id, division_id, division_name,
                queue_id, queue_name, description, search_terms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(data.mission_id)
        .bind(&data.division_id)
        .bind(&data.division_name)
        .bind(&data.queue_id)
        .bind(&data.queue_name)
        .bind(&data.description)
        .bind(search_terms_json)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(r#"SELECT * FROM tasks WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_available_in_queue(
        pool: &SqlitePool,
        mission_id: Uuid,
        queue_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE mission_id = ?1 AND queue_id = ?2 AND status = 'available'
            ORDER BY created_at ASC
            "#,
        )
        .bind(mission_id)
        .bind(queue_id)
        .fetch_all(pool)
        .await
    }

    /// Queues that still have available work, each with its current
    /// active-agent head count. Input for the least-loaded-queue pick.
    pub async fn queue_loads(
        pool: &SqlitePool,
        mission_id: Uuid,
    ) -> Result<Vec<QueueLoad>, sqlx::Error> {
        sqlx::query_as::<_, QueueLoad>(
            r#"
            SELECT
                t.queue_id AS queue_id,
                COUNT(t.id) AS available,
                (
                    SELECT COUNT(*) FROM agents a
                    WHERE a.mission_id = t.mission_id
                      AND a.queue_id = t.queue_id
                      AND a.status = 'active'
                ) AS active_agents
            FROM tasks t
            WHERE t.mission_id = ?1 AND t.status = 'available'
            GROUP BY t.queue_id
            ORDER BY t.queue_id ASC
            "#,
        )
        .bind(mission_id)
        .fetch_all(pool)
        .await
    }

    /// Atomic claim: flips `available` to `assigned` in one conditional
    /// update. Returns `None` when another agent won the race, in which case
    /// the caller re-selects.
    pub async fn claim(
        pool: &SqlitePool,
        id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'assigned',
                assigned_agent_id = ?2,
                assigned_at = datetime('now', 'subsec')
            WHERE id = ?1 AND status = 'available'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(agent_id)
        .fetch_optional(pool)
        .await
    }

    /// Put an assigned task back on the board. Conditional on the releasing
    /// agent still being the holder, so a reclaimed-and-reassigned task is
    /// never yanked from its new holder.
    pub async fn release(
        pool: &SqlitePool,
        id: Uuid,
        holder_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'available',
                assigned_agent_id = NULL,
                assigned_at = NULL
            WHERE id = ?1 AND status = 'assigned' AND assigned_agent_id = ?2
            "#,
        )
        .bind(id)
        .bind(holder_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completion is likewise conditional on the holder; once completed the
    /// task is immutable.
    pub async fn complete(
        pool: &SqlitePool,
        id: Uuid,
        holder_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'completed',
                completed_at = datetime('now', 'subsec')
            WHERE id = ?1 AND status = 'assigned' AND assigned_agent_id = ?2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(holder_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn status_counts(
        pool: &SqlitePool,
        mission_id: Uuid,
    ) -> Result<TaskStatusCounts, sqlx::Error> {
        sqlx::query_as::<_, TaskStatusCounts>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END), 0) AS available,
                COALESCE(SUM(CASE WHEN status = 'assigned' THEN 1 ELSE 0 END), 0) AS assigned,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed
            FROM tasks
            WHERE mission_id = ?1
            "#,
        )
        .bind(mission_id)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::{
        create_test_agent, create_test_mission, seed_test_task, setup_test_pool,
    };
    use crate::models::mission::MissionPhase;

    #[tokio::test]
    async fn claim_is_exclusive() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;
        let task_id = seed_test_task(&pool, mission_id, "alpha").await;
        let first = create_test_agent(&pool, mission_id, 0).await;
        let second = create_test_agent(&pool, mission_id, 0).await;

        let won = Task::claim(&pool, task_id, first)
            .await
            .expect("claim failed");
        assert!(won.is_some());
        assert_eq!(won.unwrap().assigned_agent_id, Some(first));

        let lost = Task::claim(&pool, task_id, second)
            .await
            .expect("second claim failed");
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn release_returns_task_to_board() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;
        let task_id = seed_test_task(&pool, mission_id, "alpha").await;
        let agent_id = create_test_agent(&pool, mission_id, 0).await;

        Task::claim(&pool, task_id, agent_id)
            .await
            .expect("claim failed")
            .expect("claim lost unexpectedly");
        assert!(Task::release(&pool, task_id, agent_id)
            .await
            .expect("release failed"));

        let task = Task::find_by_id(&pool, task_id)
            .await
            .expect("lookup failed")
            .expect("task missing");
        assert_eq!(task.status, TaskStatus::Available);
        assert!(task.assigned_agent_id.is_none());
        assert!(task.assigned_at.is_none());

        // Releasing an available task is a no-op.
        assert!(!Task::release(&pool, task_id, agent_id)
            .await
            .expect("release failed"));
    }

    #[tokio::test]
    async fn status_counts_always_sum_to_total() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 3, MissionPhase::Research).await;
        let a = seed_test_task(&pool, mission_id, "alpha").await;
        let b = seed_test_task(&pool, mission_id, "alpha").await;
        let _c = seed_test_task(&pool, mission_id, "beta").await;
        let agent_id = create_test_agent(&pool, mission_id, 0).await;

        let counts = Task::status_counts(&pool, mission_id)
            .await
            .expect("counts failed");
        assert_eq!((counts.available, counts.assigned, counts.completed), (3, 0, 0));

        Task::claim(&pool, a, agent_id)
            .await
            .expect("claim failed")
            .expect("claim lost");
        Task::claim(&pool, b, agent_id)
            .await
            .expect("claim failed")
            .expect("claim lost");
        Task::complete(&pool, b, agent_id)
            .await
            .expect("complete failed");

        let counts = Task::status_counts(&pool, mission_id)
            .await
            .expect("counts failed");
        assert_eq!((counts.available, counts.assigned, counts.completed), (1, 1, 1));
        assert_eq!(counts.available + counts.assigned + counts.completed, 3);
    }

    #[tokio::test]
    async fn queue_loads_reflect_active_agents() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 4, MissionPhase::Research).await;
        seed_test_task(&pool, mission_id, "alpha").await;
        seed_test_task(&pool, mission_id, "alpha").await;
        seed_test_task(&pool, mission_id, "beta").await;

        let agent_id = create_test_agent(&pool, mission_id, 0).await;
        sqlx::query("UPDATE agents SET queue_id = 'alpha' WHERE id = ?1")
            .bind(agent_id)
            .execute(&pool)
            .await
            .expect("queue update failed");

        let loads = Task::queue_loads(&pool, mission_id)
            .await
            .expect("loads failed");
        assert_eq!(loads.len(), 2);
        let alpha = loads.iter().find(|l| l.queue_id == "alpha").unwrap();
        let beta = loads.iter().find(|l| l.queue_id == "beta").unwrap();
        assert_eq!((alpha.available, alpha.active_agents), (2, 1));
        assert_eq!((beta.available, beta.active_agents), (1, 0));
    }
}
