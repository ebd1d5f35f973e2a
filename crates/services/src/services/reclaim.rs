//! Stale-agent reclamation. Agents doing open-ended research can be silent
//! for a long time, so this never runs on its own: it is invoked manually
//! or on an explicitly configured cadence.

use chrono::{Duration, Utc};
use db::models::{activity::ActivityLog, agent::Agent, task::Task};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

/// Disconnect every active agent whose last heartbeat predates the timeout
/// and put any task it was holding back on the board. Returns the number of
/// agents reclaimed. Safe to call at any cadence.
pub async fn reclaim_stale(pool: &SqlitePool, timeout: Duration) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - timeout;
    let stale = Agent::find_stale(pool, cutoff).await?;

    let mut reclaimed = 0u64;
    for agent in stale {
        if !Agent::mark_disconnected(pool, agent.id).await? {
            continue;
        }
        let mut released_task = None;
        if let Some(task_id) = agent.current_task_id {
            if Task::release(pool, task_id, agent.id).await? {
                released_task = Some(task_id);
            }
        }
        ActivityLog::append(
            pool,
            Some(agent.mission_id),
            Some(agent.id),
            "agent_reclaimed",
            Some(json!({
                "timeout_secs": timeout.num_seconds(),
                "released_task_id": released_task,
            })),
        )
        .await?;
        info!(
            agent_id = %agent.id,
            task_released = released_task.is_some(),
            "reclaimed stale agent"
        );
        reclaimed += 1;
    }

    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{
        register_agent, seed_mission_with_tasks, setup_test_pool,
    };
    use db::models::agent::AgentStatus;
    use db::models::mission::MissionPhase;
    use db::models::task::{Task, TaskStatus};

    #[tokio::test]
    async fn reclaims_silent_agents_and_releases_their_tasks() {
        let pool = setup_test_pool().await;
        let (mission_id, task_ids) =
            seed_mission_with_tasks(&pool, MissionPhase::Research, &[2]).await;

        let silent = register_agent(&pool, mission_id, 0).await;
        let fresh = register_agent(&pool, mission_id, 0).await;

        let held = Task::claim(&pool, task_ids[0], silent)
            .await
            .expect("claim failed")
            .expect("claim lost");
        sqlx::query("UPDATE agents SET current_task_id = ?2 WHERE id = ?1")
            .bind(silent)
            .bind(held.id)
            .execute(&pool)
            .await
            .expect("task link failed");
        sqlx::query(
            "UPDATE agents SET last_heartbeat = datetime('now', '-30 minutes') WHERE id = ?1",
        )
        .bind(silent)
        .execute(&pool)
        .await
        .expect("backdate failed");

        let reclaimed = reclaim_stale(&pool, Duration::minutes(10))
            .await
            .expect("reclaim failed");
        assert_eq!(reclaimed, 1);

        let silent_agent = db::models::agent::Agent::find_by_id(&pool, silent)
            .await
            .expect("lookup failed")
            .expect("agent missing");
        assert_eq!(silent_agent.status, AgentStatus::Disconnected);
        assert!(silent_agent.current_task_id.is_none());

        let released = Task::find_by_id(&pool, held.id)
            .await
            .expect("lookup failed")
            .expect("task missing");
        assert_eq!(released.status, TaskStatus::Available);
        assert!(released.assigned_agent_id.is_none());

        let fresh_agent = db::models::agent::Agent::find_by_id(&pool, fresh)
            .await
            .expect("lookup failed")
            .expect("agent missing");
        assert_eq!(fresh_agent.status, AgentStatus::Active);

        // Idempotent: nothing left to reclaim.
        let again = reclaim_stale(&pool, Duration::minutes(10))
            .await
            .expect("second reclaim failed");
        assert_eq!(again, 0);
    }
}
