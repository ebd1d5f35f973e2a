//! Mission phase machine: research runs until its task pool is exhausted,
//! then the mission enters synthesis and the next queued mission is
//! activated. Explicit activation pauses whatever was running.

use db::models::{
    activity::ActivityLog,
    mission::{Mission, MissionPhase},
};
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MissionControlError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Mission not found")]
    NotFound,
    #[error("Mission has already completed")]
    AlreadyCompleted,
}

#[derive(Debug)]
pub struct CompletionCheck {
    pub mission: Mission,
    pub advanced: bool,
    pub activated: Option<Mission>,
}

/// Run after every task completion: refresh the mission's completed count
/// and, when the pool is exhausted, advance research to synthesis. The
/// conditional phase update fires at most once even under concurrent
/// completion checks; the winner also activates one queued successor.
pub async fn on_task_completed(
    pool: &SqlitePool,
    mission_id: Uuid,
) -> Result<CompletionCheck, sqlx::Error> {
    let mission = Mission::recount_completed(pool, mission_id).await?;

    if mission.phase != MissionPhase::Research
        || mission.completed_tasks < mission.total_tasks
    {
        return Ok(CompletionCheck {
            mission,
            advanced: false,
            activated: None,
        });
    }

    if !Mission::advance_to_synthesis(pool, mission_id).await? {
        // Another completion check got there first.
        let mission = Mission::find_by_id(pool, mission_id)
            .await?
            .unwrap_or(mission);
        return Ok(CompletionCheck {
            mission,
            advanced: false,
            activated: None,
        });
    }

    ActivityLog::append(
        pool,
        Some(mission_id),
        None,
        "mission_synthesis",
        Some(json!({ "completed_tasks": mission.completed_tasks })),
    )
    .await?;
    info!(mission_id = %mission_id, "mission task pool exhausted, entering synthesis");

    let mut activated = None;
    if let Some(next) = Mission::find_first_queued(pool).await? {
        if Mission::begin_research(pool, next.id).await? {
            ActivityLog::append(pool, Some(next.id), None, "mission_activated", None).await?;
            info!(mission_id = %next.id, "queued mission activated");
            activated = Mission::find_by_id(pool, next.id).await?;
        }
    }

    let mission = Mission::find_by_id(pool, mission_id)
        .await?
        .unwrap_or(mission);
    Ok(CompletionCheck {
        mission,
        advanced: true,
        activated,
    })
}

/// Explicit activation request: pause the currently active mission when it
/// is a different one, then move the target into research.
pub async fn activate(pool: &SqlitePool, mission_id: Uuid) -> Result<Mission, MissionControlError> {
    let target = Mission::find_by_id(pool, mission_id)
        .await?
        .ok_or(MissionControlError::NotFound)?;
    if target.phase == MissionPhase::Completed {
        return Err(MissionControlError::AlreadyCompleted);
    }

    if let Some(active) = Mission::find_active(pool).await? {
        if active.id != target.id && Mission::pause(pool, active.id).await? {
            ActivityLog::append(pool, Some(active.id), None, "mission_paused", None).await?;
            info!(mission_id = %active.id, "mission paused");
        }
    }

    Mission::begin_research(pool, target.id).await?;
    ActivityLog::append(pool, Some(target.id), None, "mission_activated", None).await?;
    info!(mission_id = %target.id, "mission activated");

    Mission::find_by_id(pool, target.id)
        .await?
        .ok_or(MissionControlError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{seed_mission_with_tasks, setup_test_pool};
    use db::models::task::Task;
    use uuid::Uuid;

    async fn complete_all_tasks(pool: &SqlitePool, mission_id: Uuid, agent_id: Uuid) {
        loop {
            let loads = Task::queue_loads(pool, mission_id).await.expect("loads");
            let Some(load) = loads.first() else { break };
            let tasks = Task::find_available_in_queue(pool, mission_id, &load.queue_id)
                .await
                .expect("queue listing");
            for task in tasks {
                Task::claim(pool, task.id, agent_id)
                    .await
                    .expect("claim failed")
                    .expect("claim lost");
                Task::complete(pool, task.id, agent_id)
                    .await
                    .expect("complete failed");
            }
        }
    }

    #[tokio::test]
    async fn exhausted_mission_enters_synthesis_and_activates_successor() {
        let pool = setup_test_pool().await;
        let (mission_id, _) = seed_mission_with_tasks(&pool, MissionPhase::Research, &[2]).await;
        let (queued_id, _) = seed_mission_with_tasks(&pool, MissionPhase::Queued, &[1]).await;
        let agent_id = crate::services::test_support::register_agent(&pool, mission_id, 0).await;

        complete_all_tasks(&pool, mission_id, agent_id).await;

        let check = on_task_completed(&pool, mission_id)
            .await
            .expect("completion check failed");
        assert!(check.advanced);
        assert_eq!(check.mission.phase, MissionPhase::Synthesis);
        let activated = check.activated.expect("expected successor activation");
        assert_eq!(activated.id, queued_id);
        assert_eq!(activated.phase, MissionPhase::Research);

        // A second check is a no-op.
        let again = on_task_completed(&pool, mission_id)
            .await
            .expect("second check failed");
        assert!(!again.advanced);
        assert!(again.activated.is_none());
        assert_eq!(again.mission.phase, MissionPhase::Synthesis);
    }

    #[tokio::test]
    async fn explicit_activation_pauses_previous_mission() {
        let pool = setup_test_pool().await;
        let (running_id, _) = seed_mission_with_tasks(&pool, MissionPhase::Research, &[1]).await;
        let (queued_id, _) = seed_mission_with_tasks(&pool, MissionPhase::Queued, &[1]).await;

        let activated = activate(&pool, queued_id).await.expect("activation failed");
        assert_eq!(activated.phase, MissionPhase::Research);

        let paused = Mission::find_by_id(&pool, running_id)
            .await
            .expect("lookup failed")
            .expect("mission missing");
        assert_eq!(paused.phase, MissionPhase::Paused);

        // And back again.
        let reactivated = activate(&pool, running_id).await.expect("reactivation failed");
        assert_eq!(reactivated.phase, MissionPhase::Research);
        let requeued = Mission::find_by_id(&pool, queued_id)
            .await
            .expect("lookup failed")
            .expect("mission missing");
        assert_eq!(requeued.phase, MissionPhase::Paused);
    }
}
