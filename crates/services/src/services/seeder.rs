//! Mission seeding: a mission arrives as a division -> queue -> task tree
//! and is written out in bulk, with queue identity denormalized onto every
//! task row for the load balancer.

use db::models::{
    activity::ActivityLog,
    mission::{CreateMission, Mission, MissionPhase},
    task::{CreateTask, Task},
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Invalid mission seed: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct MissionSeed {
    pub name: String,
    pub config: Option<serde_json::Value>,
    pub divisions: Vec<DivisionSeed>,
}

#[derive(Debug, Deserialize)]
pub struct DivisionSeed {
    pub id: String,
    pub name: String,
    pub queues: Vec<QueueSeed>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSeed {
    pub id: String,
    pub name: String,
    pub tasks: Vec<TaskSeed>,
}

#[derive(Debug, Deserialize)]
pub struct TaskSeed {
    pub description: String,
    pub search_terms: Option<Vec<String>>,
}

/// Create a mission and its full task pool. The first mission on an idle
/// coordinator starts researching immediately; later ones queue up behind
/// the active mission.
pub async fn seed_mission(pool: &SqlitePool, seed: MissionSeed) -> Result<Mission, SeedError> {
    if seed.name.trim().is_empty() {
        return Err(SeedError::Invalid("mission needs a name".to_string()));
    }
    let task_count: usize = seed
        .divisions
        .iter()
        .flat_map(|d| d.queues.iter())
        .map(|q| q.tasks.len())
        .sum();
    if task_count == 0 {
        return Err(SeedError::Invalid(
            "mission seed contains no tasks".to_string(),
        ));
    }

    let phase = if Mission::find_active(pool).await?.is_some() {
        MissionPhase::Queued
    } else {
        MissionPhase::Research
    };

    let mission = Mission::create(
        pool,
        &CreateMission {
            name: seed.name,
            config: seed.config,
        },
        Uuid::new_v4(),
        phase,
    )
    .await?;

    let mut total = 0i64;
    for division in &seed.divisions {
        for queue in &division.queues {
            for task in &queue.tasks {
                Task::create(
                    pool,
                    &CreateTask {
                        mission_id: mission.id,
                        division_id: division.id.clone(),
                        division_name: division.name.clone(),
                        queue_id: queue.id.clone(),
                        queue_name: queue.name.clone(),
                        description: task.description.clone(),
                        search_terms: task.search_terms.clone(),
                    },
                    Uuid::new_v4(),
                )
                .await?;
                total += 1;
            }
        }
    }

    let mission = Mission::update_totals(pool, mission.id, total).await?;
    ActivityLog::append(
        pool,
        Some(mission.id),
        None,
        "mission_seeded",
        Some(json!({ "total_tasks": total, "phase": mission.phase })),
    )
    .await?;
    info!(mission_id = %mission.id, total_tasks = total, "mission seeded");

    Ok(mission)
}
