use std::str::FromStr;

use db::models::{
    agent::{Agent, CreateAgent},
    finding::{CitationRecord, Confidence, CreateFinding, Finding},
    mission::{CreateMission, Mission, MissionPhase},
    task::{CreateTask, Task},
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

pub(crate) async fn setup_test_pool() -> SqlitePool {
    // One private in-memory db per test; the single pooled connection keeps
    // it alive for the test's lifetime.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("invalid sqlite config")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    sqlx::migrate!("../db/migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

/// Seed one mission with `queue_sizes[i]` tasks in queue `q{i}`. Returns the
/// mission id and the task ids in creation order.
pub(crate) async fn seed_mission_with_tasks(
    pool: &SqlitePool,
    phase: MissionPhase,
    queue_sizes: &[usize],
) -> (Uuid, Vec<Uuid>) {
    let mission_id = Uuid::new_v4();
    Mission::create(
        pool,
        &CreateMission {
            name: format!("Mission {}", mission_id),
            config: None,
        },
        mission_id,
        phase,
    )
    .await
    .expect("failed to create mission");

    let mut task_ids = Vec::new();
    for (qi, count) in queue_sizes.iter().enumerate() {
        let queue_id = format!("q{qi}");
        for j in 0..*count {
            let task_id = Uuid::new_v4();
            Task::create(
                pool,
                &CreateTask {
                    mission_id,
                    division_id: "div-1".into(),
                    division_name: "Division One".into(),
                    queue_id: queue_id.clone(),
                    queue_name: format!("Queue {queue_id}"),
                    description: format!("{queue_id} task {j}"),
                    search_terms: None,
                },
                task_id,
            )
            .await
            .expect("failed to create task");
            task_ids.push(task_id);
        }
    }

    Mission::update_totals(pool, mission_id, task_ids.len() as i64)
        .await
        .expect("failed to set totals");

    (mission_id, task_ids)
}

pub(crate) async fn register_agent(pool: &SqlitePool, mission_id: Uuid, max_tasks: i64) -> Uuid {
    let agent_id = Uuid::new_v4();
    Agent::create(
        pool,
        mission_id,
        &CreateAgent {
            role: None,
            max_tasks: Some(max_tasks),
        },
        agent_id,
    )
    .await
    .expect("failed to create agent");
    agent_id
}

/// Seed a pending finding for `author`, backed by its own already-completed
/// task so it never adds available work to the mission.
pub(crate) async fn seed_finding(pool: &SqlitePool, mission_id: Uuid, author: Uuid) -> Uuid {
    let task_id = Uuid::new_v4();
    Task::create(
        pool,
        &CreateTask {
            mission_id,
            division_id: "div-1".into(),
            division_name: "Division One".into(),
            queue_id: "archive".into(),
            queue_name: "Archive".into(),
            description: "archived task".into(),
            search_terms: None,
        },
        task_id,
    )
    .await
    .expect("failed to create backing task");
    Task::claim(pool, task_id, author)
        .await
        .expect("claim failed")
        .expect("claim lost");
    Task::complete(pool, task_id, author)
        .await
        .expect("complete failed")
        .expect("task was not assigned");

    let finding_id = Uuid::new_v4();
    Finding::create(
        pool,
        &CreateFinding {
            agent_id: author,
            task_id,
            mission_id,
            division_id: Some("div-1".into()),
            queue_id: Some("archive".into()),
            title: format!("Finding {}", finding_id),
            summary: "summary".into(),
            citations: vec![CitationRecord {
                title: "A source".into(),
                authors: None,
                journal: None,
                year: Some(2020),
                identifier: None,
                source_type: None,
                sample_size: None,
                key_claim: None,
            }],
            confidence: Confidence::Medium,
            contradictions: vec![],
            gaps: vec![],
            papers_analyzed: 1,
        },
        finding_id,
    )
    .await
    .expect("failed to create finding");
    finding_id
}
