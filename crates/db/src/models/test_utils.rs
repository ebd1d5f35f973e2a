use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use super::agent::{Agent, CreateAgent};
use super::finding::{CitationRecord, Confidence, CreateFinding, Finding};
use super::mission::{CreateMission, Mission, MissionPhase};
use super::task::{CreateTask, Task};

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

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub(crate) async fn create_test_mission(
    pool: &SqlitePool,
    total_tasks: i64,
    phase: MissionPhase,
) -> Uuid {
    let mission_id = Uuid::new_v4();
    let data = CreateMission {
        name: format!("Test Mission {}", mission_id),
        config: None,
    };
    Mission::create(pool, &data, mission_id, phase)
        .await
        .expect("failed to create test mission");
    Mission::update_totals(pool, mission_id, total_tasks)
        .await
        .expect("failed to set mission totals");
    mission_id
}

pub(crate) async fn seed_test_task(pool: &SqlitePool, mission_id: Uuid, queue_id: &str) -> Uuid {
    let task_id = Uuid::new_v4();
    let data = CreateTask {
        mission_id,
        division_id: "div-1".into(),
        division_name: "Division One".into(),
        queue_id: queue_id.into(),
        queue_name: format!("Queue {}", queue_id),
        description: format!("survey {}", queue_id),
        search_terms: Some(vec![queue_id.into()]),
    };
    Task::create(pool, &data, task_id)
        .await
        .expect("failed to create test task");
    task_id
}

pub(crate) async fn create_test_agent(
    pool: &SqlitePool,
    mission_id: Uuid,
    max_tasks: i64,
) -> Uuid {
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
    .expect("failed to create test agent");
    agent_id
}

pub(crate) async fn seed_test_finding(
    pool: &SqlitePool,
    mission_id: Uuid,
    agent_id: Uuid,
) -> Uuid {
    let task_id = seed_test_task(pool, mission_id, "qc-seed").await;
    let finding_id = Uuid::new_v4();
    let data = CreateFinding {
        agent_id,
        task_id,
        mission_id,
        division_id: Some("div-1".into()),
        queue_id: Some("qc-seed".into()),
        title: format!("Finding {}", finding_id),
        summary: "summary".into(),
        citations: vec![CitationRecord {
            title: "A source".into(),
            authors: Some("Doe, J.".into()),
            journal: Some("Journal of Tests".into()),
            year: Some(2021),
            identifier: Some("10.1000/test".into()),
            source_type: Some("rct".into()),
            sample_size: Some(120),
            key_claim: Some("effect observed".into()),
        }],
        confidence: Confidence::Medium,
        contradictions: vec![],
        gaps: vec![],
        papers_analyzed: 3,
    };
    Finding::create(pool, &data, finding_id)
        .await
        .expect("failed to create test finding");
    finding_id
}
