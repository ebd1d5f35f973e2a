use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    agent::Agent,
    mission::Mission,
    task::{QueueLoad, Task, TaskStatusCounts},
};
use serde::Serialize;
use services::services::{mission_control, seeder};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct MissionWithProgress {
    #[serde(flatten)]
    pub mission: Mission,
    pub tasks: TaskStatusCounts,
    pub active_agents: i64,
}

#[derive(Debug, Serialize)]
pub struct MissionDetail {
    #[serde(flatten)]
    pub mission: Mission,
    pub tasks: TaskStatusCounts,
    pub active_agents: i64,
    pub queue_loads: Vec<QueueLoad>,
}

pub async fn create_mission(
    State(state): State<AppState>,
    Json(payload): Json<seeder::MissionSeed>,
) -> Result<ResponseJson<ApiResponse<Mission>>, ApiError> {
    let mission = seeder::seed_mission(&state.db().pool, payload).await?;
    Ok(ResponseJson(ApiResponse::success(mission)))
}

pub async fn list_missions(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<MissionWithProgress>>>, ApiError> {
    let missions = Mission::find_all(&state.db().pool).await?;
    let mut out = Vec::with_capacity(missions.len());
    for mission in missions {
        let tasks = Task::status_counts(&state.db().pool, mission.id).await?;
        let active_agents = Agent::count_active_by_mission(&state.db().pool, mission.id).await?;
        out.push(MissionWithProgress {
            mission,
            tasks,
            active_agents,
        });
    }
    Ok(ResponseJson(ApiResponse::success(out)))
}

pub async fn get_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<MissionDetail>>, ApiError> {
    let mission = Mission::find_by_id(&state.db().pool, mission_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Mission not found".into()))?;
    let tasks = Task::status_counts(&state.db().pool, mission.id).await?;
    let active_agents = Agent::count_active_by_mission(&state.db().pool, mission.id).await?;
    let queue_loads = Task::queue_loads(&state.db().pool, mission.id).await?;
    Ok(ResponseJson(ApiResponse::success(MissionDetail {
        mission,
        tasks,
        active_agents,
        queue_loads,
    })))
}

pub async fn activate_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Mission>>, ApiError> {
    let mission = mission_control::activate(&state.db().pool, mission_id).await?;
    Ok(ResponseJson(ApiResponse::success(mission)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/missions", get(list_missions).post(create_mission))
        .route("/missions/{mission_id}", get(get_mission))
        .route("/missions/{mission_id}/activate", post(activate_mission))
}
