use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::agent::{Agent, CreateAgent};
use serde::Deserialize;
use services::services::dispatch::{
    RegisterOutcome, SubmissionOutcome, SubmitFinding, VerdictOutcome,
};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct RegisterAgent {
    pub mission_id: Option<Uuid>,
    #[serde(flatten)]
    pub agent: CreateAgent,
}

#[derive(Debug, Deserialize)]
pub struct SubmitVerdict {
    pub verdict: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub mission_id: Uuid,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterAgent>,
) -> Result<ResponseJson<ApiResponse<RegisterOutcome>>, ApiError> {
    let outcome = state
        .dispatcher()
        .register(payload.mission_id, &payload.agent)
        .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Agent>>, ApiError> {
    let agent = Agent::find_by_id(&state.db().pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Agent not found".into()))?;
    Ok(ResponseJson(ApiResponse::success(agent)))
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Agent>>>, ApiError> {
    let agents = Agent::find_by_mission(&state.db().pool, query.mission_id).await?;
    Ok(ResponseJson(ApiResponse::success(agents)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.dispatcher().heartbeat(agent_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.dispatcher().disconnect(agent_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn submit_finding(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<SubmitFinding>,
) -> Result<ResponseJson<ApiResponse<SubmissionOutcome>>, ApiError> {
    let outcome = state.dispatcher().submit_finding(agent_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn submit_verdict(
    State(state): State<AppState>,
    Path((agent_id, finding_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SubmitVerdict>,
) -> Result<ResponseJson<ApiResponse<VerdictOutcome>>, ApiError> {
    let outcome = state
        .dispatcher()
        .submit_verdict(agent_id, finding_id, &payload.verdict, payload.notes)
        .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents/register", post(register))
        .route("/agents", get(list_agents))
        .route("/agents/{agent_id}", get(get_agent))
        .route("/agents/{agent_id}/heartbeat", post(heartbeat))
        .route("/agents/{agent_id}/disconnect", post(disconnect))
        .route("/agents/{agent_id}/findings", post(submit_finding))
        .route("/agents/{agent_id}/verdicts/{finding_id}", post(submit_verdict))
}
