use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::finding::{Finding, QcStatus};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct FindingQuery {
    pub mission_id: Uuid,
    pub qc_status: Option<QcStatus>,
}

pub async fn list_findings(
    State(state): State<AppState>,
    Query(query): Query<FindingQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Finding>>>, ApiError> {
    let findings =
        Finding::find_by_mission(&state.db().pool, query.mission_id, query.qc_status).await?;
    Ok(ResponseJson(ApiResponse::success(findings)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/findings", get(list_findings))
}
