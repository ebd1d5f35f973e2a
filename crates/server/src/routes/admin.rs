use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::post,
};
use chrono::Duration;
use db::models::finding::Finding;
use serde::{Deserialize, Serialize};
use services::services::reclaim;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const DEFAULT_TIMEOUT_SECS: i64 = 1800;

#[derive(Debug, Deserialize)]
pub struct ReclaimQuery {
    pub timeout_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReclaimResult {
    pub reclaimed: u64,
    pub timeout_secs: i64,
}

/// Manual stale-agent sweep. Agents doing open-ended research can be
/// legitimately silent for a long time, so this only ever runs when asked.
pub async fn reclaim_stale(
    State(state): State<AppState>,
    Query(query): Query<ReclaimQuery>,
) -> Result<ResponseJson<ApiResponse<ReclaimResult>>, ApiError> {
    let timeout_secs = query.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs <= 0 {
        return Err(ApiError::BadRequest(
            "timeout_secs must be positive".into(),
        ));
    }
    let reclaimed =
        reclaim::reclaim_stale(&state.db().pool, Duration::seconds(timeout_secs)).await?;
    Ok(ResponseJson(ApiResponse::success(ReclaimResult {
        reclaimed,
        timeout_secs,
    })))
}

/// Push a finding back into the review queue.
pub async fn reset_review(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Finding>>, ApiError> {
    Finding::find_by_id(&state.db().pool, finding_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Finding not found".into()))?;
    let finding = Finding::reset_review(&state.db().pool, finding_id).await?;
    Ok(ResponseJson(ApiResponse::success(finding)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/reclaim", post(reclaim_stale))
        .route("/admin/findings/{finding_id}/reset-review", post(reset_review))
}
