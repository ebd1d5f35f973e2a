use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    dispatch::DispatchError, mission_control::MissionControlError, seeder::SeedError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Database(e) => ApiError::Database(e),
            DispatchError::NoActiveMission => {
                ApiError::Conflict("No mission is currently active".into())
            }
            DispatchError::MissionNotFound => ApiError::NotFound("Mission not found".into()),
            DispatchError::AgentNotFound => ApiError::NotFound("Agent not found".into()),
            DispatchError::FindingNotFound => ApiError::NotFound("Finding not found".into()),
            DispatchError::Validation(msg) => ApiError::BadRequest(msg),
            DispatchError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<MissionControlError> for ApiError {
    fn from(err: MissionControlError) -> Self {
        match err {
            MissionControlError::Database(e) => ApiError::Database(e),
            MissionControlError::NotFound => ApiError::NotFound("Mission not found".into()),
            MissionControlError::AlreadyCompleted => {
                ApiError::Conflict("Mission has already completed".into())
            }
        }
    }
}

impl From<SeedError> for ApiError {
    fn from(err: SeedError) -> Self {
        match err {
            SeedError::Database(e) => ApiError::Database(e),
            SeedError::Invalid(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };

        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
