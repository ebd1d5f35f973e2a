use axum::{
    Router,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::AppState;

pub mod activity;
pub mod admin;
pub mod agents;
pub mod findings;
pub mod health;
pub mod missions;

pub fn router(state: AppState) -> IntoMakeService<Router> {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(agents::router())
        .merge(missions::router())
        .merge(findings::router())
        .merge(activity::router())
        .merge(admin::router())
        .layer(CorsLayer::permissive())
        .with_state(state);

    Router::new().nest("/api", base_routes).into_make_service()
}
