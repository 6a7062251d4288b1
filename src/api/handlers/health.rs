use crate::AppState;
use crate::services::cleanup::CleanupSnapshot;
use crate::services::engine::HEALTH_CHECK_TIMEOUT;
use crate::utils::validation::ValidationRules;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub engine_status: String,
    pub cleanup: CleanupSnapshot,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.pipeline.engine();
    let reachable = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, engine.health_check())
        .await
        .unwrap_or(false);
    let engine_status = if reachable { "connected" } else { "unreachable" };

    Json(HealthResponse {
        status: "ok".to_string(),
        engine: engine.name().to_string(),
        engine_status: engine_status.to_string(),
        cleanup: state.pipeline.cleanup().stats(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/system/validation-rules",
    responses(
        (status = 200, description = "Upload limits", body = ValidationRules)
    ),
    tag = "system"
)]
pub async fn get_validation_rules(State(state): State<AppState>) -> Json<ValidationRules> {
    Json(ValidationRules::new(state.config.max_file_size))
}
