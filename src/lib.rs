pub mod api;
pub mod client;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::error::AppError;
use crate::config::RelayConfig;
use crate::services::pipeline::Pipeline;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_image,
        api::handlers::health::health_check,
        api::handlers::health::get_validation_rules,
    ),
    components(
        schemas(
            api::handlers::upload::UploadResponse,
            api::handlers::upload::ErrorResponse,
            api::handlers::health::HealthResponse,
            services::cleanup::CleanupSnapshot,
            utils::validation::ValidationRules,
        )
    ),
    tags(
        (name = "images", description = "Background removal"),
        (name = "system", description = "Health and limits")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: RelayConfig,
}

pub fn create_app(state: AppState) -> Router {
    let processed = ServeDir::new(state.pipeline.storage().processed_dir());
    let public = ServeDir::new(&state.config.public_dir);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/system/validation-rules",
            get(api::handlers::health::get_validation_rules),
        )
        .route(
            "/upload",
            post(api::handlers::upload::upload_image).layer(DefaultBodyLimit::max(
                state.config.max_file_size + 1024 * 1024, // 1MB buffer for multipart overhead
            )),
        )
        .nest_service("/processed", processed)
        .fallback_service(public)
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods(cors::Any)
        .allow_headers(cors::Any);

    if origins.is_empty() {
        layer.allow_origin(cors::Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Panics inside a handler become a 500; the server keeps running.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    AppError::Internal(format!("handler panicked: {}", details)).into_response()
}
