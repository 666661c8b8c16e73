use std::sync::Arc;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::warn;
use crate::controller::AppState;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/health", get(get_health_check))
        .route("/health/ready", get(get_readiness))
        .route_layer(Extension(postgres_repo))
}

/// Liveness, no dependencies touched
async fn get_health_check() -> Result<StatusCode, StatusCode>
{
    Ok(StatusCode::OK)
}

async fn get_readiness(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> impl IntoResponse {
    match postgres_repo.ping().await {
        Ok(_) => (StatusCode::OK, Json(json!({ "database": "up" }))).into_response(),
        Err(e) => {
            warn!("Readiness check failed due to: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "database": "down" }))).into_response()
        }
    }
}
