use std::sync::Arc;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::models::price_tier::NewPriceTier;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_price_tiers).post(create_price_tier))
        .route(
            "/:id",
            get(retrieve_price_tier).put(update_price_tier).delete(delete_price_tier),
        )
        .route_layer(Extension(postgres_repo))
}

pub async fn list_price_tiers(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(postgres_repo.list_price_tiers().await?)))
}

pub async fn create_price_tier(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(tier): Json<NewPriceTier>,
) -> Result<impl IntoResponse, ApiError> {
    tier.validate()?;
    Ok((StatusCode::CREATED, Json(postgres_repo.create_price_tier(&tier).await?)))
}

pub async fn retrieve_price_tier(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.retrieve_price_tier(id).await? {
        Some(tier) => Ok((StatusCode::OK, Json(tier))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn update_price_tier(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(tier): Json<NewPriceTier>,
) -> Result<impl IntoResponse, ApiError> {
    tier.validate()?;
    match postgres_repo.update_price_tier(id, &tier).await? {
        Some(tier) => Ok((StatusCode::OK, Json(tier))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_price_tier(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if postgres_repo.delete_price_tier(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}
