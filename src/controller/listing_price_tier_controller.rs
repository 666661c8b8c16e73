use std::sync::Arc;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use crate::controller::AppState;
use crate::controller::listing_controller::creator_listing;
use crate::controller::listing_tag_controller::ListingFilter;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::helpers::validation::ValidationErrors;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_listing_price_tiers).post(create_listing_price_tier))
        .route("/:id", get(retrieve_listing_price_tier).delete(delete_listing_price_tier))
        .route_layer(Extension(postgres_repo))
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListingPriceTierPayload {
    pub listing_id: i64,
    pub price_tier_id: i64,
}

pub async fn list_listing_price_tiers(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(filter): Query<ListingFilter>,
) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(postgres_repo.list_listing_price_tiers(filter.listing).await?)))
}

pub async fn create_listing_price_tier(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<ListingPriceTierPayload>,
) -> Result<impl IntoResponse, ApiError> {
    creator_listing(&postgres_repo, &caller, payload.listing_id).await?;
    if postgres_repo.retrieve_price_tier(payload.price_tier_id).await?.is_none() {
        return Err(ValidationErrors::single(
            "price_tier_id",
            format!("Invalid pk \"{}\" - object does not exist.", payload.price_tier_id),
        ).into());
    }

    match postgres_repo
        .create_listing_price_tier(payload.listing_id, payload.price_tier_id)
        .await?
    {
        Some(row) => Ok((StatusCode::CREATED, Json(row))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn retrieve_listing_price_tier(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.retrieve_listing_price_tier(id).await? {
        Some(row) => Ok((StatusCode::OK, Json(row))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_listing_price_tier(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = postgres_repo
        .retrieve_listing_price_tier(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    creator_listing(&postgres_repo, &caller, row.listing_id).await?;

    postgres_repo.delete_listing_price_tier(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
