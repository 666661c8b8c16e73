use std::sync::Arc;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use crate::controller::AppState;
use crate::controller::listing_controller::creator_listing;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::helpers::validation::ValidationErrors;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_listing_tags).post(create_listing_tag))
        .route("/:id", get(retrieve_listing_tag).delete(delete_listing_tag))
        .route_layer(Extension(postgres_repo))
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListingFilter {
    pub listing: Option<i64>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListingTagPayload {
    pub listing_id: i64,
    pub tag_id: i64,
}

pub async fn list_listing_tags(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(filter): Query<ListingFilter>,
) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(postgres_repo.list_listing_tags(filter.listing).await?)))
}

pub async fn create_listing_tag(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<ListingTagPayload>,
) -> Result<impl IntoResponse, ApiError> {
    creator_listing(&postgres_repo, &caller, payload.listing_id).await?;
    if postgres_repo.retrieve_tag(payload.tag_id).await?.is_none() {
        return Err(ValidationErrors::single(
            "tag_id",
            format!("Invalid pk \"{}\" - object does not exist.", payload.tag_id),
        ).into());
    }

    match postgres_repo.create_listing_tag(payload.listing_id, payload.tag_id).await? {
        Some(listing_tag) => Ok((StatusCode::CREATED, Json(listing_tag))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn retrieve_listing_tag(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.retrieve_listing_tag(id).await? {
        Some(listing_tag) => Ok((StatusCode::OK, Json(listing_tag))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_listing_tag(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let listing_tag = postgres_repo
        .retrieve_listing_tag(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    creator_listing(&postgres_repo, &caller, listing_tag.listing_id).await?;

    postgres_repo.delete_listing_tag(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
