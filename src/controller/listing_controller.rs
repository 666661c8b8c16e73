use std::collections::BTreeSet;
use std::sync::Arc;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::helpers::validation::ValidationErrors;
use crate::models::listing::{Listing, ListingPayload, ListingUpdate};
use crate::models::user::User;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_listings).post(create_listing))
        .route(
            "/:id",
            get(retrieve_listing).put(update_listing).delete(delete_listing),
        )
        .route_layer(Extension(postgres_repo))
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListListingsQuery {
    pub creator: Option<i64>,
}

async fn ensure_tags_exist(
    postgres_repo: &PostgresConnectionRepo,
    tag_ids: &[i64],
) -> Result<(), ApiError> {
    let wanted: BTreeSet<i64> = tag_ids.iter().copied().collect();
    if wanted.is_empty() {
        return Ok(());
    }
    let wanted: Vec<i64> = wanted.into_iter().collect();
    let found: BTreeSet<i64> = postgres_repo.existing_tag_ids(&wanted).await?.into_iter().collect();

    let mut errors = ValidationErrors::new();
    for id in wanted.iter().filter(|id| !found.contains(id)) {
        errors.add("tags", format!("Invalid pk \"{}\" - object does not exist.", id));
    }
    Ok(errors.into_result()?)
}

/// Loads a listing the caller created.
pub(crate) async fn creator_listing(
    postgres_repo: &PostgresConnectionRepo,
    caller: &User,
    listing_id: i64,
) -> Result<Listing, ApiError> {
    let listing = postgres_repo
        .retrieve_listing(listing_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if listing.creator_id != caller.id {
        return Err(ApiError::Forbidden("Only the listing creator can change this listing.".to_string()));
    }
    Ok(listing)
}

pub async fn list_listings(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<ListListingsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let listings = postgres_repo.list_listings(query.creator).await?;
    Ok((StatusCode::OK, Json(listings)))
}

pub async fn create_listing(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<ListingPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if !caller.is_traveler {
        return Err(ApiError::Forbidden("Only travelers can post listings.".to_string()));
    }
    payload.validate(OffsetDateTime::now_utc())?;
    ensure_tags_exist(&postgres_repo, &payload.tags).await?;

    let listing = postgres_repo.create_listing(caller.id, &payload).await?;
    info!("User {} posted listing {} ({})", caller.id, listing.id, listing.route());

    let detail = postgres_repo
        .retrieve_listing_detail(listing.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn retrieve_listing(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.retrieve_listing_detail(id).await? {
        Some(detail) => Ok((StatusCode::OK, Json(detail))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn update_listing(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(update): Json<ListingUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = creator_listing(&postgres_repo, &caller, id).await?;
    let merged = update.apply(&listing, OffsetDateTime::now_utc())?;
    if let Some(tags) = update.replacement_tags() {
        ensure_tags_exist(&postgres_repo, tags).await?;
    }

    postgres_repo
        .update_listing(&merged, update.replacement_tags(), update.replacement_price_tiers())
        .await?;

    match postgres_repo.retrieve_listing_detail(id).await? {
        Some(detail) => Ok((StatusCode::OK, Json(detail))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_listing(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    creator_listing(&postgres_repo, &caller, id).await?;
    postgres_repo.delete_listing(id).await?;
    info!("User {} deleted listing {}", caller.id, id);
    Ok(StatusCode::NO_CONTENT)
}
