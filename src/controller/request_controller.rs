use std::sync::Arc;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::helpers::validation::ValidationErrors;
use crate::models::listing::Listing;
use crate::models::transport_request::{NewTransportRequest, RequestStatus, TransportRequestPayload};
use crate::repositories::postgres_repo::PostgresConnectionRepo;
use crate::repositories::RequestStore;
use crate::services::confirmation::{ConfirmationError, ConfirmationService};
use crate::services::pricing::price_for_weight;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));
    let confirmation_service = Arc::new(ConfirmationService::new(
        postgres_repo.clone(),
        app_state.payment_gateway,
        app_state.notifier,
    ));

    Router::new()
        .route("/", get(list_own_requests).post(create_request))
        .route("/incoming", get(list_incoming_requests))
        .route("/confirm_requests", post(confirm_requests))
        .route(
            "/:id",
            get(retrieve_request).put(update_request).delete(delete_request),
        )
        .route_layer(Extension(postgres_repo))
        .route_layer(Extension(confirmation_service))
}

pub async fn list_own_requests(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    let requests = postgres_repo.list_user_requests(caller.id).await?;
    Ok((StatusCode::OK, Json(requests)))
}

#[derive(Deserialize, Clone, Debug)]
pub struct IncomingRequestsQuery {
    pub status: Option<RequestStatus>,
}

pub async fn list_incoming_requests(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<IncomingRequestsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let requests = postgres_repo.list_incoming_requests(caller.id, query.status).await?;
    Ok((StatusCode::OK, Json(requests)))
}

async fn bid_target(
    postgres_repo: &PostgresConnectionRepo,
    payload: &TransportRequestPayload,
    requester_id: i64,
) -> Result<Listing, ApiError> {
    let listing = match postgres_repo.retrieve_listing(payload.listing_id).await? {
        Some(listing) => listing,
        None => {
            return Err(ValidationErrors::single(
                "listing_id",
                format!("Invalid pk \"{}\" - object does not exist.", payload.listing_id),
            ).into())
        }
    };
    payload.validate(&listing, requester_id)?;
    Ok(listing)
}

/// Tier price for the bid's weight, recomputed on every create and update.
async fn quoted_price(
    postgres_repo: &PostgresConnectionRepo,
    listing_id: i64,
    weight: Option<f64>,
) -> anyhow::Result<Option<f64>> {
    match weight {
        Some(weight) => {
            let tiers = postgres_repo.price_tiers_for_listing(listing_id).await?;
            Ok(price_for_weight(&tiers, weight))
        }
        None => Ok(None),
    }
}

pub async fn create_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<TransportRequestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = bid_target(&postgres_repo, &payload, caller.id).await?;
    let total_price = quoted_price(&postgres_repo, listing.id, payload.weight).await?;

    let request = postgres_repo
        .create_transport_request(&NewTransportRequest {
            user_id: caller.id,
            listing_id: listing.id,
            weight: payload.weight,
            volume: payload.volume,
            total_price,
        })
        .await?;
    info!("User {} requested transport on listing {}", caller.id, listing.id);

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn update_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(payload): Json<TransportRequestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let request = postgres_repo
        .retrieve_transport_request(id)
        .await?
        .filter(|r| r.user_id == caller.id)
        .ok_or(ApiError::NotFound)?;
    if request.status != RequestStatus::Pending {
        return Err(ApiError::BadRequest("Only pending requests can be changed.".to_string()));
    }

    let listing = bid_target(&postgres_repo, &payload, caller.id).await?;
    let total_price = quoted_price(&postgres_repo, listing.id, payload.weight).await?;

    let update = NewTransportRequest {
        user_id: caller.id,
        listing_id: listing.id,
        weight: payload.weight,
        volume: payload.volume,
        total_price,
    };
    match postgres_repo.update_transport_request(id, &update).await? {
        Some(request) => Ok((StatusCode::OK, Json(request))),
        // Accepted between the read and the write.
        None => Err(ApiError::BadRequest("Only pending requests can be changed.".to_string())),
    }
}

pub async fn retrieve_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let request = postgres_repo
        .retrieve_transport_request(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if request.user_id != caller.id {
        // The listing creator may also look at requests made on their listing.
        let listing = postgres_repo.retrieve_listing(request.listing_id).await?;
        if listing.map(|l| l.creator_id) != Some(caller.id) {
            return Err(ApiError::NotFound);
        }
    }
    Ok((StatusCode::OK, Json(request)))
}

pub async fn delete_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let request = postgres_repo
        .retrieve_transport_request(id)
        .await?
        .filter(|r| r.user_id == caller.id)
        .ok_or(ApiError::NotFound)?;
    if request.status != RequestStatus::Pending {
        return Err(ApiError::BadRequest("Only pending requests can be withdrawn.".to_string()));
    }

    postgres_repo.delete_transport_request(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ConfirmRequestsBody {
    #[serde(default)]
    pub request_ids: Vec<i64>,
}

pub async fn confirm_requests(
    AuthUser(caller): AuthUser,
    Extension(confirmation_service): Extension<Arc<ConfirmationService>>,
    Json(body): Json<ConfirmRequestsBody>,
) -> Result<Response, ApiError> {
    match confirmation_service.confirm_requests(caller.id, &body.request_ids).await {
        Ok(outcome) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "Requests confirmed and emails sent.",
                "confirmed": outcome.confirmed,
                "skipped": outcome.skipped,
            })),
        ).into_response()),
        Err(ConfirmationError::NoValidRequests) => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "No valid requests found." })),
        ).into_response()),
        Err(e @ ConfirmationError::PermissionDenied { .. }) => Err(ApiError::Forbidden(e.to_string())),
        Err(ConfirmationError::Store(e)) => Err(ApiError::Internal(e)),
    }
}
