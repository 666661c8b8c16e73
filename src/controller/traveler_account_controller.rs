use std::sync::Arc;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::info;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::{AuthUser, StaffUser};
use crate::helpers::validation::{validate_passport_number, ValidationErrors};
use crate::models::traveler_account::{TravelerAccountPayload, TravelerAccountRequest};
use crate::models::user::User;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_own_requests).post(create_request))
        .route(
            "/:id",
            get(retrieve_request).put(update_request).delete(delete_request),
        )
        .route("/:id/approve", post(approve_request))
        .route_layer(Extension(postgres_repo))
}

fn validate_payload(payload: &TravelerAccountPayload) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if let Some(passport_number) = &payload.passport_number {
        validate_passport_number(&mut errors, passport_number);
    }
    errors.into_result()
}

/// Applicants see their own applications, staff see any.
async fn owned_request(
    postgres_repo: &PostgresConnectionRepo,
    caller: &User,
    id: i64,
) -> Result<TravelerAccountRequest, ApiError> {
    match postgres_repo.retrieve_traveler_account_request(id).await? {
        Some(request) if request.user_id == caller.id || caller.is_staff => Ok(request),
        _ => Err(ApiError::NotFound),
    }
}

pub async fn list_own_requests(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    let requests = postgres_repo.list_traveler_account_requests(caller.id).await?;
    Ok((StatusCode::OK, Json(requests)))
}

pub async fn create_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<TravelerAccountPayload>,
) -> Result<impl IntoResponse, ApiError> {
    validate_payload(&payload)?;
    if caller.is_traveler {
        return Err(ApiError::BadRequest("You already have a traveler account.".to_string()));
    }

    let request = postgres_repo.create_traveler_account_request(caller.id, &payload).await?;
    info!("User {} applied for a traveler account", caller.id);
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn retrieve_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let request = owned_request(&postgres_repo, &caller, id).await?;
    Ok((StatusCode::OK, Json(request)))
}

pub async fn update_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(payload): Json<TravelerAccountPayload>,
) -> Result<impl IntoResponse, ApiError> {
    validate_payload(&payload)?;
    owned_request(&postgres_repo, &caller, id).await?;

    match postgres_repo.update_traveler_account_request(id, &payload).await? {
        Some(request) => Ok((StatusCode::OK, Json(request))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_request(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    owned_request(&postgres_repo, &caller, id).await?;
    postgres_repo.delete_traveler_account_request(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn approve_request(
    StaffUser(staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.set_traveler_account_approval(id, true).await? {
        Some(request) => {
            info!("Staff {} approved traveler account request {}", staff.id, id);
            Ok((StatusCode::OK, Json(json!({ "status": "Request approved", "request": request }))))
        }
        None => Err(ApiError::NotFound),
    }
}
