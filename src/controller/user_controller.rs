use std::sync::Arc;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use time::OffsetDateTime;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::{hash_password, AuthUser};
use crate::helpers::validation::{
    looks_like_email, validate_new_password, validate_passport_number, validate_phone_number, ValidationErrors,
};
use crate::models::user::{UserProfile, UserUpdate};
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_users))
        .route("/me", get(retrieve_me).put(update_me))
        .route_layer(Extension(postgres_repo))
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListUsersQuery {
    pub username: Option<String>,
}

pub async fn list_users(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = postgres_repo.list_users(query.username.as_deref()).await?;
    let profiles: Vec<UserProfile> = users.iter().map(|u| u.profile()).collect();
    Ok((StatusCode::OK, Json(profiles)))
}

pub async fn retrieve_me(
    AuthUser(caller): AuthUser,
) -> impl IntoResponse {
    (StatusCode::OK, Json(caller.profile()))
}

pub async fn update_me(
    AuthUser(caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(update): Json<UserUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = ValidationErrors::new();
    if let Some(username) = &update.username {
        if username.trim().is_empty() {
            errors.add("username", "This field may not be blank.");
        } else if postgres_repo.username_exists(username, Some(caller.id)).await? {
            errors.add("username", "Username is already in use.");
        }
    }
    if let Some(email) = &update.email {
        if !looks_like_email(email) {
            errors.add("email", "Enter a valid email address.");
        } else if postgres_repo.email_exists(email, Some(caller.id)).await? {
            errors.add("email", "Email is already in use.");
        }
    }
    if let Some(phone_number) = &update.phone_number {
        validate_phone_number(&mut errors, phone_number);
    }
    if let Some(passport_number) = &update.passport_number {
        validate_passport_number(&mut errors, passport_number);
    }
    if let Some(date_of_birth) = update.date_of_birth {
        if date_of_birth > OffsetDateTime::now_utc().date() {
            errors.add("date_of_birth", "Date of birth cannot be in the future.");
        }
    }
    if let Some(password) = &update.password {
        validate_new_password(&mut errors, "password", password, password);
    }
    errors.into_result()?;

    let password_hash = match update.password.clone() {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };

    match postgres_repo.update_user(caller.id, &update, password_hash).await? {
        Some(user) => Ok((StatusCode::OK, Json(user.profile()))),
        None => Err(ApiError::NotFound),
    }
}
