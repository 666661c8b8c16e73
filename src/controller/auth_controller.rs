use std::sync::Arc;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};
use crate::config::Config;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::{hash_password, new_token_key, verify_password};
use crate::helpers::validation::{looks_like_email, validate_new_password, ValidationErrors, NON_FIELD_ERRORS};
use crate::models::user::NewUser;
use crate::repositories::postgres_repo::PostgresConnectionRepo;
use crate::services::notification::{password_reset_email, Notifier};

const RESET_TOKEN_TTL_HOURS: i64 = 24;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/register/", post(register_user))
        .route("/login/", post(login_user))
        .route("/reset_password/", post(request_password_reset))
        .route(
            "/reset_password_confirm/:uid/:token/",
            post(confirm_password_reset).get(check_password_reset_token),
        )
        .route_layer(Extension(postgres_repo))
        .route_layer(Extension(app_state.notifier))
        .route_layer(Extension(app_state.config))
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct RegisterBody {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub password2: String,
}

pub async fn register_user(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = ValidationErrors::new();
    if body.username.trim().is_empty() {
        errors.add("username", "This field is required.");
    } else if postgres_repo.username_exists(&body.username, None).await? {
        errors.add("username", "Username is already in use.");
    }
    if !looks_like_email(&body.email) {
        errors.add("email", "Enter a valid email address.");
    } else if postgres_repo.email_exists(&body.email, None).await? {
        errors.add("email", "Email is already in use.");
    }
    validate_new_password(&mut errors, "password", &body.password, &body.password2);
    errors.into_result()?;

    let new_user = NewUser {
        username: body.username.trim().to_string(),
        email: body.email.trim().to_string(),
        password_hash: hash_password(body.password).await?,
        first_name: body.first_name,
        last_name: body.last_name,
    };
    let user = postgres_repo.create_user(&new_user).await?;
    let token = postgres_repo.get_or_create_token(user.id, &new_token_key()).await?;
    info!("Registered user: {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user.profile(), "token": token })),
    ))
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login_user(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ValidationErrors::single(NON_FIELD_ERRORS, "Both email and password are required.").into());
    }

    let user = match postgres_repo.retrieve_user_by_email(&body.email).await? {
        Some(user) if user.is_active => user,
        _ => return Err(ValidationErrors::single(NON_FIELD_ERRORS, "Invalid credentials.").into()),
    };
    if !verify_password(body.password, user.password_hash.clone()).await {
        return Err(ValidationErrors::single(NON_FIELD_ERRORS, "Invalid credentials.").into());
    }

    postgres_repo.record_login(user.id).await?;
    let token = postgres_repo.get_or_create_token(user.id, &new_token_key()).await?;

    Ok((StatusCode::OK, Json(json!({ "token": token }))))
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PasswordResetRequestBody {
    pub email: String,
}

pub async fn request_password_reset(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Extension(notifier): Extension<Arc<dyn Notifier>>,
    Extension(config): Extension<Arc<Config>>,
    Json(body): Json<PasswordResetRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match postgres_repo.retrieve_user_by_email(&body.email).await? {
        Some(user) => user,
        None => return Err(ValidationErrors::single("email", "Email address not found.").into()),
    };

    let token = new_token_key();
    let expires_at = OffsetDateTime::now_utc() + time::Duration::hours(RESET_TOKEN_TTL_HOURS);
    postgres_repo.create_password_reset_token(user.id, &token, expires_at).await?;

    let reset_link = format!(
        "{}/reset_password_confirm/{}/{}/",
        config.frontend_url.trim_end_matches('/'),
        user.id,
        token
    );
    if let Err(e) = notifier.send(password_reset_email(&user.email, &user.first_name, &reset_link)) {
        warn!("Failed to queue password reset email for user: {}, due to: {}", user.id, e);
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Password reset link has been sent to your email." })),
    ))
}

fn invalid_reset_link() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": "Invalid token or user ID." })))
}

pub async fn check_password_reset_token(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path((uid, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = match uid.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(invalid_reset_link()),
    };

    if postgres_repo.is_valid_reset_token(user_id, &token).await? {
        Ok((StatusCode::OK, Json(json!({ "message": "Token is valid." }))))
    } else {
        Ok(invalid_reset_link())
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PasswordResetConfirmBody {
    pub new_password: String,
    pub confirm_password: String,
}

pub async fn confirm_password_reset(
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path((uid, token)): Path<(String, String)>,
    Json(body): Json<PasswordResetConfirmBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = ValidationErrors::new();
    validate_new_password(&mut errors, "new_password", &body.new_password, &body.confirm_password);
    errors.into_result()?;

    let user_id = match uid.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(invalid_reset_link()),
    };

    let password_hash = hash_password(body.new_password).await?;
    if postgres_repo.reset_password(user_id, &token, &password_hash).await? {
        info!("Password reset for user: {}", user_id);
        Ok((StatusCode::OK, Json(json!({ "message": "Password has been reset successfully." }))))
    } else {
        Ok(invalid_reset_link())
    }
}
