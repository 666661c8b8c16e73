use std::sync::Arc;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::AuthUser;
use crate::helpers::validation::ValidationErrors;
use crate::models::tag::TagPayload;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/", get(list_tags).post(create_tag))
        .route("/:id", get(retrieve_tag).put(update_tag).delete(delete_tag))
        .route_layer(Extension(postgres_repo))
}

fn tag_name(payload: TagPayload) -> Result<String, ValidationErrors> {
    match payload.name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ValidationErrors::single("name", "Tag name cannot be empty.")),
    }
}

pub async fn list_tags(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(postgres_repo.list_tags().await?)))
}

pub async fn create_tag(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(payload): Json<TagPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let name = tag_name(payload)?;
    Ok((StatusCode::CREATED, Json(postgres_repo.create_tag(&name).await?)))
}

pub async fn retrieve_tag(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.retrieve_tag(id).await? {
        Some(tag) => Ok((StatusCode::OK, Json(tag))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn update_tag(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(payload): Json<TagPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let name = tag_name(payload)?;
    match postgres_repo.update_tag(id, &name).await? {
        Some(tag) => Ok((StatusCode::OK, Json(tag))),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_tag(
    AuthUser(_caller): AuthUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if postgres_repo.delete_tag(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tag_names_are_rejected() {
        assert!(tag_name(TagPayload { name: None }).is_err());
        assert!(tag_name(TagPayload { name: Some("   ".to_string()) }).is_err());
        assert_eq!(tag_name(TagPayload { name: Some(" fragile ".to_string()) }).unwrap(), "fragile");
    }
}
