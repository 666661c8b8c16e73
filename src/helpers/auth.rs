use std::sync::Arc;
use anyhow::Context;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Extension;
use tracing::debug;
use crate::helpers::api_error::ApiError;
use crate::models::user::User;
use crate::repositories::postgres_repo::PostgresConnectionRepo;

/// The authenticated caller, resolved from an `Authorization: Token <key>` header.
pub struct AuthUser(pub User);

/// An authenticated caller with staff rights.
pub struct StaffUser(pub User);

pub fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    match scheme {
        "Token" | "Bearer" => Some(key),
        _ => None,
    }
}

pub fn new_token_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// bcrypt is CPU bound, so hashing runs on the blocking pool.
pub async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")
}

pub async fn verify_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(token_from_header)
            .map(str::to_string)
            .ok_or(ApiError::Unauthorized)?;

        let Extension(postgres_repo) = Extension::<Arc<PostgresConnectionRepo>>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Repository missing from router: {}", e)))?;

        match postgres_repo.user_for_token(&key).await? {
            Some(user) => Ok(AuthUser(user)),
            None => {
                debug!("Rejected unknown or inactive token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(ApiError::Forbidden("Staff access required.".to_string()));
        }
        Ok(StaffUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_and_bearer_schemes() {
        assert_eq!(token_from_header("Token abc123"), Some("abc123"));
        assert_eq!(token_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(token_from_header("Basic abc123"), None);
        assert_eq!(token_from_header("Token "), None);
        assert_eq!(token_from_header("abc123"), None);
    }

    #[test]
    fn token_keys_are_unique_hex() {
        let a = new_token_key();
        let b = new_token_key();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = bcrypt::hash("cargo2024", 4).unwrap();
        assert!(verify_password("cargo2024".to_string(), hash.clone()).await);
        assert!(!verify_password("wrong2024".to_string(), hash).await);
    }
}
