use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use axum::http::HeaderValue;
use axum::Router;
use bb8_postgres::bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bb8_postgres::tokio_postgres::NoTls;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use crate::config::Config;
use crate::helpers::handler_404::page_not_found_handler;
use crate::services::notification::Notifier;
use crate::services::payment::PaymentGateway;

pub mod admin_controller;
pub mod auth_controller;
pub mod health_check;
pub mod listing_controller;
pub mod listing_price_tier_controller;
pub mod listing_tag_controller;
pub mod price_tier_controller;
pub mod request_controller;
pub mod tag_controller;
pub mod traveler_account_controller;
pub mod user_controller;

#[derive(Clone)]
pub struct AppState {
    pub postgres_connection: Pool<PostgresConnectionManager<NoTls>>,
    pub config: Arc<Config>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

pub async fn serve(
    app_state: AppState,
) -> anyhow::Result<()> {
    let origins: Vec<HeaderValue> = app_state
        .config
        .allowed_origins()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {}: {}", origin, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let application = router_endpoints(app_state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_methods([
                            Method::GET,
                            Method::POST,
                            Method::PUT,
                            Method::DELETE,
                            Method::OPTIONS
                        ])
                        .allow_origin(origins)
                        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                )
                .layer(CompressionLayer::new())
                .layer(ConcurrencyLimitLayer::new(app_state.config.max_in_flight_requests))
        );

    let port = SocketAddr::from(([0, 0, 0, 0], app_state.config.port));
    info!("API server listening on port: {}", port);
    axum::Server::bind(&port)
        .serve(application.into_make_service())
        .await
        .context("Error spinning up the API server")
}

pub fn router_endpoints(app_state: AppState) -> Router {
    Router::new()
        .merge(health_check::router(app_state.clone()))
        .merge(auth_controller::router(app_state.clone()))
        .nest("/users", user_controller::router(app_state.clone()))
        .nest("/traveler_account_requests", traveler_account_controller::router(app_state.clone()))
        .nest("/listings", listing_controller::router(app_state.clone()))
        .nest("/requests", request_controller::router(app_state.clone()))
        .nest("/tags", tag_controller::router(app_state.clone()))
        .nest("/price_tiers", price_tier_controller::router(app_state.clone()))
        .nest("/listing_tags", listing_tag_controller::router(app_state.clone()))
        .nest("/listing_price_tiers", listing_price_tier_controller::router(app_state.clone()))
        .nest("/admin", admin_controller::router(app_state))
        .fallback(page_not_found_handler)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use async_trait::async_trait;
    use bb8_postgres::bb8::Pool;
    use bb8_postgres::PostgresConnectionManager;
    use bb8_postgres::tokio_postgres::NoTls;
    use clap::Parser;
    use crate::config::Config;
    use crate::services::notification::{Notifier, OutboundEmail};
    use crate::services::payment::PaymentGateway;
    use super::AppState;

    struct NoopGateway;

    #[async_trait]
    impl PaymentGateway for NoopGateway {
        async fn create_payment_link(&self, _: &str, _: f64, request_id: i64) -> anyhow::Result<String> {
            Ok(format!("https://pay.test/c/{}", request_id))
        }
    }

    struct NoopNotifier;

    impl Notifier for NoopNotifier {
        fn send(&self, _: OutboundEmail) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// State over a lazily connecting pool; nothing touches the database
    /// until a handler asks for a connection.
    pub fn app_state() -> AppState {
        let config = Config::parse_from([
            "traveler-cargo-backend",
            "--database-url", "postgres://postgres@127.0.0.1:1/unused",
            "--payment-api-key", "key",
            "--payment-store-id", "1",
            "--payment-variant-id", "2",
            "--email-api-url", "http://127.0.0.1:1/send",
            "--email-api-key", "mail-key",
            "--default-from-email", "noreply@cargo.local",
        ]);
        let manager = PostgresConnectionManager::new_from_stringlike(&config.database_url, NoTls)
            .expect("valid connection string");
        let pool = Pool::builder().build_unchecked(manager);

        AppState {
            postgres_connection: pool,
            config: Arc::new(config),
            payment_gateway: Arc::new(NoopGateway),
            notifier: Arc::new(NoopNotifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use super::*;

    #[tokio::test]
    async fn health_check_answers_ok() {
        let app = router_endpoints(test_support::app_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_paths_fall_back_to_not_found() {
        let app = router_endpoints(test_support::app_state());
        let response = app
            .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_credentials() {
        let app = router_endpoints(test_support::app_state());
        for uri in ["/listings", "/requests", "/users/me", "/admin/dashboard"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn request_updates_are_routed_and_authenticated() {
        let app = router_endpoints(test_support::app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/requests/7")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"listing_id":3,"weight":4.5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn staff_traveler_account_listing_requires_authentication() {
        let app = router_endpoints(test_support::app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/traveler_accounts?search=ana&is_approved=false")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn confirm_requests_requires_authentication() {
        let app = router_endpoints(test_support::app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/requests/confirm_requests")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"request_ids":[1,2]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
